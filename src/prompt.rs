//! Prompt Builder and SQL Extractor
//!
//! Builds the SQL-generation and summary prompts, parses the structured
//! reply of the SQL-generation call, and rewrites queries on the logical view
//! so they run against the base tables.

use crate::error::{ChatError, Result};
use crate::schema::{SchemaDescription, ViewDefinition};
use crate::session::{Role, Turn};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref SQL_LABEL: Regex = Regex::new(r"(?i)(?:sql\s+query|requête\s+sql)\s*:").unwrap();
    static ref CHART_REQUIRED_LABEL: Regex =
        Regex::new(r"(?i)(?:chart\s+required|graphique\s+requis)\s*:[ \t]*([^\n]*)").unwrap();
    static ref CHART_TYPE_LABEL: Regex =
        Regex::new(r"(?i)(?:chart\s+type|type\s+de\s+graphique)\s*:[ \t]*([^\n]*)").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"```[a-zA-Z]*").unwrap();
}

/// Rough token count: four characters per token, never zero
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Parsed reply of the SQL-generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlExtraction {
    pub sql: String,
    pub chart_required: bool,
    pub chart_type: Option<String>,
}

const FEW_SHOTS: &str = r#"Question: What is the total revenue for Mrs Dupont?
SQL query:
SELECT SUM(TotFactureTTC) AS TotalRevenue FROM {view} WHERE NomPatient LIKE '%Dupont%';
Chart required: No
Chart type: None
---
Question: Show the number of patients by nationality as a bar chart.
SQL query:
SELECT Nationalite, COUNT(*) AS PatientCount FROM {view} GROUP BY Nationalite;
Chart required: Yes
Chart type: Bar
---
Question: What is the age distribution of patients as a histogram?
SQL query:
SELECT EXTRACT(YEAR FROM AGE(CURRENT_DATE, DatNai)) AS Age FROM {view};
Chart required: Yes
Chart type: Histogram
---
Question: Create a radar chart comparing the number of diagnoses and patients per ward.
SQL query:
SELECT ServiceHospitalisation, COUNT(DISTINCT Diagnost) AS Diagnoses, COUNT(*) AS Patients FROM {view} GROUP BY ServiceHospitalisation;
Chart required: Yes
Chart type: Radar
---
Question: List the patients admitted this year.
SQL query:
SELECT NomPatient, DatArr, ServiceHospitalisation FROM {view} WHERE EXTRACT(YEAR FROM DatArr) = EXTRACT(YEAR FROM CURRENT_DATE);
Chart required: No
Chart type: None
---
Question: Montrez le chiffre d'affaires par service sous forme de camembert.
SQL query:
SELECT ServiceHospitalisation, SUM(TotFactureTTC) AS Revenue FROM {view} GROUP BY ServiceHospitalisation;
Chart required: Yes
Chart type: Camembert
---
Question: What is the average age of male patients per ward?
SQL query:
SELECT ServiceHospitalisation, AVG(EXTRACT(YEAR FROM AGE(CURRENT_DATE, DatNai))) AS AverageAge FROM {view} WHERE sex = 1 GROUP BY ServiceHospitalisation;
Chart required: No
Chart type: None"#;

fn render_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return "(no previous messages)".to_string();
    }
    history
        .iter()
        .map(|turn| {
            let speaker = match turn.role() {
                Role::Human => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, turn.text())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking the LLM for one read-only SELECT plus chart hints
pub fn build_sql_prompt(
    question: &str,
    schema: &SchemaDescription,
    currency: &str,
    current_year: i32,
    history: &[Turn],
) -> String {
    let view = &schema.view;
    format!(
        r#"You are a data analyst in a clinic. A user asks questions about the clinic database.
The database is PostgreSQL.
The current year is {current_year}.
All amounts are expressed in {currency}.
Below is the schema of the view {view} with column descriptions.

<SCHEMA>
{columns}
</SCHEMA>

Based on the user's question:

1. Write exactly one read-only PostgreSQL SELECT query against {view} that answers it.
   - Select only the columns needed to answer the question.
   - Every non-aggregated column in the SELECT must appear in the GROUP BY.
   - For "this year", use EXTRACT(YEAR FROM CURRENT_DATE).
   - The column sex holds 1 for male and 0 for female.
   - Do not filter on the currency unless the user explicitly asks for it.
   - Never write currency symbols in amounts.
   - Do not use backticks or markdown code fences. Plain SQL only.
   - Even for a visualization request, always write a valid query.

2. Decide whether the user wants a chart and, if so, which type (bar, line, pie, scatter, box, area, radar, map, histogram).

Answer in exactly this format:

SQL query:
<the query>
Chart required: <Yes|No>
Chart type: <type or None>

Examples:
---
{examples}
---

Recent conversation:
{history}

Your turn:
Question: {question}"#,
        columns = schema.render(),
        examples = FEW_SHOTS.replace("{view}", view),
        history = render_history(history),
    )
}

/// How much of the result the summary prompt carries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultContext<'a> {
    Full(&'a str),
    Sample(&'a str),
    Omitted,
}

/// Prompt asking the LLM to answer the question from the query result
pub fn build_summary_prompt(
    question: &str,
    context: ResultContext<'_>,
    list_nationalities: bool,
) -> String {
    let intro = match context {
        ResultContext::Full(_) => "the user's question and the SQL query results",
        ResultContext::Sample(_) => "the user's question and a sample of the SQL query results",
        ResultContext::Omitted => "the user's question",
    };

    let mut rules = vec![
        "- Do not mention the SQL query or the raw result data in your answer.",
        "- Leave out anything unnecessary.",
        "- Focus only on what is relevant to the user.",
    ];
    if matches!(context, ResultContext::Sample(_)) {
        rules.push("- Only part of the results is shown.");
    }
    if list_nationalities {
        rules.push("- List every nationality if it is relevant to the question.");
    }

    let results = match context {
        ResultContext::Full(rows) => format!("SQL query results: {}\n", rows),
        ResultContext::Sample(rows) => format!("SQL query results (sample): {}\n", rows),
        ResultContext::Omitted => String::new(),
    };

    format!(
        "You are a data analyst in a clinic. Based on {intro}, write a relevant answer.\n\
         {rules}\n\n\
         User question: {question}\n\
         {results}\n\
         Write a clear and complete answer from the information above.",
        rules = rules.join("\n"),
    )
}

fn strip_markup(reply: &str) -> String {
    CODE_FENCE
        .replace_all(reply, "")
        .replace("**", "")
        .replace('`', "")
}

fn is_absent(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "" | "none" | "aucun" | "aucune" | "n/a" | "na" | "-"
    )
}

/// Parse the `SQL query:` / `Chart required:` / `Chart type:` reply.
pub fn extract_sql(reply: &str) -> Result<SqlExtraction> {
    let text = strip_markup(reply);

    let sql_label = SQL_LABEL
        .find(&text)
        .ok_or_else(|| ChatError::InvalidGeneratedQuery("missing 'SQL query' section".to_string()))?;
    let chart_required = CHART_REQUIRED_LABEL
        .captures_at(&text, sql_label.end())
        .ok_or_else(|| {
            ChatError::InvalidGeneratedQuery("missing 'Chart required' section".to_string())
        })?;
    let chart_required_span = chart_required
        .get(0)
        .ok_or_else(|| ChatError::InvalidGeneratedQuery("malformed reply".to_string()))?;

    let sql = text[sql_label.end()..chart_required_span.start()]
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string();

    if sql.is_empty() {
        return Err(ChatError::InvalidGeneratedQuery("empty SQL".to_string()));
    }
    if !sql.to_ascii_lowercase().starts_with("select") {
        return Err(ChatError::InvalidGeneratedQuery(format!(
            "not a SELECT statement: {}",
            sql.chars().take(40).collect::<String>()
        )));
    }

    let flag = chart_required
        .get(1)
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default();
    let chart_required = flag.starts_with("yes") || flag.starts_with("oui");

    let chart_type = CHART_TYPE_LABEL
        .captures_at(&text, chart_required_span.start())
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .trim()
                .trim_matches(|c| c == '[' || c == ']' || c == '.')
                .trim()
                .to_string()
        })
        .filter(|label| !is_absent(label));

    debug!(
        "Extracted SQL ({} chars), chart_required={}, chart_type={:?}",
        sql.len(),
        chart_required,
        chart_type
    );

    Ok(SqlExtraction {
        sql,
        chart_required,
        chart_type,
    })
}

/// Prefix a `WITH <view> AS (...)` CTE when the query uses the logical view.
/// Schema-qualified and quoted references are rewritten to the bare view
/// name first, matching the unquoted CTE name.
pub fn inline_view_definition(sql: &str, view: &ViewDefinition) -> Result<String> {
    if !sql.to_lowercase().contains(&view.name.to_lowercase()) {
        return Ok(sql.to_string());
    }

    let name = regex::escape(&view.name);
    let reference = Regex::new(&format!(
        r#"(?i)"?{schema}"?\s*\.\s*"?{name}"?|"{name}""#,
        schema = regex::escape(&view.schema),
    ))
    .map_err(|e| ChatError::Config(format!("Invalid view name: {}", e)))?;
    let rewritten = reference.replace_all(sql, view.name.as_str());

    Ok(format!(
        "WITH {} AS (\n{}\n)\n{}",
        view.name, view.body, rewritten
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnCatalog;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
        // characters, not bytes
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_extract_reference_reply() {
        let parsed = extract_sql("SQL query:\nSELECT 1\nChart required: No\nChart type: None").unwrap();
        assert_eq!(
            parsed,
            SqlExtraction {
                sql: "SELECT 1".to_string(),
                chart_required: false,
                chart_type: None,
            }
        );
    }

    #[test]
    fn test_extract_strips_markdown() {
        let reply = "**SQL query:**\n```sql\nSELECT Nationalite, COUNT(*) FROM VPatientAI GROUP BY Nationalite;\n```\n\n**Chart required:** Yes\n**Chart type:** Bar chart";
        let parsed = extract_sql(reply).unwrap();
        assert_eq!(
            parsed.sql,
            "SELECT Nationalite, COUNT(*) FROM VPatientAI GROUP BY Nationalite"
        );
        assert!(parsed.chart_required);
        assert_eq!(parsed.chart_type.as_deref(), Some("Bar chart"));
    }

    #[test]
    fn test_extract_french_labels() {
        let reply = "Requête SQL:\nselect count(*) from VPatientAI\nGraphique Requis: Non\nType de Graphique: Aucun";
        let parsed = extract_sql(reply).unwrap();
        assert_eq!(parsed.sql, "select count(*) from VPatientAI");
        assert!(!parsed.chart_required);
        assert_eq!(parsed.chart_type, None);
    }

    #[test]
    fn test_extract_missing_chart_type_is_none() {
        let parsed = extract_sql("SQL query: SELECT 2\nChart required: Yes").unwrap();
        assert!(parsed.chart_required);
        assert_eq!(parsed.chart_type, None);
    }

    #[test]
    fn test_empty_sql_is_rejected() {
        let err = extract_sql("SQL query:\n\nChart required: No\nChart type: None").unwrap_err();
        assert!(matches!(err, ChatError::InvalidGeneratedQuery(_)));
    }

    #[test]
    fn test_non_select_is_rejected() {
        let err = extract_sql("SQL query:\nDELETE FROM client\nChart required: No").unwrap_err();
        assert!(matches!(err, ChatError::InvalidGeneratedQuery(_)));
    }

    #[test]
    fn test_missing_sections_are_rejected() {
        assert!(extract_sql("SELECT 1").is_err());
        assert!(extract_sql("SQL query:\nSELECT 1").is_err());
    }

    #[test]
    fn test_inline_view_definition() {
        let view = ViewDefinition::new("VPatientAI", "public", "SELECT * FROM client");
        let sql = "SELECT COUNT(*) FROM public.VPatientAI";
        assert_eq!(
            inline_view_definition(sql, &view).unwrap(),
            "WITH VPatientAI AS (\nSELECT * FROM client\n)\nSELECT COUNT(*) FROM VPatientAI"
        );

        let quoted = r#"SELECT 1 FROM "public"."VPatientAI""#;
        assert!(inline_view_definition(quoted, &view)
            .unwrap()
            .ends_with("SELECT 1 FROM VPatientAI"));
    }

    #[test]
    fn test_inline_view_unquotes_bare_reference() {
        let view = ViewDefinition::new("VPatientAI", "public", "SELECT * FROM client");
        let sql = r#"SELECT COUNT(*) FROM "VPatientAI" WHERE Sexe = 1"#;
        assert_eq!(
            inline_view_definition(sql, &view).unwrap(),
            "WITH VPatientAI AS (\nSELECT * FROM client\n)\nSELECT COUNT(*) FROM VPatientAI WHERE Sexe = 1"
        );
    }

    #[test]
    fn test_inline_view_untouched_without_view() {
        let view = ViewDefinition::new("VPatientAI", "public", "SELECT * FROM client");
        assert_eq!(inline_view_definition("SELECT 1", &view).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_sql_prompt_embeds_context() {
        let catalog = ColumnCatalog::from_json(r#"{"sex": "1 male, 0 female"}"#).unwrap();
        let schema = catalog.merge("VPatientAI", &[]);
        let history = vec![
            Turn::human("How many patients?"),
            Turn::assistant("There are 42 patients."),
        ];
        let prompt = build_sql_prompt("And by ward?", &schema, "TND", 2026, &history);

        assert!(prompt.contains("The current year is 2026."));
        assert!(prompt.contains("expressed in TND"));
        assert!(prompt.contains("- sex: 1 male, 0 female"));
        assert!(prompt.contains("User: How many patients?\nAssistant: There are 42 patients."));
        assert!(prompt.contains("EXTRACT(YEAR FROM CURRENT_DATE)"));
        assert!(prompt.ends_with("Question: And by ward?"));
        assert!(!prompt.contains("{view}"));
    }

    #[test]
    fn test_summary_prompt_variants() {
        let full = build_summary_prompt("q", ResultContext::Full("[{\"n\":1}]"), false);
        assert!(full.contains("SQL query results: [{\"n\":1}]"));

        let sample = build_summary_prompt("q", ResultContext::Sample("[]"), true);
        assert!(sample.contains("Only part of the results is shown."));
        assert!(sample.contains("List every nationality"));

        let bare = build_summary_prompt("q", ResultContext::Omitted, false);
        assert!(!bare.contains("SQL query results"));
    }
}
