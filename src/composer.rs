//! Adaptive Response Composer
//!
//! Turns a query result into the assistant's reply. Small results are
//! summarized by the LLM through a shrinking cascade of prompts (full rows,
//! then a sample, then the question alone) until one fits the per-request
//! token ceiling. Large results skip the LLM entirely and become a CSV
//! download.

use crate::chart::{Chart, ChartTypeResolver};
use crate::currency::remove_currency_symbols;
use crate::error::{ChatError, Result};
use crate::frame::{records_for_prompt, to_csv_bytes};
use crate::llm::{translate_llm_error, LanguageModel};
use crate::prompt::{build_summary_prompt, estimate_tokens, ResultContext, SqlExtraction};
use crate::rate_limiter::{throttled, TokenBucket};
use crate::session::{DownloadFile, RenderArtifact};
use chrono::{DateTime, Local};
use polars::prelude::DataFrame;
use tracing::{error, info, warn};

/// Sizing rules for replies
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerPolicy {
    /// Results above this many rows become a download
    pub inline_row_limit: usize,
    /// Rows kept by the sample prompt
    pub prompt_sample_rows: usize,
    /// Ceiling for one summary request
    pub max_tokens_per_request: usize,
    /// Tokens set aside for the LLM's answer
    pub reserved_response_tokens: usize,
}

impl Default for ComposerPolicy {
    fn default() -> Self {
        Self {
            inline_row_limit: 100,
            prompt_sample_rows: 1,
            max_tokens_per_request: 5000,
            reserved_response_tokens: 300,
        }
    }
}

impl ComposerPolicy {
    /// floor((prompt estimate + reserved) * 0.9)
    pub fn tokens_needed(&self, prompt: &str) -> usize {
        (estimate_tokens(prompt) + self.reserved_response_tokens) * 9 / 10
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Full,
    Sample,
    QuestionOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPlan {
    pub variant: PromptVariant,
    pub prompt: String,
    pub tokens: usize,
}

/// Pick the richest summary prompt that fits the per-request ceiling
pub fn plan_summary_prompt(
    policy: &ComposerPolicy,
    question: &str,
    sql: &str,
    frame: &DataFrame,
) -> Result<SummaryPlan> {
    let list_nationalities = sql.to_lowercase().contains("nationalite");
    let limit = policy.max_tokens_per_request;

    let full_rows = records_for_prompt(frame, policy.inline_row_limit)?;
    let prompt = build_summary_prompt(question, ResultContext::Full(&full_rows), list_nationalities);
    let tokens = policy.tokens_needed(&prompt);
    info!("Estimated tokens needed: {}", tokens);
    if tokens <= limit {
        return Ok(SummaryPlan { variant: PromptVariant::Full, prompt, tokens });
    }

    if frame.height() > policy.prompt_sample_rows {
        warn!("Prompt too long ({} tokens), retrying with a sample", tokens);
        let sample = records_for_prompt(frame, policy.prompt_sample_rows)?;
        let prompt = build_summary_prompt(question, ResultContext::Sample(&sample), list_nationalities);
        let tokens = policy.tokens_needed(&prompt);
        if tokens <= limit {
            return Ok(SummaryPlan { variant: PromptVariant::Sample, prompt, tokens });
        }
    }

    warn!("Prompt still too long, dropping the results from it");
    let prompt = build_summary_prompt(question, ResultContext::Omitted, list_nationalities);
    let tokens = policy.tokens_needed(&prompt);
    if tokens <= limit {
        return Ok(SummaryPlan { variant: PromptVariant::QuestionOnly, prompt, tokens });
    }

    error!("Cannot shrink the prompt below the token limit");
    Err(ChatError::UnprocessableResponseSize { needed: tokens, limit })
}

/// Assistant answer for one turn
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub chart: Option<Chart>,
    pub table: Option<DataFrame>,
    pub download: Option<DownloadFile>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn artifact(&self) -> RenderArtifact {
        RenderArtifact {
            chart: self.chart.clone(),
            table: self.table.clone(),
            download: self.download.clone(),
        }
    }
}

pub fn download_file_name(now: DateTime<Local>) -> String {
    format!("query_results_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

fn currency_note(currency: &str) -> String {
    format!("(Currency: {})", currency)
}

pub struct ResponseComposer {
    policy: ComposerPolicy,
    resolver: ChartTypeResolver,
}

impl ResponseComposer {
    pub fn new(policy: ComposerPolicy, resolver: ChartTypeResolver) -> Self {
        Self { policy, resolver }
    }

    pub fn policy(&self) -> &ComposerPolicy {
        &self.policy
    }

    pub fn resolver(&self) -> &ChartTypeResolver {
        &self.resolver
    }

    fn inline_table(&self, frame: &DataFrame) -> Option<DataFrame> {
        (frame.height() <= self.policy.inline_row_limit).then(|| frame.clone())
    }

    /// Reply to a new query from its result
    #[allow(clippy::too_many_arguments)]
    pub async fn compose(
        &self,
        llm: &dyn LanguageModel,
        bucket: &TokenBucket,
        question: &str,
        sql: &str,
        frame: &DataFrame,
        extraction: &SqlExtraction,
        currency: &str,
    ) -> Result<Reply> {
        let total_rows = frame.height();
        if total_rows == 0 {
            warn!("The SQL query returned no results");
            return Ok(Reply::text(format!(
                "The query returned no results. {}",
                currency_note(currency)
            )));
        }

        if total_rows > self.policy.inline_row_limit {
            info!("Result set too large ({} rows), generating a downloadable file", total_rows);
            let download = DownloadFile {
                name: download_file_name(Local::now()),
                bytes: to_csv_bytes(frame)?,
            };
            return Ok(Reply {
                text: format!(
                    "The result has {} rows, which is too large to display here. A CSV file has been generated and is ready for download. {}",
                    total_rows,
                    currency_note(currency)
                ),
                download: Some(download),
                ..Default::default()
            });
        }

        let plan = plan_summary_prompt(&self.policy, question, sql, frame)?;
        info!("📝 Summarizing with {:?} prompt ({} tokens)", plan.variant, plan.tokens);

        let tokens = u32::try_from(plan.tokens).unwrap_or(u32::MAX);
        let answer = throttled(bucket, tokens, || llm.invoke(&plan.prompt))
            .await
            .map_err(translate_llm_error)?;

        let mut text = remove_currency_symbols(answer.trim());
        if !text.is_empty() {
            text.push(' ');
            text.push_str(&currency_note(currency));
        }

        let mut chart = None;
        if let (true, Some(label)) = (extraction.chart_required, extraction.chart_type.as_deref()) {
            match self.resolver.render(label, frame) {
                Ok(c) => chart = Some(c),
                Err(e) => {
                    warn!("Visualization could not be generated: {}", e);
                    text.push_str("\n\nNote: the requested chart could not be generated.");
                }
            }
        }

        Ok(Reply {
            text,
            chart,
            table: self.inline_table(frame),
            download: None,
        })
    }

    /// Reply to a follow-up asking to chart the previous result
    pub fn compose_visualization(&self, phrase: &str, frame: &DataFrame, currency: &str) -> Result<Reply> {
        let chart = self.resolver.render(phrase, frame)?;
        Ok(Reply {
            text: format!("Here is the visualization as {}. {}", phrase, currency_note(currency)),
            chart: Some(chart),
            table: self.inline_table(frame),
            download: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;
    use async_trait::async_trait;
    use polars::prelude::*;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn ok(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) }
        }

        fn failing(message: &str) -> Self {
            Self { reply: Err(message.to_string()), prompts: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(ChatError::Llm)
        }
    }

    fn composer() -> ResponseComposer {
        ResponseComposer::new(ComposerPolicy::default(), ChartTypeResolver::default())
    }

    fn no_chart() -> SqlExtraction {
        SqlExtraction { sql: "SELECT n FROM t".to_string(), chart_required: false, chart_type: None }
    }

    fn numbers(rows: i64) -> DataFrame {
        df!["n" => (1..=rows).collect::<Vec<i64>>()].unwrap()
    }

    #[test]
    fn test_tokens_needed() {
        let policy = ComposerPolicy::default();
        // 400 chars → 100 tokens, (100 + 300) * 0.9
        assert_eq!(policy.tokens_needed(&"x".repeat(400)), 360);
        // (1 + 300) * 0.9 = 270.9
        assert_eq!(policy.tokens_needed(""), 270);
    }

    #[test]
    fn test_plan_full_for_small_results() {
        let plan = plan_summary_prompt(&ComposerPolicy::default(), "q", "SELECT n", &numbers(5)).unwrap();
        assert_eq!(plan.variant, PromptVariant::Full);
        assert!(plan.prompt.contains(r#"[{"n":1},{"n":2},{"n":3},{"n":4},{"n":5}]"#));
    }

    #[test]
    fn test_plan_falls_back_to_sample() {
        let wide = "w".repeat(500);
        let df = df!["note" => vec![wide.as_str(); 50]].unwrap();
        let plan = plan_summary_prompt(&ComposerPolicy::default(), "q", "SELECT note", &df).unwrap();
        assert_eq!(plan.variant, PromptVariant::Sample);
        assert!(plan.tokens <= 5000);
    }

    #[test]
    fn test_plan_skips_sample_for_single_row() {
        let huge = "h".repeat(25_000);
        let df = df!["note" => [huge.as_str()]].unwrap();
        let plan = plan_summary_prompt(&ComposerPolicy::default(), "q", "SELECT note", &df).unwrap();
        assert_eq!(plan.variant, PromptVariant::QuestionOnly);
        assert!(!plan.prompt.contains(&huge));
    }

    #[test]
    fn test_plan_unprocessable() {
        let question = "q".repeat(30_000);
        let err = plan_summary_prompt(&ComposerPolicy::default(), &question, "SELECT n", &numbers(1)).unwrap_err();
        assert!(matches!(err, ChatError::UnprocessableResponseSize { limit: 5000, .. }));
    }

    #[test]
    fn test_plan_mentions_nationalities() {
        let plan = plan_summary_prompt(
            &ComposerPolicy::default(),
            "q",
            "SELECT Nationalite, COUNT(*) FROM VPatientAI GROUP BY Nationalite",
            &numbers(2),
        )
        .unwrap();
        assert!(plan.prompt.contains("List every nationality"));
    }

    #[test]
    fn test_download_file_name() {
        let now = Local::now();
        let name = download_file_name(now);
        assert_eq!(name, format!("query_results_{}.csv", now.format("%Y%m%d_%H%M%S")));
        assert_eq!(name.len(), "query_results_20240101_120000.csv".len());
    }

    #[tokio::test]
    async fn test_zero_rows() {
        let llm = ScriptedLlm::ok("unused");
        let bucket = TokenBucket::new(30_000);
        let df = DataFrame::empty();
        let reply = composer()
            .compose(&llm, &bucket, "q", "SELECT 1", &df, &no_chart(), "USD")
            .await
            .unwrap();
        assert_eq!(reply.text, "The query returned no results. (Currency: USD)");
        assert_eq!(llm.calls(), 0);
        assert!(reply.artifact().is_empty());
    }

    #[tokio::test]
    async fn test_hundred_rows_inline() {
        let llm = ScriptedLlm::ok("There are 100 values.");
        let bucket = TokenBucket::new(30_000);
        let reply = composer()
            .compose(&llm, &bucket, "q", "SELECT n", &numbers(100), &no_chart(), "EUR")
            .await
            .unwrap();
        assert_eq!(reply.text, "There are 100 values. (Currency: EUR)");
        assert_eq!(reply.table.as_ref().map(|t| t.height()), Some(100));
        assert!(reply.download.is_none());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_hundred_and_one_rows_download() {
        let llm = ScriptedLlm::ok("unused");
        let bucket = TokenBucket::new(30_000);
        let reply = composer()
            .compose(&llm, &bucket, "q", "SELECT n", &numbers(101), &no_chart(), "EUR")
            .await
            .unwrap();
        assert!(reply.text.contains("101 rows"));
        assert!(reply.table.is_none());
        assert_eq!(llm.calls(), 0);

        let download = reply.download.unwrap();
        assert!(download.name.starts_with("query_results_"));
        assert!(download.name.ends_with(".csv"));
        let csv = String::from_utf8(download.bytes).unwrap();
        assert_eq!(csv.lines().count(), 102);
    }

    #[tokio::test]
    async fn test_currency_symbols_stripped() {
        let llm = ScriptedLlm::ok("Revenue reached 1 200,50 € in March.");
        let bucket = TokenBucket::new(30_000);
        let reply = composer()
            .compose(&llm, &bucket, "q", "SELECT n", &numbers(1), &no_chart(), "EUR")
            .await
            .unwrap();
        assert_eq!(reply.text, "Revenue reached 1 200,50 in March. (Currency: EUR)");
    }

    #[tokio::test]
    async fn test_chart_rendered_when_required() {
        let llm = ScriptedLlm::ok("Cardiology leads.");
        let bucket = TokenBucket::new(30_000);
        let df = df!["service" => ["Cardio", "Pédiatrie"], "patients" => [12i64, 7]].unwrap();
        let extraction = SqlExtraction {
            sql: "SELECT service, patients FROM t".to_string(),
            chart_required: true,
            chart_type: Some("Camembert".to_string()),
        };
        let reply = composer()
            .compose(&llm, &bucket, "q", &extraction.sql, &df, &extraction, "TND")
            .await
            .unwrap();
        assert_eq!(reply.chart.map(|c| c.kind), Some(ChartKind::Pie));
    }

    #[tokio::test]
    async fn test_chart_failure_becomes_note() {
        let llm = ScriptedLlm::ok("Only one column.");
        let bucket = TokenBucket::new(30_000);
        let extraction = SqlExtraction {
            sql: "SELECT n FROM t".to_string(),
            chart_required: true,
            chart_type: Some("pie".to_string()),
        };
        let reply = composer()
            .compose(&llm, &bucket, "q", "SELECT n", &numbers(3), &extraction, "TND")
            .await
            .unwrap();
        assert!(reply.chart.is_none());
        assert!(reply.text.ends_with("Note: the requested chart could not be generated."));
        assert!(reply.table.is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_is_translated() {
        let llm = ScriptedLlm::failing("Rate limit reached. Please try again in 0m30s");
        let bucket = TokenBucket::new(30_000);
        let err = composer()
            .compose(&llm, &bucket, "q", "SELECT n", &numbers(2), &no_chart(), "USD")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RateLimited { wait } if wait.as_secs() == 30));
    }

    #[test]
    fn test_follow_up_visualization() {
        let df = df!["mois" => ["01", "02"], "ca" => [10.0f64, 12.5]].unwrap();
        let reply = composer().compose_visualization("courbe", &df, "TND").unwrap();
        assert_eq!(reply.chart.map(|c| c.kind), Some(ChartKind::Line));
        assert_eq!(reply.text, "Here is the visualization as courbe. (Currency: TND)");

        let err = composer().compose_visualization("xyzzy", &df, "TND").unwrap_err();
        assert!(matches!(err, ChatError::UnresolvedChartType(_)));
    }
}
