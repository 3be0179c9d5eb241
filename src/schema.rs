//! View schema description for the SQL-generation prompt
//!
//! Column types come from a [`SchemaInspector`] (the live database), column
//! meaning comes from a [`ColumnCatalog`]. The two are merged into a
//! [`SchemaDescription`] that the prompt builder renders.

use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const BUILTIN_CATALOG: &str = include_str!("../assets/column_catalog.json");
const BUILTIN_VIEW_SQL: &str = include_str!("../assets/vpatient_ai.sql");

/// Column as reported by the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Column as shown to the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub view: String,
    pub columns: Vec<ColumnDescription>,
}

impl SchemaDescription {
    /// One line per column: `- Name (type): description`
    pub fn render(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let mut line = format!("- {}", c.name);
                if let Some(t) = &c.data_type {
                    line.push_str(&format!(" ({})", t));
                }
                if let Some(d) = &c.description {
                    line.push_str(&format!(": {}", d));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Column name → human description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnCatalog {
    entries: BTreeMap<String, String>,
}

impl ColumnCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!(
                "Failed to read column catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        let catalog = Self::from_json(&content)?;
        info!("Loaded {} column descriptions from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup; the database may fold identifiers
    pub fn describe(&self, column: &str) -> Option<&str> {
        self.entries
            .get(column)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map(|(_, d)| d)
            })
            .map(String::as_str)
    }

    /// Merge inspected columns with descriptions. With no inspected columns
    /// the catalog itself becomes the column list.
    pub fn merge(&self, view: &str, inspected: &[ColumnInfo]) -> SchemaDescription {
        let columns = if inspected.is_empty() {
            self.entries
                .iter()
                .map(|(name, description)| ColumnDescription {
                    name: name.clone(),
                    data_type: None,
                    description: Some(description.clone()),
                })
                .collect()
        } else {
            inspected
                .iter()
                .map(|col| ColumnDescription {
                    name: col.name.clone(),
                    data_type: Some(col.data_type.clone()),
                    description: self.describe(&col.name).map(str::to_string),
                })
                .collect()
        };

        SchemaDescription {
            view: view.to_string(),
            columns,
        }
    }
}

/// Logical view the LLM queries, with the SQL that defines it
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub name: String,
    pub schema: String,
    pub body: String,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, schema: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            body: body.into(),
        }
    }

    /// The patient view shipped with the crate
    pub fn builtin(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, schema, BUILTIN_VIEW_SQL.trim())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[async_trait]
pub trait SchemaInspector: Send + Sync {
    async fn describe_view(&self, view: &str, schema: &str) -> Result<Vec<ColumnInfo>>;
}

/// Inspect the view, degrading to an empty column list on failure
pub async fn inspect_view(
    inspector: &dyn SchemaInspector,
    catalog: &ColumnCatalog,
    view: &ViewDefinition,
) -> SchemaDescription {
    let inspected = match inspector.describe_view(&view.name, &view.schema).await {
        Ok(columns) => columns,
        Err(e) => {
            warn!("Failed to inspect view {}: {}", view.qualified_name(), e);
            Vec::new()
        }
    };
    catalog.merge(&view.name, &inspected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = ColumnCatalog::builtin().unwrap();
        assert!(!catalog.is_empty());
        assert_eq!(
            catalog.describe("sex"),
            Some("Patient sex (1 for male, 0 for female)")
        );
    }

    #[test]
    fn test_lookup_ignores_case() {
        let catalog = ColumnCatalog::from_json(r#"{"Nationalite": "Nationality"}"#).unwrap();
        assert_eq!(catalog.describe("nationalite"), Some("Nationality"));
        assert_eq!(catalog.describe("unknown"), None);
    }

    #[test]
    fn test_merge_keeps_inspected_order() {
        let catalog = ColumnCatalog::from_json(r#"{"DatNai": "Date of birth"}"#).unwrap();
        let inspected = vec![
            ColumnInfo { name: "nompatient".to_string(), data_type: "text".to_string() },
            ColumnInfo { name: "datnai".to_string(), data_type: "date".to_string() },
        ];
        let schema = catalog.merge("VPatientAI", &inspected);
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.columns[0].description, None);
        assert_eq!(schema.columns[1].description.as_deref(), Some("Date of birth"));
        assert_eq!(schema.render(), "- nompatient (text)\n- datnai (date): Date of birth");
    }

    #[test]
    fn test_merge_falls_back_to_catalog() {
        let catalog = ColumnCatalog::from_json(r#"{"A": "first", "B": "second"}"#).unwrap();
        let schema = catalog.merge("v", &[]);
        assert_eq!(schema.render(), "- A: first\n- B: second");
    }

    #[test]
    fn test_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"Pays": "Country"}"#).unwrap();
        let catalog = ColumnCatalog::from_file(&path).unwrap();
        assert_eq!(catalog.describe("Pays"), Some("Country"));

        assert!(ColumnCatalog::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_builtin_view_selects_from_base_tables() {
        let view = ViewDefinition::builtin("VPatientAI", "public");
        assert_eq!(view.qualified_name(), "public.VPatientAI");
        assert!(view.body.starts_with("SELECT"));
        assert!(view.body.contains("FROM client"));
    }
}
