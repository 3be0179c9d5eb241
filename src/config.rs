//! Runtime configuration, read from the environment (and `.env`)

use crate::composer::ComposerPolicy;
use crate::error::{ChatError, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_LLM_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_CURRENCY_QUERY: &str = "SELECT Valeur FROM param WHERE code = 'UNITEMONAITAIRE'";

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub database_url: Option<String>,
    pub api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub tokens_per_minute: u32,
    pub composer: ComposerPolicy,
    pub history_limit: usize,
    pub chart_match_threshold: f64,
    pub view_name: String,
    pub view_schema: String,
    pub column_catalog: Option<PathBuf>,
    pub currency_query: String,
    pub default_currency: String,
    pub log_file: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_temperature: 0.2,
            tokens_per_minute: 30_000,
            composer: ComposerPolicy::default(),
            history_limit: 3,
            chart_match_threshold: crate::chart::DEFAULT_MATCH_THRESHOLD,
            view_name: "VPatientAI".to_string(),
            view_schema: "public".to_string(),
            column_catalog: None,
            currency_query: DEFAULT_CURRENCY_QUERY.to_string(),
            default_currency: "USD".to_string(),
            log_file: Some(PathBuf::from("app.log")),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ChatError::Config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        _ => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AssistantConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let composer = ComposerPolicy {
            inline_row_limit: parse("INLINE_ROW_LIMIT", lookup("INLINE_ROW_LIMIT"), d.composer.inline_row_limit)?,
            prompt_sample_rows: parse("PROMPT_SAMPLE_ROWS", lookup("PROMPT_SAMPLE_ROWS"), d.composer.prompt_sample_rows)?,
            max_tokens_per_request: parse(
                "MAX_TOKENS_PER_REQUEST",
                lookup("MAX_TOKENS_PER_REQUEST"),
                d.composer.max_tokens_per_request,
            )?,
            reserved_response_tokens: parse(
                "RESERVED_RESPONSE_TOKENS",
                lookup("RESERVED_RESPONSE_TOKENS"),
                d.composer.reserved_response_tokens,
            )?,
        };

        let log_file = match lookup("DATACHAT_LOG_FILE") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => d.log_file,
        };

        let config = Self {
            database_url: non_empty(lookup("DATABASE_URL")),
            api_key: non_empty(lookup("LLM_API_KEY")).or_else(|| non_empty(lookup("GROQ_API_KEY"))),
            llm_base_url: non_empty(lookup("LLM_BASE_URL")).unwrap_or(d.llm_base_url),
            llm_model: non_empty(lookup("LLM_MODEL")).unwrap_or(d.llm_model),
            llm_temperature: parse("LLM_TEMPERATURE", lookup("LLM_TEMPERATURE"), d.llm_temperature)?,
            tokens_per_minute: parse("TOKENS_PER_MINUTE", lookup("TOKENS_PER_MINUTE"), d.tokens_per_minute)?,
            composer,
            history_limit: parse("CHAT_HISTORY_LIMIT", lookup("CHAT_HISTORY_LIMIT"), d.history_limit)?,
            chart_match_threshold: parse(
                "CHART_MATCH_THRESHOLD",
                lookup("CHART_MATCH_THRESHOLD"),
                d.chart_match_threshold,
            )?,
            view_name: non_empty(lookup("VIEW_NAME")).unwrap_or(d.view_name),
            view_schema: non_empty(lookup("VIEW_SCHEMA")).unwrap_or(d.view_schema),
            column_catalog: non_empty(lookup("COLUMN_CATALOG")).map(PathBuf::from),
            currency_query: non_empty(lookup("CURRENCY_QUERY")).unwrap_or(d.currency_query),
            default_currency: non_empty(lookup("DEFAULT_CURRENCY")).unwrap_or(d.default_currency),
            log_file,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens_per_minute == 0 {
            return Err(ChatError::Config("TOKENS_PER_MINUTE must be positive".to_string()));
        }
        if !(0.0..=100.0).contains(&self.chart_match_threshold) {
            return Err(ChatError::Config(
                "CHART_MATCH_THRESHOLD must be between 0 and 100".to_string(),
            ));
        }
        if self.composer.max_tokens_per_request == 0 {
            return Err(ChatError::Config("MAX_TOKENS_PER_REQUEST must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AssistantConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AssistantConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.tokens_per_minute, 30_000);
        assert_eq!(config.composer, ComposerPolicy::default());
        assert_eq!(config.history_limit, 3);
        assert_eq!(config.view_name, "VPatientAI");
        assert_eq!(config.llm_model, "llama3-8b-8192");
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.log_file, Some(PathBuf::from("app.log")));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TOKENS_PER_MINUTE", "6000"),
            ("INLINE_ROW_LIMIT", "50"),
            ("GROQ_API_KEY", "gsk-test"),
            ("VIEW_SCHEMA", "clinic"),
            ("DATACHAT_LOG_FILE", ""),
        ])
        .unwrap();
        assert_eq!(config.tokens_per_minute, 6000);
        assert_eq!(config.composer.inline_row_limit, 50);
        assert_eq!(config.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.view_schema, "clinic");
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_llm_api_key_wins_over_groq_key() {
        let config = config_from(&[("LLM_API_KEY", "primary"), ("GROQ_API_KEY", "fallback")]).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("TOKENS_PER_MINUTE", "lots")]),
            Err(ChatError::Config(_))
        ));
        assert!(config_from(&[("TOKENS_PER_MINUTE", "0")]).is_err());
        assert!(config_from(&[("CHART_MATCH_THRESHOLD", "120")]).is_err());
    }
}
