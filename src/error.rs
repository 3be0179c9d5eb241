use crate::chart::ChartKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid generated query: {0}")]
    InvalidGeneratedQuery(String),

    #[error("SQL execution error: {0}")]
    SqlExecution(String),

    #[error("Prompt needs {needed} tokens, limit is {limit}")]
    UnprocessableResponseSize { needed: usize, limit: usize },

    #[error("Rate limited, retry in {}s", .wait.as_secs())]
    RateLimited { wait: Duration },

    #[error("Unresolved chart type: {0}")]
    UnresolvedChartType(String),

    #[error("Cannot build {kind} chart: {reason}")]
    ChartShapeMismatch { kind: ChartKind, reason: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Token request of {requested} exceeds bucket capacity {capacity}")]
    TokenBudgetExceeded { requested: u32, capacity: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for ChatError {
    fn from(err: polars::error::PolarsError) -> Self {
        ChatError::Polars(err.to_string())
    }
}

impl ChatError {
    /// Text shown to the end user. Never includes backend or LLM detail.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::InvalidGeneratedQuery(_) => {
                "Sorry, I could not turn that into a valid query. Please rephrase your question."
                    .to_string()
            }
            ChatError::SqlExecution(_) | ChatError::Database(_) => {
                "An error occurred while running the query.".to_string()
            }
            ChatError::UnprocessableResponseSize { .. } | ChatError::TokenBudgetExceeded { .. } => {
                "Sorry, the answer is too large to process.".to_string()
            }
            ChatError::RateLimited { wait } => {
                let secs = wait.as_secs();
                format!(
                    "Sorry, the rate limit has been reached. Please try again in {} minutes and {} seconds.",
                    secs / 60,
                    secs % 60
                )
            }
            ChatError::UnresolvedChartType(_) => {
                "Chart type not recognized. Please name a supported type (line, bar, pie, scatter...)."
                    .to_string()
            }
            ChatError::ChartShapeMismatch { .. } => "Could not build this chart.".to_string(),
            ChatError::Llm(_) => "An error occurred while generating the answer.".to_string(),
            ChatError::Config(_)
            | ChatError::Io(_)
            | ChatError::Json(_)
            | ChatError::Polars(_) => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
