//! datachat: natural-language questions over a clinic database.
//!
//! An LLM turns each question into a read-only SELECT against a single
//! logical view, the result is executed, sized and summarized, and charts
//! are resolved from loose descriptions ("camembert", "scatter plot").

pub mod assistant;
pub mod chart;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod currency;
pub mod db;
pub mod error;
pub mod frame;
pub mod llm;
pub mod prompt;
pub mod rate_limiter;
pub mod schema;
pub mod session;
pub mod telemetry;

pub use assistant::Assistant;
pub use chart::{Chart, ChartKind, ChartTypeResolver};
pub use classifier::{RequestClassifier, RequestKind};
pub use composer::{ComposerPolicy, Reply, ResponseComposer};
pub use config::AssistantConfig;
pub use db::{PgExecutor, SqlExecutor};
pub use error::{ChatError, Result};
pub use llm::{LanguageModel, LlmClient};
pub use rate_limiter::{throttled, TokenBucket};
pub use schema::{ColumnCatalog, SchemaInspector, ViewDefinition};
pub use session::{Conversation, Session, SessionStore, Turn};
