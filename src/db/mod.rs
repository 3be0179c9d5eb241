//! Database access for generated queries
//!
//! Queries are read-only SELECTs produced by the LLM. They run inside a
//! read-only transaction and come back as a polars `DataFrame`.

pub mod connection;
pub mod executor;

pub use connection::{init_pool, DbPool};
pub use executor::PgExecutor;

use crate::error::Result;
use async_trait::async_trait;
use polars::prelude::DataFrame;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn run(&self, query: &str) -> Result<DataFrame>;
}
