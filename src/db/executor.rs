use crate::db::SqlExecutor;
use crate::error::{ChatError, Result};
use crate::schema::{ColumnInfo, SchemaInspector};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use polars::prelude::*;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Decimal;
use sqlx::{Column as _, Row, TypeInfo};
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Runs generated SQL against PostgreSQL
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sql_error(e: sqlx::Error) -> ChatError {
    ChatError::SqlExecution(e.to_string())
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn run(&self, query: &str) -> Result<DataFrame> {
        debug!("Executing SQL: {}", query);
        let mut tx = self.pool.begin().await.map_err(sql_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;

        let rows = match sqlx::query(query).fetch_all(&mut *tx).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("SQL execution failed: {}", e);
                return Err(sql_error(e));
            }
        };
        tx.rollback().await.map_err(sql_error)?;

        let frame = rows_to_dataframe(&rows)?;
        info!("📊 Query returned {} rows x {} columns", frame.height(), frame.width());
        Ok(frame)
    }
}

#[async_trait]
impl SchemaInspector for PgExecutor {
    async fn describe_view(&self, view: &str, schema: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name, data_type::text AS data_type
            FROM information_schema.columns
            WHERE lower(table_schema) = lower($1) AND lower(table_name) = lower($2)
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(view)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatError::Database(e.to_string()))?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| ChatError::Database(e.to_string()))?;

        debug!("Schema for {}.{}: {} columns", schema, view, columns.len());
        Ok(columns)
    }
}

fn decode<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn column_series(rows: &[PgRow], idx: usize, name: &str, type_name: &str) -> Series {
    match type_name {
        "INT2" => Series::new(
            name,
            rows.iter().map(|r| decode::<i16>(r, idx).map(i64::from)).collect::<Vec<_>>(),
        ),
        "INT4" => Series::new(
            name,
            rows.iter().map(|r| decode::<i32>(r, idx).map(i64::from)).collect::<Vec<_>>(),
        ),
        "INT8" => Series::new(name, rows.iter().map(|r| decode::<i64>(r, idx)).collect::<Vec<_>>()),
        "FLOAT4" => Series::new(
            name,
            rows.iter().map(|r| decode::<f32>(r, idx).map(f64::from)).collect::<Vec<_>>(),
        ),
        "FLOAT8" => Series::new(name, rows.iter().map(|r| decode::<f64>(r, idx)).collect::<Vec<_>>()),
        "NUMERIC" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<Decimal>(r, idx).and_then(|d| d.to_string().parse::<f64>().ok()))
                .collect::<Vec<_>>(),
        ),
        "BOOL" => Series::new(name, rows.iter().map(|r| decode::<bool>(r, idx)).collect::<Vec<_>>()),
        "DATE" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<NaiveDate>(r, idx).map(|d| d.to_string()))
                .collect::<Vec<_>>(),
        ),
        "TIMESTAMP" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<NaiveDateTime>(r, idx).map(|d| d.to_string()))
                .collect::<Vec<_>>(),
        ),
        "TIMESTAMPTZ" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<DateTime<Utc>>(r, idx).map(|d| d.to_rfc3339()))
                .collect::<Vec<_>>(),
        ),
        "TIME" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<NaiveTime>(r, idx).map(|t| t.to_string()))
                .collect::<Vec<_>>(),
        ),
        "UUID" => Series::new(
            name,
            rows.iter()
                .map(|r| decode::<uuid::Uuid>(r, idx).map(|u| u.to_string()))
                .collect::<Vec<_>>(),
        ),
        _ => Series::new(name, rows.iter().map(|r| decode::<String>(r, idx)).collect::<Vec<_>>()),
    }
}

/// Suffix repeated column names so the frame stays valid (`count`, `count_1`)
fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Column-wise conversion of Postgres rows; undecodable values become null
pub fn rows_to_dataframe(rows: &[PgRow]) -> Result<DataFrame> {
    let first = match rows.first() {
        Some(row) => row,
        None => return Ok(DataFrame::empty()),
    };

    let names = unique_names(first.columns().iter().map(|c| c.name().to_string()).collect());
    let series = first
        .columns()
        .iter()
        .zip(names.iter())
        .map(|(col, name)| column_series(rows, col.ordinal(), name, col.type_info().name()))
        .collect::<Vec<_>>();

    Ok(DataFrame::new(series)?)
}
