//! Currency of the clinic database and cleanup of LLM amounts

use crate::db::SqlExecutor;
use crate::frame::dataframe_to_records;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("EUR", "€"),
    ("USD", "$"),
    ("GBP", "£"),
    ("JPY", "¥"),
    ("CHF", "CHF"),
    ("TND", "TND"),
];

lazy_static! {
    /// An amount (1 234,56 style grouping allowed) followed by a known symbol
    static ref AMOUNT_WITH_SYMBOL: Regex = {
        let symbols = CURRENCY_SYMBOLS
            .iter()
            .map(|(_, s)| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(
            r"(\d{{1,3}}(?:[ \u{{202F}}]\d{{3}})*(?:,\d{{2}})?)\s*(?:{})",
            symbols
        ))
        .unwrap()
    };
}

/// Symbol for a currency code; unknown codes stand for themselves
pub fn currency_symbol(code: &str) -> String {
    let upper = code.to_uppercase();
    CURRENCY_SYMBOLS
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, s)| s.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Drop currency symbols that follow an amount
pub fn remove_currency_symbols(text: &str) -> String {
    AMOUNT_WITH_SYMBOL.replace_all(text, "$1").into_owned()
}

/// Read the database-wide currency code, falling back to `default`
pub async fn fetch_currency(executor: &dyn SqlExecutor, query: &str, default: &str) -> String {
    let frame = match executor.run(query).await {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to read the currency, using {}: {}", default, e);
            return default.to_string();
        }
    };

    let first = dataframe_to_records(&frame.head(Some(1)))
        .ok()
        .and_then(|rows| rows.into_iter().next())
        .and_then(|row| match row {
            Value::Object(map) => map.into_iter().next().map(|(_, v)| v),
            _ => None,
        });

    match first {
        Some(Value::String(code)) if !code.trim().is_empty() => {
            let code = code.trim().to_string();
            info!("💱 Database currency: {}", code);
            code
        }
        _ => {
            warn!("No currency configured, using {}", default);
            default.to_string()
        }
    }
}
