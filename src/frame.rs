//! Result Frame Helpers - conversions of query results for prompts, charts and downloads

use crate::error::{ChatError, Result};
use polars::prelude::*;
use serde_json::Value;

/// Column names of a frame, owned
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

/// Convert every row of a DataFrame into a JSON object keyed by column name
pub fn dataframe_to_records(df: &DataFrame) -> Result<Vec<Value>> {
    let columns = column_names(df);
    let mut rows = Vec::with_capacity(df.height());

    for row_idx in 0..df.height() {
        let mut row = serde_json::Map::new();
        for col_name in &columns {
            let series = df.column(col_name)?;
            row.insert(col_name.clone(), series_to_json_value(series, row_idx)?);
        }
        rows.push(Value::Object(row));
    }

    Ok(rows)
}

/// Serialize the first `max_rows` rows as a compact JSON array for an LLM prompt
pub fn records_for_prompt(df: &DataFrame, max_rows: usize) -> Result<String> {
    let head = df.head(Some(max_rows));
    let records = dataframe_to_records(&head)?;
    Ok(serde_json::to_string(&records)?)
}

/// Full result as CSV bytes, header included
pub fn to_csv_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut df = df.clone();
    let mut buffer: Vec<u8> = Vec::new();
    CsvWriter::new(&mut buffer)
        .include_header(true)
        .finish(&mut df)?;
    Ok(buffer)
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| ChatError::Polars(format!("Failed to get value: {}", e)))?;

    Ok(match any_val {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::Number(i.into()),
        AnyValue::Int16(i) => Value::Number(i.into()),
        AnyValue::Int32(i) => Value::Number(i.into()),
        AnyValue::Int64(i) => Value::Number(i.into()),
        AnyValue::UInt8(u) => Value::Number(u.into()),
        AnyValue::UInt16(u) => Value::Number(u.into()),
        AnyValue::UInt32(u) => Value::Number(u.into()),
        AnyValue::UInt64(u) => Value::Number(u.into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_keep_types_and_nulls() {
        let df = df![
            "service" => ["Cardiologie", "Pédiatrie"],
            "patients" => [Some(12i64), None],
            "ca" => [1500.5f64, 320.0]
        ]
        .unwrap();

        let records = dataframe_to_records(&df).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["service"], "Cardiologie");
        assert_eq!(records[0]["patients"], 12);
        assert_eq!(records[1]["patients"], Value::Null);
        assert_eq!(records[0]["ca"], 1500.5);
    }

    #[test]
    fn test_records_for_prompt_truncates() {
        let df = df!["n" => [1i64, 2, 3, 4]].unwrap();
        assert_eq!(records_for_prompt(&df, 2).unwrap(), r#"[{"n":1},{"n":2}]"#);
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let df = df!["nationalite" => ["TN", "FR"], "total" => [3i64, 1]].unwrap();
        let csv = String::from_utf8(to_csv_bytes(&df).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["nationalite,total", "TN,3", "FR,1"]);
    }
}
