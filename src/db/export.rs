//! CSV and SQL-dump rendering of fetched table data.

use std::borrow::Cow;
use std::io;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::Value;

use crate::db::query_builder::Dialect;
use crate::error::{DbError, Result};
use crate::models::ExportResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Sql,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Sql => "sql",
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Sql => "application/sql",
        }
    }
}

fn csv_field(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Header line plus one record per row, quoted only where needed.
pub fn to_csv(columns: &[String], rows: &[Vec<Value>]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(columns).map_err(io::Error::from)?;
    for row in rows {
        writer
            .write_record(row.iter().map(|v| csv_field(v).into_owned()))
            .map_err(io::Error::from)?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DbError::validation(format!("export is not UTF-8: {}", e)))
}

pub fn sql_literal(dialect: Dialect, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => dialect.string_literal(s),
        other => dialect.string_literal(&other.to_string()),
    }
}

/// One `INSERT` statement per row.
pub fn to_sql_dump(
    dialect: Dialect,
    schema: &str,
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> String {
    let target = dialect.qualified_table(schema, table);
    let column_list: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
    let column_list = column_list.join(", ");

    let mut out = format!("-- {} rows from {}\n", rows.len(), target);
    for row in rows {
        let values: Vec<String> = row.iter().map(|v| sql_literal(dialect, v)).collect();
        out.push_str(&format!(
            "INSERT INTO {} ({}) VALUES ({});\n",
            target,
            column_list,
            values.join(", ")
        ));
    }
    out
}

pub fn package(table: &str, format: ExportFormat, payload: &str) -> ExportResult {
    ExportResult {
        filename: format!(
            "{}_{}.{}",
            table,
            Utc::now().format("%Y%m%d_%H%M%S"),
            format.extension()
        ),
        mime_type: format.mime_type().to_string(),
        content: STANDARD.encode(payload.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_doubles_quotes() {
        let columns = vec!["id".to_string(), "note".to_string()];
        let rows = vec![
            vec![json!(1), json!("say \"hi\"")],
            vec![json!(2), Value::Null],
            vec![json!(3), json!("a,b")],
        ];
        assert_eq!(
            to_csv(&columns, &rows).unwrap(),
            "id,note\n1,\"say \"\"hi\"\"\"\n2,\n3,\"a,b\"\n"
        );
    }

    #[test]
    fn test_csv_quotes_line_breaks_and_headers() {
        let columns = vec!["id".to_string(), "first, last".to_string()];
        let rows = vec![vec![json!(true), json!("line one\nline two")], vec![json!(1.5), json!({"k": 1})]];
        assert_eq!(
            to_csv(&columns, &rows).unwrap(),
            "id,\"first, last\"\ntrue,\"line one\nline two\"\n1.5,\"{\"\"k\"\":1}\"\n"
        );
    }

    #[test]
    fn test_sql_dump_escapes_single_quotes() {
        let columns = vec!["id".to_string(), "name".to_string(), "tags".to_string()];
        let rows = vec![vec![json!(1), json!("O'Brien"), json!(["x"])]];
        let dump = to_sql_dump(Dialect::Postgres, "public", "people", &columns, &rows);
        assert!(dump.contains(
            "INSERT INTO \"public\".\"people\" (\"id\", \"name\", \"tags\") \
             VALUES (1, 'O''Brien', '[\"x\"]');"
        ));
    }

    #[test]
    fn test_csv_row_count_matches_rows() {
        let columns = vec!["a".to_string()];
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![json!(i)]).collect();
        let csv = to_csv(&columns, &rows).unwrap();
        assert_eq!(csv.lines().count(), rows.len() + 1);
        assert_eq!(csv.lines().next(), Some("a"));
    }

    #[test]
    fn test_package_is_base64() {
        let result = package("users", ExportFormat::Csv, "id\n1\n");
        assert_eq!(result.mime_type, "text/csv");
        assert!(result.filename.starts_with("users_"));
        assert!(result.filename.ends_with(".csv"));
        assert_eq!(STANDARD.decode(&result.content).unwrap(), b"id\n1\n");
    }
}
