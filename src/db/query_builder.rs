//! SQL text construction shared by the dialect adapters.
//!
//! Identifiers always go through [`Dialect::quote_identifier`]; values are
//! only ever emitted as placeholders and collected into a parameter list.
//! Postgres placeholders are numbered (`$1`, `$2`, ...) from a running index
//! owned by the caller so later clauses can continue the sequence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DbError, Result};
use crate::models::{
    ColumnInfo, CreateTableOptions, DeleteTableOptions, Filter, FilterOperator, SortDirection,
    SortRule, TableDataOptions,
};

/// Column name to declared SQL type, used for Postgres placeholder casts.
pub type ColumnTypes = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Self::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Self::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    pub fn qualified_table(self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            self.quote_identifier(table)
        } else {
            format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            )
        }
    }

    /// Placeholder for the parameter at 1-based `index`. Postgres appends
    /// `::cast` when a column type is known; MySQL ignores both.
    pub fn placeholder(self, index: usize, cast: Option<&str>) -> String {
        match self {
            Self::Postgres => match cast {
                Some(ty) => format!("${}::{}", index, ty),
                None => format!("${}", index),
            },
            Self::MySql => "?".to_string(),
        }
    }

    fn text_expr(self, column_sql: &str) -> String {
        match self {
            Self::Postgres => format!("{}::text", column_sql),
            Self::MySql => column_sql.to_string(),
        }
    }

    pub fn string_literal(self, value: &str) -> String {
        let escaped = match self {
            Self::Postgres => value.replace('\'', "''"),
            Self::MySql => value.replace('\\', "\\\\").replace('\'', "''"),
        };
        format!("'{}'", escaped)
    }
}

pub fn column_types(columns: &[ColumnInfo]) -> ColumnTypes {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.data_type.clone()))
        .collect()
}

/// Builds ` WHERE ...` from `filters`, or an empty string when no condition
/// survives. Bound values are appended to `params`; `next_index` is advanced
/// once per placeholder.
pub fn build_where_clause(
    dialect: Dialect,
    filters: &[Filter],
    column_types: &ColumnTypes,
    params: &mut Vec<Value>,
    next_index: &mut usize,
) -> Result<String> {
    let mut conditions = Vec::with_capacity(filters.len());

    for filter in filters {
        let column = dialect.quote_identifier(&filter.column);
        let cast = column_types.get(&filter.column).map(String::as_str);

        let condition = match filter.operator {
            FilterOperator::In | FilterOperator::NotIn => {
                let values = match &filter.value {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                if values.is_empty() {
                    continue;
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    placeholders.push(dialect.placeholder(*next_index, cast));
                    *next_index += 1;
                    params.push(value);
                }
                format!(
                    "{} {} ({})",
                    column,
                    filter.operator.as_sql(),
                    placeholders.join(", ")
                )
            }
            FilterOperator::Is => format!("{} IS {}", column, is_literal(&filter.value)?),
            FilterOperator::Like | FilterOperator::NotLike => {
                let placeholder = dialect.placeholder(*next_index, None);
                *next_index += 1;
                params.push(filter.value.clone());
                format!(
                    "{} {} {}",
                    dialect.text_expr(&column),
                    filter.operator.as_sql(),
                    placeholder
                )
            }
            op => {
                let placeholder = dialect.placeholder(*next_index, cast);
                *next_index += 1;
                params.push(filter.value.clone());
                format!("{} {} {}", column, op.as_sql(), placeholder)
            }
        };
        conditions.push(condition);
    }

    if conditions.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }
}

fn is_literal(value: &Value) -> Result<&'static str> {
    match value {
        Value::Null => Ok("NULL"),
        Value::Bool(true) => Ok("TRUE"),
        Value::Bool(false) => Ok("FALSE"),
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "NULL" => Ok("NULL"),
            "NOT NULL" => Ok("NOT NULL"),
            "TRUE" => Ok("TRUE"),
            "FALSE" => Ok("FALSE"),
            _ => Err(DbError::validation(format!(
                "unsupported IS operand '{}'",
                s
            ))),
        },
        other => Err(DbError::validation(format!(
            "unsupported IS operand {}",
            other
        ))),
    }
}

pub fn build_order_by(dialect: Dialect, sort_rules: &[SortRule]) -> String {
    if sort_rules.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = sort_rules
        .iter()
        .map(|rule| {
            let direction = match rule.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {}", dialect.quote_identifier(&rule.column), direction)
        })
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

pub fn build_limit_offset(dialect: Dialect, limit: Option<u64>, offset: Option<u64>) -> String {
    match (limit, offset) {
        (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => format!(" LIMIT {}", limit),
        (None, Some(offset)) => match dialect {
            Dialect::Postgres => format!(" OFFSET {}", offset),
            // MySQL has no OFFSET without LIMIT
            Dialect::MySql => format!(" LIMIT {} OFFSET {}", u64::MAX, offset),
        },
        (None, None) => String::new(),
    }
}

/// A data query and its matching row count query over the same filters.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub sql: String,
    pub count_sql: String,
    pub params: Vec<Value>,
}

pub fn build_table_select(
    dialect: Dialect,
    options: &TableDataOptions,
    column_types: &ColumnTypes,
) -> Result<SelectStatement> {
    let table = dialect.qualified_table(&options.schema, &options.table);
    let mut params = Vec::new();
    let mut next_index = 1;
    let where_sql = build_where_clause(
        dialect,
        &options.filters,
        column_types,
        &mut params,
        &mut next_index,
    )?;
    let order_sql = build_order_by(dialect, &options.sort_rules);
    let page_sql = build_limit_offset(dialect, options.limit, options.offset);

    Ok(SelectStatement {
        sql: format!("SELECT * FROM {}{}{}{}", table, where_sql, order_sql, page_sql),
        count_sql: format!("SELECT COUNT(*) AS total FROM {}{}", table, where_sql),
        params,
    })
}

pub fn wrap_count_query(sql: &str) -> String {
    format!("SELECT COUNT(*) AS total FROM (\n{}\n) AS sqldesk_count", sql)
}

pub fn wrap_page_query(dialect: Dialect, sql: &str, limit: u64, offset: u64) -> String {
    format!(
        "SELECT * FROM (\n{}\n) AS sqldesk_page{}",
        sql,
        build_limit_offset(dialect, Some(limit), Some(offset))
    )
}

/// Primary-key columns in declaration order; fails when there are none.
pub fn require_primary_key<'a>(
    schema: &str,
    table: &str,
    columns: &'a [ColumnInfo],
) -> Result<Vec<&'a ColumnInfo>> {
    let keys: Vec<&ColumnInfo> = columns.iter().filter(|c| c.is_primary_key).collect();
    if keys.is_empty() {
        return Err(DbError::validation(format!(
            "table {}.{} has no primary key; row mutations are not allowed",
            schema, table
        )));
    }
    Ok(keys)
}

/// Values of `keys` taken from `row`, in key order.
pub fn key_values(row: &Map<String, Value>, keys: &[&ColumnInfo]) -> Result<Vec<Value>> {
    keys.iter()
        .map(|key| {
            row.get(&key.name).cloned().ok_or_else(|| {
                DbError::validation(format!(
                    "row is missing primary key column '{}'",
                    key.name
                ))
            })
        })
        .collect()
}

fn key_conditions(dialect: Dialect, keys: &[&ColumnInfo], next_index: &mut usize) -> String {
    keys.iter()
        .map(|key| {
            let condition = format!(
                "{} = {}",
                dialect.quote_identifier(&key.name),
                dialect.placeholder(*next_index, Some(key.data_type.as_str()))
            );
            *next_index += 1;
            condition
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `UPDATE ... SET column = <p1> WHERE key = <p2> AND ...`
pub fn build_update_cell(
    dialect: Dialect,
    schema: &str,
    table: &str,
    column: &ColumnInfo,
    keys: &[&ColumnInfo],
) -> String {
    let set = format!(
        "{} = {}",
        dialect.quote_identifier(&column.name),
        dialect.placeholder(1, Some(column.data_type.as_str()))
    );
    let mut next_index = 2;
    format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.qualified_table(schema, table),
        set,
        key_conditions(dialect, keys, &mut next_index)
    )
}

/// `DELETE FROM ... WHERE key = <p1> AND ...`
pub fn build_delete_row(dialect: Dialect, schema: &str, table: &str, keys: &[&ColumnInfo]) -> String {
    let mut next_index = 1;
    format!(
        "DELETE FROM {} WHERE {}",
        dialect.qualified_table(schema, table),
        key_conditions(dialect, keys, &mut next_index)
    )
}

pub fn build_insert_row(
    dialect: Dialect,
    schema: &str,
    table: &str,
    columns: &[&ColumnInfo],
) -> String {
    let names: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_identifier(&c.name))
        .collect();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| dialect.placeholder(i + 1, Some(c.data_type.as_str())))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.qualified_table(schema, table),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Raw SQL fragments (types, defaults) are spliced into DDL verbatim, so
/// anything that could end or comment out the statement is rejected.
fn check_fragment(what: &str, fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(DbError::validation(format!("{} must not be empty", what)));
    }
    if fragment.contains(';') || fragment.contains("--") || fragment.contains("/*") {
        return Err(DbError::validation(format!(
            "{} contains forbidden characters: {}",
            what, fragment
        )));
    }
    Ok(())
}

pub fn build_create_table(dialect: Dialect, options: &CreateTableOptions) -> Result<String> {
    if options.columns.is_empty() {
        return Err(DbError::validation(
            "a table needs at least one column",
        ));
    }
    if options.table.trim().is_empty() {
        return Err(DbError::validation("table name must not be empty"));
    }

    let mut lines = Vec::with_capacity(options.columns.len() + 1);
    for column in &options.columns {
        if column.name.trim().is_empty() {
            return Err(DbError::validation("column name must not be empty"));
        }
        check_fragment(&format!("type of column '{}'", column.name), &column.data_type)?;

        let mut line = format!(
            "{} {}",
            dialect.quote_identifier(&column.name),
            column.data_type.trim()
        );
        if !column.nullable {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            check_fragment(&format!("default of column '{}'", column.name), default)?;
            line.push_str(" DEFAULT ");
            line.push_str(default.trim());
        }
        if column.unique {
            line.push_str(" UNIQUE");
        }
        if let Some(fk) = &column.foreign_key {
            let schema = fk.schema.as_deref().unwrap_or(&options.schema);
            line.push_str(&format!(
                " REFERENCES {} ({})",
                dialect.qualified_table(schema, &fk.table),
                dialect.quote_identifier(&fk.column)
            ));
            if let Some(action) = fk.on_delete {
                line.push_str(" ON DELETE ");
                line.push_str(action.as_sql());
            }
            if let Some(action) = fk.on_update {
                line.push_str(" ON UPDATE ");
                line.push_str(action.as_sql());
            }
        }
        lines.push(line);
    }

    if !options.primary_key.is_empty() {
        for key in &options.primary_key {
            if !options.columns.iter().any(|c| &c.name == key) {
                return Err(DbError::validation(format!(
                    "primary key column '{}' is not defined",
                    key
                )));
            }
        }
        let keys: Vec<String> = options
            .primary_key
            .iter()
            .map(|k| dialect.quote_identifier(k))
            .collect();
        lines.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} (\n  {}\n)",
        dialect.qualified_table(&options.schema, &options.table),
        lines.join(",\n  ")
    ))
}

pub fn build_drop_table(dialect: Dialect, options: &DeleteTableOptions) -> String {
    let mut sql = format!(
        "DROP TABLE {}",
        dialect.qualified_table(&options.schema, &options.table)
    );
    if options.cascade {
        sql.push_str(" CASCADE");
    }
    sql
}
