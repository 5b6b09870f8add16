use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, Either, Executor, MySql, Row, TypeInfo};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::PoolSettings;
use crate::db::classifier;
use crate::db::export::{self, ExportFormat};
use crate::db::query_builder::{self, build_table_select, key_values, require_primary_key, Dialect};
use crate::db::{elapsed_ms, query_type, DbAdapter, SqlAdapter};
use crate::error::{wrap, DbError, Result};
use crate::models::{
    ColumnInfo, ConstraintInfo, CreateTableOptions, DeleteRowsOptions, DeleteTableOptions,
    ExportResult, ExportTableOptions, ForeignKeyRef, IndexInfo, InsertRowOptions, MutationResult,
    MySqlOptions, QueryOptions, QueryResult, SchemaWithTables, TableDataOptions, TableInfo,
    UpdateCellOptions,
};

const SYSTEM_SCHEMAS: &str = "('information_schema', 'mysql', 'performance_schema', 'sys')";

// information_schema columns are cast to CHAR so they decode as strings on
// every server version.
const COLUMNS_SQL: &str = r#"
    SELECT
        CAST(c.COLUMN_NAME AS CHAR) AS column_name,
        CAST(c.COLUMN_TYPE AS CHAR) AS data_type,
        CAST(c.IS_NULLABLE AS CHAR) AS is_nullable,
        CAST(c.COLUMN_DEFAULT AS CHAR) AS default_value,
        CAST(c.COLUMN_KEY AS CHAR) AS column_key,
        CAST(k.REFERENCED_TABLE_SCHEMA AS CHAR) AS foreign_schema,
        CAST(k.REFERENCED_TABLE_NAME AS CHAR) AS foreign_table,
        CAST(k.REFERENCED_COLUMN_NAME AS CHAR) AS foreign_column
    FROM information_schema.COLUMNS c
    LEFT JOIN information_schema.KEY_COLUMN_USAGE k
        ON k.TABLE_SCHEMA = c.TABLE_SCHEMA
       AND k.TABLE_NAME = c.TABLE_NAME
       AND k.COLUMN_NAME = c.COLUMN_NAME
       AND k.REFERENCED_TABLE_NAME IS NOT NULL
    WHERE c.TABLE_SCHEMA = ? AND c.TABLE_NAME = ?
    ORDER BY c.ORDINAL_POSITION
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT
        CAST(tc.CONSTRAINT_NAME AS CHAR) AS name,
        CAST(tc.CONSTRAINT_TYPE AS CHAR) AS constraint_type,
        CAST(k.COLUMN_NAME AS CHAR) AS column_name,
        CAST(k.REFERENCED_TABLE_NAME AS CHAR) AS foreign_table,
        CAST(k.REFERENCED_COLUMN_NAME AS CHAR) AS foreign_column
    FROM information_schema.TABLE_CONSTRAINTS tc
    LEFT JOIN information_schema.KEY_COLUMN_USAGE k
        ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
       AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
       AND k.TABLE_SCHEMA = tc.TABLE_SCHEMA
       AND k.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.TABLE_SCHEMA = ? AND tc.TABLE_NAME = ?
    ORDER BY tc.CONSTRAINT_NAME, k.ORDINAL_POSITION
"#;

const INDEXES_SQL: &str = r#"
    SELECT
        CAST(INDEX_NAME AS CHAR) AS index_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(NON_UNIQUE AS SIGNED) AS non_unique
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY INDEX_NAME, SEQ_IN_INDEX
"#;

pub struct MySqlAdapter {
    options: MySqlOptions,
    settings: PoolSettings,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlAdapter {
    pub fn new(options: MySqlOptions, settings: PoolSettings) -> Self {
        Self {
            options,
            settings,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<MySqlPool> {
        self.pool.read().await.clone().ok_or(DbError::NotConnected)
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let o = &self.options;
        let mut opts = MySqlConnectOptions::new()
            .host(&o.host)
            .port(o.port)
            .username(&o.user)
            .database(&o.database)
            .ssl_mode(if o.ssl {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Disabled
            });
        if let Some(password) = &o.password {
            opts = opts.password(password);
        }
        opts
    }

    async fn fetch_columns(&self, pool: &MySqlPool, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch columns"))?;

        let mut columns: Vec<ColumnInfo> = Vec::with_capacity(rows.len());
        for row in &rows {
            let column = read_column(row).map_err(wrap("Failed to read column metadata"))?;
            // a column in several foreign keys appears once per key
            if columns.iter().all(|c| c.name != column.name) {
                columns.push(column);
            }
        }
        Ok(columns)
    }

    async fn fetch_constraints(
        &self,
        pool: &MySqlPool,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ConstraintInfo>> {
        let rows = sqlx::query(CONSTRAINTS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch constraints"))?;

        let mut constraints: Vec<ConstraintInfo> = Vec::new();
        for row in &rows {
            let name: String = row.try_get("name").map_err(wrap("Failed to read constraints"))?;
            let constraint_type: String = row
                .try_get("constraint_type")
                .map_err(wrap("Failed to read constraints"))?;
            let column: Option<String> = row
                .try_get("column_name")
                .map_err(wrap("Failed to read constraints"))?;
            let foreign_table: Option<String> = row
                .try_get("foreign_table")
                .map_err(wrap("Failed to read constraints"))?;
            let foreign_column: Option<String> = row
                .try_get("foreign_column")
                .map_err(wrap("Failed to read constraints"))?;

            let idx = match constraints.iter().position(|c| c.name == name) {
                Some(idx) => idx,
                None => {
                    constraints.push(ConstraintInfo {
                        name,
                        constraint_type,
                        columns: Vec::new(),
                        foreign_table: foreign_table.clone(),
                        foreign_columns: foreign_table.as_ref().map(|_| Vec::new()),
                    });
                    constraints.len() - 1
                }
            };
            let entry = &mut constraints[idx];
            if let Some(column) = column {
                entry.columns.push(column);
            }
            if let (Some(list), Some(column)) = (entry.foreign_columns.as_mut(), foreign_column) {
                list.push(column);
            }
        }
        Ok(constraints)
    }

    async fn fetch_indexes(&self, pool: &MySqlPool, schema: &str, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(INDEXES_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch indexes"))?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name: String = row.try_get("index_name").map_err(wrap("Failed to read indexes"))?;
            let column: Option<String> =
                row.try_get("column_name").map_err(wrap("Failed to read indexes"))?;
            let non_unique: i64 = row.try_get("non_unique").map_err(wrap("Failed to read indexes"))?;

            let idx = match indexes.iter().position(|i| i.name == name) {
                Some(idx) => idx,
                None => {
                    indexes.push(IndexInfo {
                        name,
                        columns: Vec::new(),
                        unique: non_unique == 0,
                    });
                    indexes.len() - 1
                }
            };
            // functional indexes have no column name
            if let Some(column) = column {
                indexes[idx].columns.push(column);
            }
        }
        Ok(indexes)
    }

    async fn select_all(&self, options: &TableDataOptions) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let pool = self.pool().await?;
        let stmt = build_table_select(Dialect::MySql, options, &Default::default())?;
        let rows = bind_params(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&pool)
            .await
            .map_err(wrap("Failed to export table"))?;
        let (mut columns, values) = rows_to_json(&rows);
        if columns.is_empty() {
            columns = self
                .fetch_columns(&pool, &options.schema, &options.table)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
        }
        Ok((columns, values))
    }

    /// Executes every statement on one connection inside a transaction,
    /// rolling back on the first failure.
    async fn in_transaction(
        &self,
        pool: &MySqlPool,
        context: &'static str,
        statements: Vec<(String, Vec<Value>)>,
    ) -> Result<u64> {
        let mut tx = pool.begin().await.map_err(wrap(context))?;
        let mut affected = 0;
        for (sql, binds) in &statements {
            let query = bind_params(sqlx::query(sql), binds);
            match query.execute(&mut *tx).await {
                Ok(result) => affected += result.rows_affected(),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        tracing::warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(DbError::query(context, e));
                }
            }
        }
        tx.commit().await.map_err(wrap(context))?;
        Ok(affected)
    }

    async fn export(&self, options: &ExportTableOptions, format: ExportFormat) -> Result<ExportResult> {
        let data_options = TableDataOptions {
            schema: options.schema.clone(),
            table: options.table.clone(),
            filters: options.filters.clone(),
            sort_rules: options.sort_rules.clone(),
            limit: None,
            offset: None,
        };
        let (columns, rows) = self.select_all(&data_options).await?;
        let payload = match format {
            ExportFormat::Csv => export::to_csv(&columns, &rows)?,
            ExportFormat::Sql => {
                export::to_sql_dump(Dialect::MySql, &options.schema, &options.table, &columns, &rows)
            }
        };
        tracing::debug!(table = %options.table, rows = rows.len(), "Table exported");
        Ok(export::package(&options.table, format, &payload))
    }
}

#[async_trait]
impl DbAdapter for MySqlAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .idle_timeout(self.settings.idle_timeout)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| {
                DbError::connection(
                    format!(
                        "failed to connect to mysql at {}:{}",
                        self.options.host, self.options.port
                    ),
                    e,
                )
            })?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(DbError::connection("connection validation failed", e));
        }

        tracing::info!(
            host = %self.options.host,
            database = %self.options.database,
            "Connected to mysql"
        );
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(host = %self.options.host, "Disconnected from mysql");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn run_query(&self, sql: &str, options: Option<QueryOptions>) -> Result<QueryResult> {
        let pool = self.pool().await?;
        let start = Instant::now();
        let query_type = query_type(sql);

        if let Some(QueryOptions {
            limit: Some(limit),
            offset,
        }) = options
        {
            if classifier::is_selectable_query(sql) {
                let offset = offset.unwrap_or(0);
                let inner = classifier::strip_statement_terminator(sql);
                let count_sql = query_builder::wrap_count_query(inner);
                let page_sql = query_builder::wrap_page_query(Dialect::MySql, inner, limit, offset);

                let (count_row, rows) = tokio::try_join!(
                    pool.fetch_one(count_sql.as_str()),
                    pool.fetch_all(page_sql.as_str()),
                )
                .map_err(wrap("Failed to run query"))?;
                let total: i64 = count_row.try_get(0).map_err(wrap("Failed to run query"))?;

                let (mut columns, values) = rows_to_json(&rows);
                if columns.is_empty() {
                    columns = describe_columns(&pool, &page_sql).await;
                }
                return Ok(QueryResult {
                    columns,
                    row_count: values.len() as u64,
                    rows: values,
                    affected_rows: 0,
                    query_type,
                    execution_time_ms: elapsed_ms(start),
                    total_row_count: Some(total.max(0) as u64),
                    limit: Some(limit),
                    offset: Some(offset),
                });
            }
        }

        let mut rows = Vec::new();
        let mut affected_rows = 0;
        let mut columns = Vec::new();

        // text protocol: accepts statements the server refuses to prepare
        let mut stream = pool.fetch_many(sql);
        while let Some(result) = stream.next().await {
            match result.map_err(wrap("Failed to run query"))? {
                Either::Left(res) => {
                    affected_rows += res.rows_affected();
                }
                Either::Right(row) => {
                    if columns.is_empty() {
                        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    rows.push(row_to_json(&row));
                }
            }
        }

        Ok(QueryResult {
            columns,
            row_count: rows.len() as u64,
            rows,
            affected_rows,
            query_type,
            execution_time_ms: elapsed_ms(start),
            total_row_count: None,
            limit: None,
            offset: None,
        })
    }
}

#[async_trait]
impl SqlAdapter for MySqlAdapter {
    async fn list_schemas(&self) -> Result<Vec<String>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT CAST(SCHEMA_NAME AS CHAR) AS schema_name FROM information_schema.SCHEMATA \
             WHERE SCHEMA_NAME NOT IN {} ORDER BY SCHEMA_NAME",
            SYSTEM_SCHEMAS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&pool)
            .await
            .map_err(wrap("Failed to list schemas"))?;

        rows.iter()
            .map(|row| row.try_get("schema_name"))
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(wrap("Failed to list schemas"))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS table_name FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
        )
        .bind(schema)
        .fetch_all(&pool)
        .await
        .map_err(wrap("Failed to list tables"))?;

        rows.iter()
            .map(|row| row.try_get("table_name"))
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(wrap("Failed to list tables"))
    }

    async fn list_schema_with_tables(&self) -> Result<Vec<SchemaWithTables>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT CAST(s.SCHEMA_NAME AS CHAR) AS schema_name, CAST(t.TABLE_NAME AS CHAR) AS table_name \
             FROM information_schema.SCHEMATA s \
             LEFT JOIN information_schema.TABLES t ON t.TABLE_SCHEMA = s.SCHEMA_NAME \
             WHERE s.SCHEMA_NAME NOT IN {} \
             ORDER BY s.SCHEMA_NAME, t.TABLE_NAME",
            SYSTEM_SCHEMAS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&pool)
            .await
            .map_err(wrap("Failed to list schemas"))?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &rows {
            let schema: String = row.try_get("schema_name").map_err(wrap("Failed to list schemas"))?;
            let table: Option<String> =
                row.try_get("table_name").map_err(wrap("Failed to list schemas"))?;
            let tables = grouped.entry(schema).or_default();
            if let Some(table) = table {
                tables.push(table);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(schema, tables)| SchemaWithTables { schema, tables })
            .collect())
    }

    async fn introspect_table(&self, schema: &str, table: &str) -> Result<TableInfo> {
        let pool = self.pool().await?;
        let (columns, constraints, indexes) = tokio::try_join!(
            self.fetch_columns(&pool, schema, table),
            self.fetch_constraints(&pool, schema, table),
            self.fetch_indexes(&pool, schema, table),
        )?;
        Ok(TableInfo {
            name: table.to_string(),
            schema: schema.to_string(),
            columns,
            constraints,
            indexes,
        })
    }

    async fn fetch_table_data(&self, options: &TableDataOptions) -> Result<QueryResult> {
        let pool = self.pool().await?;
        let start = Instant::now();
        let stmt = build_table_select(Dialect::MySql, options, &Default::default())?;

        let (rows, count_row) = tokio::try_join!(
            bind_params(sqlx::query(&stmt.sql), &stmt.params).fetch_all(&pool),
            bind_params(sqlx::query(&stmt.count_sql), &stmt.params).fetch_one(&pool),
        )
        .map_err(wrap("Failed to fetch table data"))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(wrap("Failed to fetch table data"))?;

        let (mut columns, values) = rows_to_json(&rows);
        if columns.is_empty() {
            columns = describe_columns(&pool, &stmt.sql).await;
        }
        Ok(QueryResult {
            columns,
            row_count: values.len() as u64,
            rows: values,
            affected_rows: 0,
            query_type: "SELECT".to_string(),
            execution_time_ms: elapsed_ms(start),
            total_row_count: Some(total.max(0) as u64),
            limit: options.limit,
            offset: options.offset,
        })
    }

    async fn delete_table_rows(&self, options: &DeleteRowsOptions) -> Result<MutationResult> {
        let pool = self.pool().await?;
        let columns = self.fetch_columns(&pool, &options.schema, &options.table).await?;
        let keys = require_primary_key(&options.schema, &options.table, &columns)?;
        let sql = query_builder::build_delete_row(Dialect::MySql, &options.schema, &options.table, &keys);

        let statements = options
            .rows
            .iter()
            .map(|row| Ok((sql.clone(), key_values(row, &keys)?)))
            .collect::<Result<Vec<_>>>()?;
        if statements.is_empty() {
            return Ok(MutationResult { affected_rows: 0 });
        }

        let affected_rows = self
            .in_transaction(&pool, "Failed to delete rows", statements)
            .await?;
        tracing::debug!(table = %options.table, affected_rows, "Rows deleted");
        Ok(MutationResult { affected_rows })
    }

    async fn update_table_cell(&self, options: &UpdateCellOptions) -> Result<MutationResult> {
        let pool = self.pool().await?;
        let columns = self.fetch_columns(&pool, &options.schema, &options.table).await?;
        let keys = require_primary_key(&options.schema, &options.table, &columns)?;
        let target = columns
            .iter()
            .find(|c| c.name == options.column)
            .ok_or_else(|| DbError::validation(format!("unknown column '{}'", options.column)))?;

        let sql = query_builder::build_update_cell(
            Dialect::MySql,
            &options.schema,
            &options.table,
            target,
            &keys,
        );
        let mut binds = vec![options.value.clone()];
        binds.extend(key_values(&options.row, &keys)?);

        let affected_rows = self
            .in_transaction(&pool, "Failed to update cell", vec![(sql, binds)])
            .await?;
        Ok(MutationResult { affected_rows })
    }

    async fn insert_table_row(&self, options: &InsertRowOptions) -> Result<MutationResult> {
        let pool = self.pool().await?;
        if options.values.is_empty() {
            return Err(DbError::validation("no values supplied for insert"));
        }
        let columns = self.fetch_columns(&pool, &options.schema, &options.table).await?;
        require_primary_key(&options.schema, &options.table, &columns)?;

        let mut targets = Vec::with_capacity(options.values.len());
        let mut binds = Vec::with_capacity(options.values.len());
        for (name, value) in &options.values {
            let column = columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| DbError::validation(format!("unknown column '{}'", name)))?;
            targets.push(column);
            binds.push(value.clone());
        }

        let sql = query_builder::build_insert_row(Dialect::MySql, &options.schema, &options.table, &targets);
        let affected_rows = self
            .in_transaction(&pool, "Failed to insert row", vec![(sql, binds)])
            .await?;
        Ok(MutationResult { affected_rows })
    }

    async fn export_table_as_csv(&self, options: &ExportTableOptions) -> Result<ExportResult> {
        self.export(options, ExportFormat::Csv).await
    }

    async fn export_table_as_sql(&self, options: &ExportTableOptions) -> Result<ExportResult> {
        self.export(options, ExportFormat::Sql).await
    }

    async fn create_table(&self, options: &CreateTableOptions) -> Result<()> {
        let pool = self.pool().await?;
        let sql = query_builder::build_create_table(Dialect::MySql, options)?;
        pool.execute(sql.as_str())
            .await
            .map_err(wrap("Failed to create table"))?;
        tracing::info!(schema = %options.schema, table = %options.table, "Table created");
        Ok(())
    }

    async fn delete_table(&self, options: &DeleteTableOptions) -> Result<()> {
        let pool = self.pool().await?;
        let sql = query_builder::build_drop_table(Dialect::MySql, options);
        pool.execute(sql.as_str())
            .await
            .map_err(wrap("Failed to delete table"))?;
        tracing::info!(schema = %options.schema, table = %options.table, "Table dropped");
        Ok(())
    }
}

fn read_column(row: &MySqlRow) -> std::result::Result<ColumnInfo, sqlx::Error> {
    let data_type: String = row.try_get("data_type")?;
    let is_nullable: String = row.try_get("is_nullable")?;
    let column_key: Option<String> = row.try_get("column_key")?;
    let foreign_table: Option<String> = row.try_get("foreign_table")?;
    let foreign_column: Option<String> = row.try_get("foreign_column")?;
    let foreign_key = match (foreign_table, foreign_column) {
        (Some(table), Some(column)) => Some(ForeignKeyRef {
            schema: row.try_get("foreign_schema")?,
            table,
            column,
        }),
        _ => None,
    };

    Ok(ColumnInfo {
        name: row.try_get("column_name")?,
        enum_values: parse_enum_values(&data_type),
        data_type,
        nullable: is_nullable.eq_ignore_ascii_case("YES"),
        default_value: row.try_get("default_value")?,
        is_primary_key: column_key.as_deref() == Some("PRI"),
        foreign_key,
    })
}

/// Extracts the labels of an `enum('a','b',...)` column type in declaration
/// order without duplicates. Returns `None` for other types and for input
/// that does not parse.
pub fn parse_enum_values(column_type: &str) -> Option<Vec<String>> {
    let trimmed = column_type.trim();
    let prefix = trimmed.get(..5)?;
    if !prefix.eq_ignore_ascii_case("enum(") || !trimmed.ends_with(')') {
        return None;
    }
    let inner = &trimmed[5..trimmed.len() - 1];

    let mut values: Vec<String> = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next()? != '\'' {
            return None;
        }

        let mut label = String::new();
        loop {
            match chars.next()? {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    label.push('\'');
                }
                '\'' => break,
                '\\' => label.push(chars.next()?),
                c => label.push(c),
            }
        }
        if !values.contains(&label) {
            values.push(label);
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }
    Some(values)
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64())
                }
            }
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

async fn describe_columns(pool: &MySqlPool, sql: &str) -> Vec<String> {
    match pool.describe(sql).await {
        Ok(describe) => describe
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Could not describe result columns");
            Vec::new()
        }
    }
}

fn rows_to_json(rows: &[MySqlRow]) -> (Vec<String>, Vec<Vec<Value>>) {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    (columns, rows.iter().map(row_to_json).collect())
}

fn row_to_json(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| map_mysql_value(row, i))
        .collect()
}

fn map_mysql_value(row: &MySqlRow, index: usize) -> Value {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use sqlx::ValueRef;

    let value_ref = match row.try_get_raw(index) {
        Ok(v) => v,
        Err(_) => return Value::Null,
    };
    if value_ref.is_null() {
        return Value::Null;
    }

    let type_info = value_ref.type_info();
    let type_name = type_info.name();

    match type_name {
        "BOOLEAN" => match row.try_get::<bool, _>(index) {
            Ok(v) => Value::Bool(v),
            Err(_) => integer_value(row, index),
        },
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => integer_value(row, index),
        name if name.ends_with("UNSIGNED") => integer_value(row, index),
        "FLOAT" => {
            let v: Option<f32> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "DOUBLE" => {
            let v: Option<f64> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "DECIMAL" => {
            let v: Option<bigdecimal::BigDecimal> = row.try_get(index).ok();
            v.map(|d| Value::String(d.to_string()))
                .unwrap_or_else(|| string_value(row, index, type_name))
        }
        "DATETIME" => {
            let v: Option<NaiveDateTime> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_string()))
                .unwrap_or_else(|| string_value(row, index, type_name))
        }
        "TIMESTAMP" => {
            let v: Option<DateTime<Utc>> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or_else(|| string_value(row, index, type_name))
        }
        "DATE" => {
            let v: Option<NaiveDate> = row.try_get(index).ok();
            v.map(|d| Value::String(d.to_string()))
                .unwrap_or_else(|| string_value(row, index, type_name))
        }
        "TIME" => {
            // TIME spans -838:59:59..838:59:59; out-of-day values fall back to text
            let v: Option<NaiveTime> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_string()))
                .unwrap_or_else(|| string_value(row, index, type_name))
        }
        "JSON" => {
            let v: Option<Value> = row.try_get(index).ok();
            v.unwrap_or_else(|| string_value(row, index, type_name))
        }
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "GEOMETRY" => {
            let v: Option<Vec<u8>> = row.try_get(index).ok();
            v.map(|b| Value::String(STANDARD.encode(b))).unwrap_or(Value::Null)
        }
        _ => string_value(row, index, type_name),
    }
}

fn integer_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
        return Value::from(v);
    }
    string_value(row, index, "INTEGER")
}

fn string_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Value::String(s);
    }
    if let Ok(raw) = row.try_get_raw(index) {
        if let Ok(bytes) = <Vec<u8> as sqlx::Decode<MySql>>::decode(raw) {
            if let Ok(s) = String::from_utf8(bytes) {
                return Value::String(s);
            }
        }
    }
    Value::String(format!("<{}>", type_name))
}
