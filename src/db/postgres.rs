use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Either, Executor, Postgres, Row, TypeInfo};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::PoolSettings;
use crate::db::classifier;
use crate::db::export::{self, ExportFormat};
use crate::db::query_builder::{
    self, build_table_select, column_types, key_values, require_primary_key, ColumnTypes, Dialect,
};
use crate::db::{elapsed_ms, query_type, DbAdapter, SqlAdapter};
use crate::error::{wrap, DbError, Result};
use crate::models::{
    ColumnInfo, ConstraintInfo, CreateTableOptions, DeleteRowsOptions, DeleteTableOptions,
    ExportResult, ExportTableOptions, ForeignKeyRef, IndexInfo, InsertRowOptions,
    MutationResult, PostgresOptions, QueryOptions, QueryResult, SchemaWithTables,
    TableDataOptions, TableInfo, UpdateCellOptions,
};

const COLUMNS_SQL: &str = r#"
    SELECT
        a.attname::text AS column_name,
        format_type(a.atttypid, a.atttypmod) AS data_type,
        NOT a.attnotnull AS nullable,
        pg_get_expr(d.adbin, d.adrelid) AS default_value,
        EXISTS (
            SELECT 1 FROM pg_index i
            WHERE i.indrelid = c.oid
              AND a.attnum = ANY(i.indkey::int[])
              AND i.indisprimary
        ) AS is_pk,
        (
            SELECT array_agg(e.enumlabel::text ORDER BY e.enumsortorder)
            FROM pg_enum e
            WHERE e.enumtypid = a.atttypid
        ) AS enum_values,
        fk.foreign_schema,
        fk.foreign_table,
        fk.foreign_column
    FROM pg_attribute a
    JOIN pg_class c ON a.attrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    LEFT JOIN LATERAL (
        SELECT
            fn.nspname::text AS foreign_schema,
            fc.relname::text AS foreign_table,
            fa.attname::text AS foreign_column
        FROM pg_constraint con
        JOIN pg_class fc ON fc.oid = con.confrelid
        JOIN pg_namespace fn ON fn.oid = fc.relnamespace
        JOIN pg_attribute fa
          ON fa.attrelid = con.confrelid
         AND fa.attnum = con.confkey[array_position(con.conkey, a.attnum)]
        WHERE con.conrelid = c.oid
          AND con.contype = 'f'
          AND a.attnum = ANY(con.conkey)
        LIMIT 1
    ) fk ON true
    WHERE n.nspname = $1 AND c.relname = $2
      AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT
        con.conname::text AS name,
        CASE con.contype
            WHEN 'p' THEN 'PRIMARY KEY'
            WHEN 'f' THEN 'FOREIGN KEY'
            WHEN 'u' THEN 'UNIQUE'
            WHEN 'c' THEN 'CHECK'
            WHEN 'x' THEN 'EXCLUDE'
            ELSE con.contype::text
        END AS constraint_type,
        ARRAY(
            SELECT a.attname::text
            FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            ORDER BY k.ord
        ) AS columns,
        fc.relname::text AS foreign_table,
        CASE WHEN con.contype = 'f' THEN ARRAY(
            SELECT a.attname::text
            FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
            ORDER BY k.ord
        ) END AS foreign_columns
    FROM pg_constraint con
    JOIN pg_class c ON c.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_class fc ON fc.oid = con.confrelid
    WHERE n.nspname = $1 AND c.relname = $2
    ORDER BY con.conname
"#;

const INDEXES_SQL: &str = r#"
    SELECT
        i.relname::text AS index_name,
        array_agg(a.attname::text ORDER BY x.ordinality) AS columns,
        ix.indisunique AS is_unique
    FROM pg_index ix
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS x(attnum, ordinality)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = x.attnum
    WHERE n.nspname = $1 AND t.relname = $2
    GROUP BY i.relname, ix.indisunique
    ORDER BY i.relname
"#;

pub struct PostgresAdapter {
    options: PostgresOptions,
    settings: PoolSettings,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresAdapter {
    pub fn new(options: PostgresOptions, settings: PoolSettings) -> Self {
        Self {
            options,
            settings,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<PgPool> {
        self.pool.read().await.clone().ok_or(DbError::NotConnected)
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let o = &self.options;
        let mut opts = PgConnectOptions::new()
            .host(&o.host)
            .port(o.port)
            .username(&o.user)
            .database(&o.database);
        if let Some(password) = &o.password {
            opts = opts.password(password);
        }
        if let Some(mode) = &o.ssl_mode {
            let mode = mode.parse::<PgSslMode>().map_err(|e| {
                DbError::connection(format!("invalid ssl_mode '{}'", mode), e)
            })?;
            opts = opts.ssl_mode(mode);
        }
        Ok(opts)
    }

    async fn fetch_columns(&self, pool: &PgPool, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch columns"))?;

        rows.iter()
            .map(|row| -> std::result::Result<ColumnInfo, sqlx::Error> {
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
                    data_type: row.try_get("data_type")?,
                    nullable: row.try_get("nullable")?,
                    default_value: row.try_get("default_value")?,
                    is_primary_key: row.try_get("is_pk")?,
                    enum_values: row.try_get("enum_values")?,
                    foreign_key,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wrap("Failed to read column metadata"))
    }

    async fn fetch_constraints(
        &self,
        pool: &PgPool,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ConstraintInfo>> {
        let rows = sqlx::query(CONSTRAINTS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch constraints"))?;

        rows.iter()
            .map(|row| -> std::result::Result<ConstraintInfo, sqlx::Error> {
                Ok(ConstraintInfo {
                    name: row.try_get("name")?,
                    constraint_type: row.try_get("constraint_type")?,
                    columns: row.try_get("columns")?,
                    foreign_table: row.try_get("foreign_table")?,
                    foreign_columns: row.try_get("foreign_columns")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wrap("Failed to read constraint metadata"))
    }

    async fn fetch_indexes(&self, pool: &PgPool, schema: &str, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(INDEXES_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(wrap("Failed to fetch indexes"))?;

        rows.iter()
            .map(|row| -> std::result::Result<IndexInfo, sqlx::Error> {
                Ok(IndexInfo {
                    name: row.try_get("index_name")?,
                    columns: row.try_get("columns")?,
                    unique: row.try_get("is_unique")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wrap("Failed to read index metadata"))
    }

    /// Column types are only needed when filters bind values.
    async fn filter_types(&self, pool: &PgPool, options: &TableDataOptions) -> Result<ColumnTypes> {
        if options.filters.is_empty() {
            return Ok(ColumnTypes::new());
        }
        let columns = self.fetch_columns(pool, &options.schema, &options.table).await?;
        Ok(column_types(&columns))
    }

    async fn select_all(&self, options: &TableDataOptions) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let pool = self.pool().await?;
        let types = self.filter_types(&pool, options).await?;
        let stmt = build_table_select(Dialect::Postgres, options, &types)?;
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

    /// Runs `statements` on one pooled connection inside a transaction.
    /// Any failure rolls back before the original error is returned.
    async fn in_transaction(
        &self,
        pool: &PgPool,
        context: &'static str,
        statements: Vec<(String, Vec<Option<String>>)>,
    ) -> Result<u64> {
        let mut tx = pool.begin().await.map_err(wrap(context))?;
        let mut affected = 0;
        for (sql, binds) in &statements {
            let mut query = sqlx::query(sql);
            for value in binds {
                query = query.bind(value.clone());
            }
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
                export::to_sql_dump(Dialect::Postgres, &options.schema, &options.table, &columns, &rows)
            }
        };
        Ok(export::package(&options.table, format, &payload))
    }
}

#[async_trait]
impl DbAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .idle_timeout(self.settings.idle_timeout)
            .connect_with(self.connect_options()?)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!(
                        "failed to connect to postgres at {}:{}",
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
            "Connected to postgres"
        );
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(host = %self.options.host, "Disconnected from postgres");
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
                let page_sql = query_builder::wrap_page_query(Dialect::Postgres, inner, limit, offset);

                let (count_row, rows) = tokio::try_join!(
                    sqlx::query(&count_sql).persistent(false).fetch_one(&pool),
                    sqlx::query(&page_sql).persistent(false).fetch_all(&pool),
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

        let mut stream = if classifier::has_additional_statements(sql) {
            pool.fetch_many(sql)
        } else {
            pool.fetch_many(sqlx::query(sql).persistent(false))
        };

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
impl SqlAdapter for PostgresAdapter {
    async fn list_schemas(&self) -> Result<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT schema_name::text AS schema_name FROM information_schema.schemata \
             WHERE schema_name NOT LIKE 'pg_%' \
             AND schema_name != 'information_schema' \
             ORDER BY schema_name",
        )
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
            "SELECT table_name::text AS table_name FROM information_schema.tables \
             WHERE table_schema = $1 ORDER BY table_name",
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
        let rows = sqlx::query(
            "SELECT s.schema_name::text AS schema_name, t.table_name::text AS table_name \
             FROM information_schema.schemata s \
             LEFT JOIN information_schema.tables t ON t.table_schema = s.schema_name \
             WHERE s.schema_name NOT LIKE 'pg_%' \
             AND s.schema_name != 'information_schema' \
             ORDER BY s.schema_name, t.table_name",
        )
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
        let types = self.filter_types(&pool, options).await?;
        let stmt = build_table_select(Dialect::Postgres, options, &types)?;

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
        let sql = query_builder::build_delete_row(Dialect::Postgres, &options.schema, &options.table, &keys);

        let mut statements = Vec::with_capacity(options.rows.len());
        for row in &options.rows {
            let values = key_values(row, &keys)?;
            let binds = keys
                .iter()
                .zip(&values)
                .map(|(key, value)| pg_text(value, Some(key.data_type.as_str())))
                .collect();
            statements.push((sql.clone(), binds));
        }
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
        let values = key_values(&options.row, &keys)?;

        let sql = query_builder::build_update_cell(
            Dialect::Postgres,
            &options.schema,
            &options.table,
            target,
            &keys,
        );
        let mut binds = vec![pg_text(&options.value, Some(target.data_type.as_str()))];
        binds.extend(
            keys.iter()
                .zip(&values)
                .map(|(key, value)| pg_text(value, Some(key.data_type.as_str()))),
        );

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
            binds.push(pg_text(value, Some(column.data_type.as_str())));
            targets.push(column);
        }

        let sql = query_builder::build_insert_row(Dialect::Postgres, &options.schema, &options.table, &targets);
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
        let sql = query_builder::build_create_table(Dialect::Postgres, options)?;
        sqlx::query(&sql)
            .persistent(false)
            .execute(&pool)
            .await
            .map_err(wrap("Failed to create table"))?;
        tracing::info!(schema = %options.schema, table = %options.table, "Table created");
        Ok(())
    }

    async fn delete_table(&self, options: &DeleteTableOptions) -> Result<()> {
        let pool = self.pool().await?;
        let sql = query_builder::build_drop_table(Dialect::Postgres, options);
        sqlx::query(&sql)
            .persistent(false)
            .execute(&pool)
            .await
            .map_err(wrap("Failed to delete table"))?;
        tracing::info!(schema = %options.schema, table = %options.table, "Table dropped");
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = query.bind(pg_text(value, None));
    }
    query
}

/// Text form of a value for binding against a `$n::type` placeholder.
/// JSON arrays headed for array columns become Postgres array literals.
pub fn pg_text(value: &Value, data_type: Option<&str>) -> Option<String> {
    let is_array_type = data_type.map_or(false, |t| t.starts_with('_') || t.ends_with("[]"));
    match value {
        Value::Null => None,
        Value::Array(items) if is_array_type => Some(pg_array_literal(items)),
        Value::String(s) if is_array_type && s.trim().starts_with('[') => {
            match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => Some(pg_array_literal(&items)),
                _ => Some(s.clone()),
            }
        }
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn pg_array_literal(items: &[Value]) -> String {
    let mut pg_arr = String::from("{");
    for (i, elem) in items.iter().enumerate() {
        if i > 0 {
            pg_arr.push(',');
        }
        match elem {
            Value::Null => pg_arr.push_str("NULL"),
            Value::Array(inner) => pg_arr.push_str(&pg_array_literal(inner)),
            Value::String(s) => {
                pg_arr.push('"');
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        pg_arr.push('\\');
                    }
                    pg_arr.push(c);
                }
                pg_arr.push('"');
            }
            _ => pg_arr.push_str(&elem.to_string()),
        }
    }
    pg_arr.push('}');
    pg_arr
}

async fn describe_columns(pool: &PgPool, sql: &str) -> Vec<String> {
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

fn rows_to_json(rows: &[PgRow]) -> (Vec<String>, Vec<Vec<Value>>) {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    (columns, rows.iter().map(row_to_json).collect())
}

fn row_to_json(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| map_postgres_value(row, i))
        .collect()
}

fn map_postgres_value(row: &PgRow, index: usize) -> Value {
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
        "BOOL" => {
            let v: Option<bool> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT2" => {
            let v: Option<i16> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT4" => {
            let v: Option<i32> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT8" => {
            let v: Option<i64> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "FLOAT4" => {
            let v: Option<f32> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "FLOAT8" => {
            let v: Option<f64> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "BPCHAR" => {
            let v: Option<String> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "UUID" => {
            let v: Option<uuid::Uuid> = row.try_get(index).ok();
            serde_json::json!(v.map(|u| u.to_string()))
        }
        "TIMESTAMPTZ" => {
            let v: Option<DateTime<Utc>> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
        }
        "TIMESTAMP" => {
            let v: Option<NaiveDateTime> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)
        }
        "DATE" => {
            let v: Option<NaiveDate> = row.try_get(index).ok();
            v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
        }
        "TIME" => {
            let v: Option<NaiveTime> = row.try_get(index).ok();
            v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)
        }
        "MONEY" => {
            // Binary MONEY is a big-endian i64 of cents; text results carry the formatted amount.
            match value_ref.as_bytes() {
                Ok(bytes) if bytes.len() == 8 => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(bytes);
                    let cents = i64::from_be_bytes(raw);
                    Value::String(format!("${:.2}", cents as f64 / 100.0))
                }
                Ok(bytes) => std::str::from_utf8(bytes)
                    .map(|s| Value::String(s.to_string()))
                    .unwrap_or(Value::Null),
                Err(_) => Value::Null,
            }
        }
        "NUMERIC" => {
            let v: Option<bigdecimal::BigDecimal> = row.try_get(index).ok();
            v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
        }
        "INET" | "CIDR" => {
            let v: Option<ipnetwork::IpNetwork> = row.try_get(index).ok();
            v.map(|n| Value::String(n.to_string())).unwrap_or(Value::Null)
        }
        "MACADDR" => {
            let v: Option<mac_address::MacAddress> = row.try_get(index).ok();
            v.map(|m| Value::String(m.to_string())).unwrap_or(Value::Null)
        }
        "BYTEA" => {
            let v: Option<Vec<u8>> = row.try_get(index).ok();
            v.map(|b| Value::String(STANDARD.encode(b))).unwrap_or(Value::Null)
        }
        "VARCHAR[]" | "TEXT[]" | "CHAR[]" | "_varchar" | "_text" | "_char" => {
            let v: Option<Vec<String>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT2[]" | "_int2" => {
            let v: Option<Vec<i16>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT4[]" | "_int4" => {
            let v: Option<Vec<i32>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "INT8[]" | "_int8" => {
            let v: Option<Vec<i64>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "FLOAT4[]" | "FLOAT8[]" | "_float4" | "_float8" => {
            let v: Option<Vec<f64>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "BOOL[]" | "_bool" => {
            let v: Option<Vec<bool>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "JSON[]" | "JSONB[]" | "_json" | "_jsonb" => {
            let v: Option<Vec<Value>> = row.try_get(index).ok();
            serde_json::json!(v)
        }
        "JSON" | "JSONB" => {
            let v: Option<Value> = row.try_get(index).ok();
            v.unwrap_or(Value::Null)
        }
        _ => {
            let v_str: Option<String> = row.try_get(index).ok();
            if let Some(s) = v_str {
                Value::String(s)
            } else {
                // Enums and other custom types: take the raw bytes when they are UTF-8
                if let Ok(bytes) = value_ref.as_bytes() {
                    if let Ok(s) = std::str::from_utf8(bytes) {
                        return Value::String(s.to_string());
                    }
                }
                Value::String(format!("<{}>", type_name))
            }
        }
    }
}
