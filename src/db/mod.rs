use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CreateTableOptions, DeleteRowsOptions, DeleteTableOptions, ExportResult, ExportTableOptions,
    InsertRowOptions, MutationResult, QueryOptions, QueryResult, SchemaWithTables,
    TableDataOptions, TableInfo, UpdateCellOptions,
};

pub mod classifier;
pub mod export;
pub mod mysql;
pub mod postgres;
pub mod query_builder;

use query_builder::Dialect;

/// Base capability every adapter provides.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    fn dialect(&self) -> Dialect;
    /// Creates and validates the pool. A second call while connected is a no-op.
    async fn connect(&self) -> Result<()>;
    /// Closes the pool. No-op when not connected.
    async fn disconnect(&self) -> Result<()>;
    async fn is_connected(&self) -> bool;
    async fn run_query(&self, sql: &str, options: Option<QueryOptions>) -> Result<QueryResult>;
}

/// Schema browsing, table data and mutation on top of [`DbAdapter`].
#[async_trait]
pub trait SqlAdapter: DbAdapter {
    async fn list_schemas(&self) -> Result<Vec<String>>;
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;
    async fn list_schema_with_tables(&self) -> Result<Vec<SchemaWithTables>>;
    async fn introspect_table(&self, schema: &str, table: &str) -> Result<TableInfo>;
    async fn fetch_table_data(&self, options: &TableDataOptions) -> Result<QueryResult>;
    async fn delete_table_rows(&self, options: &DeleteRowsOptions) -> Result<MutationResult>;
    async fn update_table_cell(&self, options: &UpdateCellOptions) -> Result<MutationResult>;
    async fn insert_table_row(&self, options: &InsertRowOptions) -> Result<MutationResult>;
    async fn export_table_as_csv(&self, options: &ExportTableOptions) -> Result<ExportResult>;
    async fn export_table_as_sql(&self, options: &ExportTableOptions) -> Result<ExportResult>;
    async fn create_table(&self, options: &CreateTableOptions) -> Result<()>;
    async fn delete_table(&self, options: &DeleteTableOptions) -> Result<()>;
}

/// An adapter instance tagged with its capability level.
#[derive(Clone)]
pub enum Adapter {
    Sql(Arc<dyn SqlAdapter>),
    Basic(Arc<dyn DbAdapter>),
}

impl Adapter {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sql(a) => a.dialect(),
            Self::Basic(a) => a.dialect(),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        match self {
            Self::Sql(a) => a.connect().await,
            Self::Basic(a) => a.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            Self::Sql(a) => a.disconnect().await,
            Self::Basic(a) => a.disconnect().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Self::Sql(a) => a.is_connected().await,
            Self::Basic(a) => a.is_connected().await,
        }
    }

    pub async fn run_query(&self, sql: &str, options: Option<QueryOptions>) -> Result<QueryResult> {
        match self {
            Self::Sql(a) => a.run_query(sql, options).await,
            Self::Basic(a) => a.run_query(sql, options).await,
        }
    }

    pub fn as_sql(&self) -> Option<Arc<dyn SqlAdapter>> {
        match self {
            Self::Sql(a) => Some(Arc::clone(a)),
            Self::Basic(_) => None,
        }
    }

    /// True when both handles point at the same adapter instance.
    pub fn same_instance(&self, other: &Adapter) -> bool {
        match (self, other) {
            (Self::Sql(a), Self::Sql(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (Self::Basic(a), Self::Basic(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self {
            Self::Sql(_) => "Sql",
            Self::Basic(_) => "Basic",
        };
        f.debug_struct("Adapter")
            .field("level", &level)
            .field("dialect", &self.dialect())
            .finish()
    }
}

/// First keyword of a statement, upper-cased, for `QueryResult::query_type`.
pub(crate) fn query_type(sql: &str) -> String {
    classifier::get_initial_statement_keyword(sql)
        .map(|k| k.to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}
