//! Operation surface for an IPC or HTTP layer. Arguments and results are
//! plain data; failures cross the boundary as [`CommandError`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::SqlAdapter;
use crate::error::{DbError, ErrorKind};
use crate::models::{
    ConnectionProfile, CreateTableOptions, DeleteRowsOptions, DeleteTableOptions, ExportResult,
    ExportTableOptions, InsertRowOptions, MutationResult, NewProfile, ProfileUpdate, QueryOptions,
    QueryResult, SchemaWithTables, TableDataOptions, TableInfo, UpdateCellOptions,
};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<DbError> for CommandError {
    fn from(err: DbError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

pub type CommandResult<T> = Result<T, CommandError>;

/// Connection status reported to the caller after connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub profile_id: String,
    pub adapter_type: String,
    pub sql_capable: bool,
}

fn sql_connection(state: &AppState, profile_id: &str) -> CommandResult<Arc<dyn SqlAdapter>> {
    match state.manager.get_connection(profile_id) {
        None => Err(DbError::ConnectionNotFound(profile_id.to_string()).into()),
        Some(adapter) => adapter.as_sql().ok_or_else(|| {
            DbError::validation(format!(
                "connection {} does not support schema operations",
                profile_id
            ))
            .into()
        }),
    }
}

pub async fn connect_profile(state: &AppState, profile_id: &str) -> CommandResult<ConnectionStatus> {
    let adapter = state.manager.connect_profile(profile_id).await?;
    Ok(ConnectionStatus {
        profile_id: profile_id.to_string(),
        adapter_type: adapter.dialect().name().to_string(),
        sql_capable: adapter.as_sql().is_some(),
    })
}

pub async fn disconnect_profile(state: &AppState, profile_id: &str) -> CommandResult<()> {
    state.manager.disconnect_connection(profile_id).await;
    Ok(())
}

pub fn list_adapters(state: &AppState) -> Vec<String> {
    state.registry.list_adapters()
}

pub async fn run_query(
    state: &AppState,
    profile_id: &str,
    sql: &str,
    options: Option<QueryOptions>,
) -> CommandResult<QueryResult> {
    let adapter = state
        .manager
        .get_connection(profile_id)
        .ok_or_else(|| DbError::ConnectionNotFound(profile_id.to_string()))?;
    Ok(adapter.run_query(sql, options).await?)
}

pub async fn get_schemas(state: &AppState, profile_id: &str) -> CommandResult<Vec<String>> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.list_schemas().await?)
}

pub async fn get_tables(state: &AppState, profile_id: &str, schema: &str) -> CommandResult<Vec<String>> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.list_tables(schema).await?)
}

pub async fn get_schema_with_tables(
    state: &AppState,
    profile_id: &str,
) -> CommandResult<Vec<SchemaWithTables>> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.list_schema_with_tables().await?)
}

pub async fn get_table_info(
    state: &AppState,
    profile_id: &str,
    schema: &str,
    table: &str,
) -> CommandResult<TableInfo> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.introspect_table(schema, table).await?)
}

pub async fn fetch_table_data(
    state: &AppState,
    profile_id: &str,
    options: TableDataOptions,
) -> CommandResult<QueryResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.fetch_table_data(&options).await?)
}

pub async fn update_cell(
    state: &AppState,
    profile_id: &str,
    options: UpdateCellOptions,
) -> CommandResult<MutationResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.update_table_cell(&options).await?)
}

pub async fn delete_rows(
    state: &AppState,
    profile_id: &str,
    options: DeleteRowsOptions,
) -> CommandResult<MutationResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.delete_table_rows(&options).await?)
}

pub async fn insert_row(
    state: &AppState,
    profile_id: &str,
    options: InsertRowOptions,
) -> CommandResult<MutationResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.insert_table_row(&options).await?)
}

pub async fn export_table_csv(
    state: &AppState,
    profile_id: &str,
    options: ExportTableOptions,
) -> CommandResult<ExportResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.export_table_as_csv(&options).await?)
}

pub async fn export_table_sql(
    state: &AppState,
    profile_id: &str,
    options: ExportTableOptions,
) -> CommandResult<ExportResult> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.export_table_as_sql(&options).await?)
}

pub async fn create_table(
    state: &AppState,
    profile_id: &str,
    options: CreateTableOptions,
) -> CommandResult<()> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.create_table(&options).await?)
}

pub async fn delete_table(
    state: &AppState,
    profile_id: &str,
    options: DeleteTableOptions,
) -> CommandResult<()> {
    let adapter = sql_connection(state, profile_id)?;
    Ok(adapter.delete_table(&options).await?)
}

pub fn list_profiles(state: &AppState) -> Vec<ConnectionProfile> {
    state.manager.list_profiles()
}

pub fn get_profile(state: &AppState, profile_id: &str) -> CommandResult<ConnectionProfile> {
    state
        .manager
        .get_profile(profile_id)
        .ok_or_else(|| DbError::ProfileNotFound(profile_id.to_string()).into())
}

pub fn create_profile(state: &AppState, profile: NewProfile) -> CommandResult<ConnectionProfile> {
    Ok(state.manager.create_profile(profile)?)
}

pub fn update_profile(
    state: &AppState,
    profile_id: &str,
    update: ProfileUpdate,
) -> CommandResult<ConnectionProfile> {
    Ok(state.manager.update_profile(profile_id, update)?)
}

/// Deletes the profile and closes its live connection, if any.
pub async fn delete_profile(state: &AppState, profile_id: &str) -> CommandResult<()> {
    state.manager.delete_profile(profile_id)?;
    state.manager.disconnect_connection(profile_id).await;
    Ok(())
}

/// Closes every connection and waits for pending profile writes.
pub async fn shutdown(state: &AppState) {
    state.manager.close_all().await;
    state.manager.flush().await;
    tracing::info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_from_db_error() {
        let err: CommandError = DbError::ConnectionNotFound("abc".into()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "connection not found: abc");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
    }
}
