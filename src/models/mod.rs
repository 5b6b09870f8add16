use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::query_builder::Dialect;
use crate::error::{DbError, Result};

const PG_SSL_MODES: &[&str] = &[
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

fn default_pg_port() -> u16 {
    5432
}

fn default_mysql_port() -> u16 {
    3306
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PostgresOptions {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    #[serde(alias = "sslMode")]
    pub ssl_mode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MySqlOptions {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

/// Dialect-specific connection parameters, tagged by `type`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DbConnectionOptions {
    Postgres(PostgresOptions),
    MySql(MySqlOptions),
}

impl DbConnectionOptions {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Postgres(_) => Dialect::Postgres,
            Self::MySql(_) => Dialect::MySql,
        }
    }

    /// Registry key of the adapter that accepts these options.
    pub fn adapter_type(&self) -> &'static str {
        self.dialect().name()
    }

    pub fn validate(&self) -> Result<()> {
        let (host, port, database, user) = match self {
            Self::Postgres(o) => {
                if let Some(mode) = &o.ssl_mode {
                    if !PG_SSL_MODES.contains(&mode.as_str()) {
                        return Err(DbError::validation(format!(
                            "unknown ssl_mode '{}'",
                            mode
                        )));
                    }
                }
                (&o.host, o.port, &o.database, &o.user)
            }
            Self::MySql(o) => (&o.host, o.port, &o.database, &o.user),
        };
        if host.trim().is_empty() {
            return Err(DbError::validation("host is required"));
        }
        if port == 0 {
            return Err(DbError::validation("port must be non-zero"));
        }
        if database.trim().is_empty() {
            return Err(DbError::validation("database is required"));
        }
        if user.trim().is_empty() {
            return Err(DbError::validation("user is required"));
        }
        Ok(())
    }
}

/// A saved connection. Serialized as `{id, name, type, options, ...}` with
/// the dialect at the top level and untagged `options`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(try_from = "StoredProfile", into = "StoredProfile")]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    pub options: DbConnectionOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ConnectionProfile {
    pub fn adapter_type(&self) -> &'static str {
        self.options.adapter_type()
    }
}

/// On-disk profile record. Also accepts camelCase timestamps and options
/// that still carry their own `type` tag.
#[derive(Serialize, Deserialize)]
struct StoredProfile {
    id: String,
    name: String,
    #[serde(rename = "type")]
    adapter_type: String,
    options: Map<String, Value>,
    #[serde(default = "Utc::now", alias = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", alias = "updatedAt")]
    updated_at: DateTime<Utc>,
    #[serde(default, alias = "lastConnectedAt")]
    last_connected_at: Option<DateTime<Utc>>,
}

impl TryFrom<StoredProfile> for ConnectionProfile {
    type Error = DbError;

    fn try_from(stored: StoredProfile) -> Result<Self> {
        let mut options = stored.options;
        if let Some(tag) = options.get("type").and_then(Value::as_str) {
            if tag != stored.adapter_type {
                return Err(DbError::validation(format!(
                    "profile {} has type '{}' but options for '{}'",
                    stored.id, stored.adapter_type, tag
                )));
            }
        }
        options.insert("type".to_string(), Value::String(stored.adapter_type));
        Ok(Self {
            id: stored.id,
            name: stored.name,
            options: serde_json::from_value(Value::Object(options))?,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            last_connected_at: stored.last_connected_at,
        })
    }
}

impl From<ConnectionProfile> for StoredProfile {
    fn from(profile: ConnectionProfile) -> Self {
        let adapter_type = profile.adapter_type().to_string();
        let options = match &profile.options {
            DbConnectionOptions::Postgres(o) => serde_json::to_value(o),
            DbConnectionOptions::MySql(o) => serde_json::to_value(o),
        };
        let options = match options {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            id: profile.id,
            name: profile.name,
            adapter_type,
            options,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
            last_connected_at: profile.last_connected_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewProfile {
    pub name: String,
    pub options: DbConnectionOptions,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub options: Option<DbConnectionOptions>,
}

/// Pagination request for `run_query`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: u64,
    pub affected_rows: u64,
    pub query_type: String,
    pub execution_time_ms: f64,
    pub total_row_count: Option<u64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForeignKeyRef {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub enum_values: Option<Vec<String>>,
    pub foreign_key: Option<ForeignKeyRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConstraintInfo {
    pub name: String,
    pub constraint_type: String,
    pub columns: Vec<String>,
    pub foreign_table: Option<String>,
    pub foreign_columns: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SchemaWithTables {
    pub schema: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>", alias = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS")]
    Is,
}

impl FilterOperator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Is => "IS",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SortRule {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TableDataOptions {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort_rules: Vec<SortRule>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Rows to delete, each identified by its primary-key values.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeleteRowsOptions {
    pub schema: String,
    pub table: String,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpdateCellOptions {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub value: Value,
    /// Current row values; the primary-key entries locate the row.
    pub row: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InsertRowOptions {
    pub schema: String,
    pub table: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MutationResult {
    pub affected_rows: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExportTableOptions {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort_rules: Vec<SortRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExportResult {
    pub filename: String,
    pub mime_type: String,
    /// Base64-encoded payload
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    pub default_value: Option<String>,
    #[serde(default)]
    pub unique: bool,
    pub foreign_key: Option<ForeignKeyDefinition>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateTableOptions {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DeleteTableOptions {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub cascade: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn pg() -> PostgresOptions {
        PostgresOptions {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            user: "postgres".into(),
            password: None,
            ssl_mode: None,
        }
    }

    #[test]
    fn test_options_are_tagged_by_type() {
        let options: DbConnectionOptions = serde_json::from_value(json!({
            "type": "mysql",
            "host": "db",
            "database": "shop",
            "user": "root"
        }))
        .unwrap();
        match &options {
            DbConnectionOptions::MySql(o) => {
                assert_eq!(o.port, 3306);
                assert!(!o.ssl);
            }
            other => panic!("unexpected options: {:?}", other),
        }
        assert_eq!(options.adapter_type(), "mysql");
        assert_eq!(DbConnectionOptions::Postgres(pg()).adapter_type(), "postgres");
    }

    #[test]
    fn test_profile_serializes_type_at_top_level() {
        let now = Utc::now();
        let profile = ConnectionProfile {
            id: "p1".into(),
            name: "local".into(),
            options: DbConnectionOptions::Postgres(pg()),
            created_at: now,
            updated_at: now,
            last_connected_at: None,
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["type"], "postgres");
        assert_eq!(value["options"]["host"], "localhost");
        assert!(value["options"].get("type").is_none());

        let back: ConnectionProfile = serde_json::from_value(value).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_profile_reads_both_record_shapes() {
        let plain: ConnectionProfile = serde_json::from_value(json!({
            "id": "p1",
            "name": "local",
            "type": "postgres",
            "options": {"host": "db", "database": "app", "user": "postgres", "sslMode": "require"},
            "lastConnectedAt": "2026-01-02T03:04:05Z"
        }))
        .unwrap();
        assert_eq!(plain.adapter_type(), "postgres");
        assert!(plain.last_connected_at.is_some());
        match &plain.options {
            DbConnectionOptions::Postgres(o) => {
                assert_eq!(o.port, 5432);
                assert_eq!(o.ssl_mode.as_deref(), Some("require"));
            }
            other => panic!("unexpected options: {:?}", other),
        }

        let tagged: ConnectionProfile = serde_json::from_value(json!({
            "id": "p2",
            "name": "shop",
            "type": "mysql",
            "options": {"type": "mysql", "host": "db", "database": "shop", "user": "root"}
        }))
        .unwrap();
        assert_eq!(tagged.adapter_type(), "mysql");

        let mismatched = serde_json::from_value::<ConnectionProfile>(json!({
            "id": "p3",
            "name": "bad",
            "type": "postgres",
            "options": {"type": "mysql", "host": "db", "database": "shop", "user": "root"}
        }));
        assert!(mismatched.unwrap_err().to_string().contains("options for 'mysql'"));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut o = pg();
        o.host = " ".into();
        let err = DbConnectionOptions::Postgres(o).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut o = pg();
        o.ssl_mode = Some("sometimes".into());
        assert!(DbConnectionOptions::Postgres(o).validate().is_err());

        let mut o = pg();
        o.ssl_mode = Some("verify-full".into());
        assert!(DbConnectionOptions::Postgres(o).validate().is_ok());
    }

    #[test]
    fn test_filter_operator_wire_names() {
        let f: Filter = serde_json::from_value(json!({
            "column": "id",
            "operator": "NOT IN",
            "value": [1, 2]
        }))
        .unwrap();
        assert_eq!(f.operator, FilterOperator::NotIn);
        let op: FilterOperator = serde_json::from_value(json!("!=")).unwrap();
        assert_eq!(op, FilterOperator::NotEq);
        assert_eq!(serde_json::to_value(FilterOperator::LtEq).unwrap(), json!("<="));
    }

    #[test]
    fn test_referential_action_sql() {
        let a: ReferentialAction = serde_json::from_value(json!("SET_NULL")).unwrap();
        assert_eq!(a.as_sql(), "SET NULL");
    }
}
