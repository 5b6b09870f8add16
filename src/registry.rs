use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::PoolSettings;
use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::db::Adapter;
use crate::error::{DbError, Result};
use crate::models::DbConnectionOptions;

/// Builds an unconnected adapter from connection options.
pub type AdapterFactory = Arc<dyn Fn(&DbConnectionOptions) -> Result<Adapter> + Send + Sync>;

/// Maps an adapter type name (`"postgres"`, `"mysql"`, ...) to its factory.
/// Holds no connection state.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: RwLock<HashMap<String, AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Postgres and MySQL adapters.
    pub fn with_defaults(settings: PoolSettings) -> Self {
        let registry = Self::new();
        registry.register_adapter(
            "postgres",
            Arc::new(move |options: &DbConnectionOptions| match options {
                DbConnectionOptions::Postgres(o) => Ok(Adapter::Sql(Arc::new(
                    PostgresAdapter::new(o.clone(), settings),
                ))),
                other => Err(mismatch("postgres", other)),
            }),
        );
        registry.register_adapter(
            "mysql",
            Arc::new(move |options: &DbConnectionOptions| match options {
                DbConnectionOptions::MySql(o) => {
                    Ok(Adapter::Sql(Arc::new(MySqlAdapter::new(o.clone(), settings))))
                }
                other => Err(mismatch("mysql", other)),
            }),
        );
        registry
    }

    /// Registers `factory` under `adapter_type`, replacing any previous one.
    pub fn register_adapter(&self, adapter_type: &str, factory: AdapterFactory) {
        let mut factories = match self.factories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if factories.insert(adapter_type.to_string(), factory).is_some() {
            tracing::debug!(adapter_type, "Adapter factory replaced");
        }
    }

    /// Registered type names, sorted.
    pub fn list_adapters(&self) -> Vec<String> {
        let factories = match self.factories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_factory(&self, adapter_type: &str) -> Option<AdapterFactory> {
        let factories = match self.factories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        factories.get(adapter_type).cloned()
    }

    pub fn create_adapter(&self, adapter_type: &str, options: &DbConnectionOptions) -> Result<Adapter> {
        // clone the factory out so user code never runs under the lock
        let factory = self
            .get_factory(adapter_type)
            .ok_or_else(|| DbError::UnknownAdapter(adapter_type.to_string()))?;
        factory(options)
    }
}

fn mismatch(expected: &str, options: &DbConnectionOptions) -> DbError {
    DbError::validation(format!(
        "{} adapter cannot use {} connection options",
        expected,
        options.adapter_type()
    ))
}
