pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod registry;
pub mod state;
pub mod storage;

pub use config::{AppConfig, PoolSettings};
pub use db::{Adapter, DbAdapter, SqlAdapter};
pub use error::{DbError, ErrorKind, Result};
pub use registry::{AdapterFactory, AdapterRegistry};
pub use state::{AppState, ConnectionManager};

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` overrides the default
/// `sqldesk=info` filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqldesk=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
