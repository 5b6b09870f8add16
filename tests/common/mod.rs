#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqldesk::db::query_builder::Dialect;
use sqldesk::models::{DbConnectionOptions, PostgresOptions, QueryOptions, QueryResult};
use sqldesk::storage::ProfileStore;
use sqldesk::{Adapter, AdapterRegistry, ConnectionManager, DbAdapter, DbError, Result};

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// In-memory adapter that echoes the SQL it is given.
pub struct FakeAdapter {
    counters: Arc<Counters>,
    fail_connect: bool,
    fail_disconnect: bool,
    connected: AtomicBool,
}

#[async_trait]
impl DbAdapter for FakeAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&self) -> Result<()> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(DbError::Connection {
                message: "connection refused".into(),
                source: None,
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(DbError::Connection {
                message: "socket already closed".into(),
                source: None,
            });
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn run_query(&self, sql: &str, options: Option<QueryOptions>) -> Result<QueryResult> {
        if !self.is_connected().await {
            return Err(DbError::NotConnected);
        }
        Ok(QueryResult {
            columns: vec!["echo".into()],
            rows: vec![vec![json!(sql)]],
            row_count: 1,
            query_type: "SELECT".into(),
            limit: options.and_then(|o| o.limit),
            ..Default::default()
        })
    }
}

/// Registers `fake`, `failing` and `sticky` (disconnect errors) adapter
/// types sharing one set of counters. With `as_postgres` the healthy fake
/// also replaces the `postgres` factory.
pub fn register_fakes(registry: &AdapterRegistry, counters: &Arc<Counters>, as_postgres: bool) {
    let variants: &[(&str, bool, bool)] = &[
        ("fake", false, false),
        ("failing", true, false),
        ("sticky", false, true),
    ];
    for &(name, fail_connect, fail_disconnect) in variants {
        let counters = Arc::clone(counters);
        let factory: sqldesk::AdapterFactory = Arc::new(move |_: &DbConnectionOptions| {
            counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Adapter::Basic(Arc::new(FakeAdapter {
                counters: Arc::clone(&counters),
                fail_connect,
                fail_disconnect,
                connected: AtomicBool::new(false),
            })))
        });
        registry.register_adapter(name, Arc::clone(&factory));
        if as_postgres && name == "fake" {
            registry.register_adapter("postgres", factory);
        }
    }
}

pub fn manager_with_fakes(dir: &Path) -> (ConnectionManager, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let registry = AdapterRegistry::new();
    register_fakes(&registry, &counters, true);
    let store = ProfileStore::new(dir.join("connections.json"));
    (ConnectionManager::load(Arc::new(registry), store), counters)
}

pub fn pg_options(host: &str) -> DbConnectionOptions {
    DbConnectionOptions::Postgres(PostgresOptions {
        host: host.into(),
        port: 5432,
        database: "app".into(),
        user: "postgres".into(),
        password: Some("secret".into()),
        ssl_mode: None,
    })
}
