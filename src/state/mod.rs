use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{Adapter, SqlAdapter};
use crate::error::{DbError, Result};
use crate::models::{ConnectionProfile, DbConnectionOptions, NewProfile, ProfileUpdate};
use crate::registry::AdapterRegistry;
use crate::storage::ProfileStore;

type Profiles = BTreeMap<String, ConnectionProfile>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background profile writes. Each snapshot carries a generation number and
/// a write is skipped when a newer generation has already reached disk.
struct Persistence {
    store: ProfileStore,
    generation: AtomicU64,
    written: Arc<tokio::sync::Mutex<u64>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Persistence {
    fn new(store: ProfileStore) -> Self {
        Self {
            store,
            generation: AtomicU64::new(0),
            written: Arc::new(tokio::sync::Mutex::new(0)),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn schedule(&self, generation: u64, snapshot: Profiles) {
        let store = self.store.clone();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                // no runtime: write inline
                if let Err(e) = store.save(&snapshot) {
                    tracing::error!(error = %e, path = %store.path().display(), "Failed to persist profiles");
                }
                return;
            }
        };

        let written = Arc::clone(&self.written);
        let task = handle.spawn(async move {
            let mut last = written.lock().await;
            if *last >= generation {
                tracing::debug!(generation, "Skipping stale profile snapshot");
                return;
            }
            let path = store.path().display().to_string();
            match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, path = %path, "Failed to persist profiles"),
                Err(e) => tracing::error!(error = %e, path = %path, "Profile write task failed"),
            }
            *last = generation;
        });

        let mut pending = lock(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(task);
    }

    async fn flush(&self) {
        let tasks = std::mem::take(&mut *lock(&self.pending));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Profile write task failed");
            }
        }
    }
}

/// Owns the persisted connection profiles and the live adapter for each
/// connected profile id. The two maps share ids but have independent
/// lifetimes.
pub struct ConnectionManager {
    registry: Arc<AdapterRegistry>,
    profiles: RwLock<Profiles>,
    connections: Mutex<HashMap<String, Adapter>>,
    persistence: Persistence,
}

impl ConnectionManager {
    /// Reads the profile store once. A missing or unreadable file starts
    /// the manager with no profiles.
    pub fn load(registry: Arc<AdapterRegistry>, store: ProfileStore) -> Self {
        let profiles = match store.load() {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %store.path().display(),
                    "Could not read profile store, starting empty"
                );
                Profiles::new()
            }
        };
        tracing::info!(count = profiles.len(), "Connection profiles loaded");
        Self {
            registry,
            profiles: RwLock::new(profiles),
            connections: Mutex::new(HashMap::new()),
            persistence: Persistence::new(store),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Applies `change` to the profile map and queues a write of the result.
    fn mutate_profiles<T>(&self, change: impl FnOnce(&mut Profiles) -> Result<T>) -> Result<T> {
        let (value, generation, snapshot) = {
            let mut profiles = write(&self.profiles);
            let value = change(&mut profiles)?;
            (value, self.persistence.next_generation(), profiles.clone())
        };
        self.persistence.schedule(generation, snapshot);
        Ok(value)
    }

    pub fn create_profile(&self, new: NewProfile) -> Result<ConnectionProfile> {
        new.options.validate()?;
        let now = Utc::now();
        let profile = ConnectionProfile {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            options: new.options,
            created_at: now,
            updated_at: now,
            last_connected_at: None,
        };
        let created = self.mutate_profiles(|profiles| {
            profiles.insert(profile.id.clone(), profile.clone());
            Ok(profile)
        })?;
        tracing::info!(profile_id = %created.id, adapter_type = created.adapter_type(), "Profile created");
        Ok(created)
    }

    pub fn get_profile(&self, id: &str) -> Option<ConnectionProfile> {
        read(&self.profiles).get(id).cloned()
    }

    /// All profiles ordered by name.
    pub fn list_profiles(&self) -> Vec<ConnectionProfile> {
        let mut profiles: Vec<ConnectionProfile> = read(&self.profiles).values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<ConnectionProfile> {
        if let Some(options) = &update.options {
            options.validate()?;
        }
        let updated = self.mutate_profiles(|profiles| {
            let profile = profiles
                .get_mut(id)
                .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))?;
            if let Some(name) = update.name {
                profile.name = name;
            }
            if let Some(options) = update.options {
                profile.options = options;
            }
            profile.updated_at = Utc::now();
            Ok(profile.clone())
        })?;
        tracing::info!(profile_id = %id, "Profile updated");
        Ok(updated)
    }

    /// Removes the profile. A live connection for the same id is left open;
    /// closing it is up to the caller.
    pub fn delete_profile(&self, id: &str) -> Result<ConnectionProfile> {
        let removed = self.mutate_profiles(|profiles| {
            profiles
                .remove(id)
                .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))
        })?;
        tracing::info!(profile_id = %id, "Profile deleted");
        Ok(removed)
    }

    /// Returns the live adapter for `profile_id`, creating and connecting one
    /// through the registry when none exists. A failed connect is cleaned up
    /// and nothing is cached.
    pub async fn create_connection(
        &self,
        profile_id: &str,
        adapter_type: &str,
        options: &DbConnectionOptions,
    ) -> Result<Adapter> {
        if let Some(existing) = self.get_connection(profile_id) {
            return Ok(existing);
        }

        let adapter = self.registry.create_adapter(adapter_type, options)?;
        if let Err(e) = adapter.connect().await {
            if let Err(cleanup) = adapter.disconnect().await {
                tracing::warn!(profile_id, error = %cleanup, "Cleanup after failed connect also failed");
            }
            tracing::warn!(profile_id, adapter_type, error = %e, "Connect failed");
            return Err(e);
        }

        let raced = {
            let mut connections = lock(&self.connections);
            match connections.get(profile_id) {
                Some(existing) => Some(existing.clone()),
                None => {
                    connections.insert(profile_id.to_string(), adapter.clone());
                    None
                }
            }
        };
        if let Some(existing) = raced {
            // another caller connected the same profile first
            if let Err(e) = adapter.disconnect().await {
                tracing::warn!(profile_id, error = %e, "Failed to close duplicate connection");
            }
            return Ok(existing);
        }

        tracing::info!(profile_id, adapter_type, "Connection opened");
        Ok(adapter)
    }

    /// Connects a stored profile and records the connect time.
    pub async fn connect_profile(&self, id: &str) -> Result<Adapter> {
        let profile = self
            .get_profile(id)
            .ok_or_else(|| DbError::ProfileNotFound(id.to_string()))?;
        let adapter = self
            .create_connection(id, profile.adapter_type(), &profile.options)
            .await?;

        let stamped = self.mutate_profiles(|profiles| {
            Ok(match profiles.get_mut(id) {
                Some(profile) => {
                    profile.last_connected_at = Some(Utc::now());
                    true
                }
                None => false,
            })
        });
        if let Ok(false) = stamped {
            tracing::debug!(profile_id = %id, "Profile removed while connecting");
        }
        Ok(adapter)
    }

    pub fn get_connection(&self, profile_id: &str) -> Option<Adapter> {
        lock(&self.connections).get(profile_id).cloned()
    }

    /// The live adapter when it is SQL-capable.
    pub fn get_sql_connection(&self, profile_id: &str) -> Option<Arc<dyn SqlAdapter>> {
        self.get_connection(profile_id).and_then(|a| a.as_sql())
    }

    pub fn is_connected(&self, profile_id: &str) -> bool {
        lock(&self.connections).contains_key(profile_id)
    }

    /// Ids with a live connection, sorted.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.connections).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops the cached adapter, then disconnects it. Disconnect errors are
    /// logged and swallowed.
    pub async fn disconnect_connection(&self, profile_id: &str) {
        let adapter = lock(&self.connections).remove(profile_id);
        let Some(adapter) = adapter else {
            return;
        };
        match adapter.disconnect().await {
            Ok(()) => tracing::info!(profile_id, "Connection closed"),
            Err(e) => tracing::warn!(profile_id, error = %e, "Disconnect failed"),
        }
    }

    /// Disconnects every live adapter concurrently. One failure does not
    /// stop the others.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Adapter)> = lock(&self.connections).drain().collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        let results = futures::future::join_all(drained.iter().map(|(id, adapter)| async move {
            (id, adapter.disconnect().await)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                tracing::warn!(profile_id = %id, error = %e, "Disconnect failed during close_all");
            }
        }
        tracing::info!(count, "All connections closed");
    }

    /// Waits for every queued profile write to finish.
    pub async fn flush(&self) {
        self.persistence.flush().await;
    }
}

/// Composition root: configuration, the adapter registry and the
/// connection manager built from them.
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<AdapterRegistry>,
    pub manager: ConnectionManager,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(AdapterRegistry::with_defaults(config.pool));
        let store = ProfileStore::new(config.profiles_path());
        let manager = ConnectionManager::load(Arc::clone(&registry), store);
        Self {
            config,
            registry,
            manager,
        }
    }

    pub fn from_env() -> Self {
        Self::new(AppConfig::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::PostgresOptions;

    fn pg(host: &str) -> DbConnectionOptions {
        DbConnectionOptions::Postgres(PostgresOptions {
            host: host.into(),
            port: 5432,
            database: "app".into(),
            user: "postgres".into(),
            password: None,
            ssl_mode: None,
        })
    }

    fn manager(dir: &std::path::Path) -> ConnectionManager {
        let config = AppConfig {
            data_dir: dir.to_path_buf(),
            ..AppConfig::default()
        };
        AppState::new(config).manager
    }

    #[tokio::test]
    async fn test_profile_crud() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let created = manager
            .create_profile(NewProfile {
                name: "local".into(),
                options: pg("localhost"),
            })
            .unwrap();
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(manager.get_profile(&created.id), Some(created.clone()));

        let updated = manager
            .update_profile(
                &created.id,
                ProfileUpdate {
                    name: Some("renamed".into()),
                    options: None,
                },
            )
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.id, created.id);
        assert!(updated.updated_at >= created.updated_at);

        manager.delete_profile(&created.id).unwrap();
        assert!(manager.get_profile(&created.id).is_none());
        let err = manager.delete_profile(&created.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        manager.flush().await;
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let err = manager
            .create_profile(NewProfile {
                name: "bad".into(),
                options: pg(""),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(manager.list_profiles().is_empty());
    }

    #[tokio::test]
    async fn test_profiles_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager(dir.path());
        let a = first
            .create_profile(NewProfile {
                name: "b-side".into(),
                options: pg("one"),
            })
            .unwrap();
        let b = first
            .create_profile(NewProfile {
                name: "a-side".into(),
                options: pg("two"),
            })
            .unwrap();
        first.flush().await;

        let second = manager(dir.path());
        let names: Vec<String> = second.list_profiles().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["a-side", "b-side"]);
        assert_eq!(second.get_profile(&a.id), Some(a));
        assert_eq!(second.get_profile(&b.id), Some(b));
    }

    #[tokio::test]
    async fn test_corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("connections.json"), "[[[").unwrap();
        let manager = manager(dir.path());
        assert!(manager.list_profiles().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_profile_cannot_connect() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let err = manager.connect_profile("missing").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!manager.is_connected("missing"));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.disconnect_connection("nobody").await;
        manager.close_all().await;
        assert!(manager.connected_ids().is_empty());
    }
}
