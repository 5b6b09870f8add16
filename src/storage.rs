use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::ConnectionProfile;

/// JSON file of connection profiles keyed by profile id.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty store.
    pub fn load(&self) -> Result<BTreeMap<String, ConnectionProfile>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let profiles: BTreeMap<String, ConnectionProfile> = serde_json::from_str(&content)?;
        tracing::debug!(path = %self.path.display(), count = profiles.len(), "Profiles loaded");
        Ok(profiles)
    }

    /// Writes the full map, replacing the file contents.
    pub fn save(&self, profiles: &BTreeMap<String, ConnectionProfile>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(profiles)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = profiles.len(), "Profiles saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{DbConnectionOptions, MySqlOptions};
    use chrono::Utc;

    fn profile(id: &str) -> ConnectionProfile {
        let now = Utc::now();
        ConnectionProfile {
            id: id.to_string(),
            name: format!("profile {}", id),
            options: DbConnectionOptions::MySql(MySqlOptions {
                host: "db.internal".into(),
                port: 3306,
                database: "shop".into(),
                user: "app".into(),
                password: Some("pw".into()),
                ssl: true,
            }),
            created_at: now,
            updated_at: now,
            last_connected_at: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("nested").join("connections.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("nested").join("connections.json"));

        let mut profiles = BTreeMap::new();
        profiles.insert("a".to_string(), profile("a"));
        profiles.insert("b".to_string(), profile("b"));
        store.save(&profiles).unwrap();

        assert_eq!(store.load().unwrap(), profiles);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["a"]["type"], "mysql");
        assert!(raw["a"]["options"].get("type").is_none());
    }

    #[test]
    fn test_loads_records_written_by_other_clients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        fs::write(
            &path,
            r#"{
  "p1": {"id": "p1", "name": "local", "type": "postgres",
         "options": {"host": "localhost", "port": 5433, "database": "app", "user": "postgres", "password": "pw"}},
  "p2": {"id": "p2", "name": "shop", "type": "mysql",
         "options": {"host": "db", "database": "shop", "user": "root", "ssl": true},
         "createdAt": "2025-12-01T10:00:00Z", "updatedAt": "2025-12-02T10:00:00Z"}
}"#,
        )
        .unwrap();

        let store = ProfileStore::new(path);
        let profiles = store.load().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["p1"].adapter_type(), "postgres");
        assert_eq!(profiles["p2"].adapter_type(), "mysql");
        match &profiles["p1"].options {
            DbConnectionOptions::Postgres(o) => assert_eq!(o.port, 5433),
            other => panic!("unexpected options: {:?}", other),
        }
        assert_eq!(profiles["p2"].created_at.to_rfc3339(), "2025-12-01T10:00:00+00:00");

        store.save(&profiles).unwrap();
        assert_eq!(store.load().unwrap(), profiles);
    }

    #[test]
    fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ProfileStore::new(path).load().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
