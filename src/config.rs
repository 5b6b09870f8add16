use std::path::PathBuf;
use std::time::Duration;

const PROFILE_FILE_NAME: &str = "connections.json";

/// Connection-pool limits applied to every adapter the registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub pool: PoolSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pool: PoolSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reads `SQLDESK_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("SQLDESK_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(max) = parse_number(&lookup, "SQLDESK_POOL_MAX_CONNECTIONS") {
            config.pool.max_connections = max.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(secs) = parse_number(&lookup, "SQLDESK_POOL_CONNECT_TIMEOUT_SECS") {
            config.pool.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number(&lookup, "SQLDESK_POOL_IDLE_TIMEOUT_SECS") {
            config.pool.idle_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILE_NAME)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid numeric setting");
            None
        }
    }
}

const APP_DIR_NAME: &str = "sqldesk";

/// Platform data directory joined with the application name.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".sqldesk"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_pool_defaults() {
        let pool = PoolSettings::default();
        assert_eq!(pool.max_connections, 10);
        assert_eq!(pool.connect_timeout, Duration::from_secs(10));
        assert_eq!(pool.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SQLDESK_DATA_DIR", "/tmp/sqldesk-test"),
            ("SQLDESK_POOL_MAX_CONNECTIONS", "4"),
            ("SQLDESK_POOL_IDLE_TIMEOUT_SECS", "abc"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/sqldesk-test"));
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(60));
        assert_eq!(
            config.profiles_path(),
            PathBuf::from("/tmp/sqldesk-test/connections.json")
        );
    }

    #[test]
    fn test_default_data_dir_is_platform_data_dir() {
        let config = AppConfig::from_lookup(|_| None);
        match dirs::data_dir() {
            Some(base) => assert_eq!(config.data_dir, base.join("sqldesk")),
            None => assert_eq!(config.data_dir, PathBuf::from(".sqldesk")),
        }
        assert_eq!(config.profiles_path(), config.data_dir.join("connections.json"));

        let blank = AppConfig::from_lookup(|k| (k == "SQLDESK_DATA_DIR").then(|| "  ".to_string()));
        assert_eq!(blank.data_dir, config.data_dir);
    }
}
