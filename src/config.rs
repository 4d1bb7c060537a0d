use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::DEFAULT_CHANGE_LOG_RETENTION;
use crate::store::StoreOptions;

const ENV_DATA_DIR: &str = "LOCALCHAT_DATA_DIR";
const ENV_DB_FILE: &str = "LOCALCHAT_DB_FILE";
const ENV_POLL_MS: &str = "LOCALCHAT_POLL_MS";
const ENV_RETENTION: &str = "LOCALCHAT_CHANGE_LOG_RETENTION";
const ENV_EXPORT_PREFIX: &str = "LOCALCHAT_EXPORT_PREFIX";

const DEFAULT_DB_FILE: &str = "localchat.sqlite";
const DEFAULT_POLL_MS: u64 = 250;
const DEFAULT_EXPORT_PREFIX: &str = "localchat";

// Where the store lives and how contexts keep in sync
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
    // 0 disables background polling; contexts then only sync after their own writes
    pub poll_interval_ms: u64,
    pub change_log_retention: i64,
    pub export_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: DEFAULT_DB_FILE.to_string(),
            poll_interval_ms: DEFAULT_POLL_MS,
            change_log_retention: DEFAULT_CHANGE_LOG_RETENTION,
            export_prefix: DEFAULT_EXPORT_PREFIX.to_string(),
        }
    }
}

impl StoreConfig {
    /// Reads the `LOCALCHAT_*` environment variables. Unset or malformed values keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let config = Self {
            data_dir: lookup(ENV_DATA_DIR)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_file: lookup(ENV_DB_FILE)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.db_file),
            poll_interval_ms: parse_or(ENV_POLL_MS, lookup(ENV_POLL_MS), defaults.poll_interval_ms),
            change_log_retention: parse_or(ENV_RETENTION, lookup(ENV_RETENTION), defaults.change_log_retention)
                .max(1),
            export_prefix: lookup(ENV_EXPORT_PREFIX)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.export_prefix),
        };
        log::debug!("Loaded store config: {:?}", config);
        config
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            poll_interval: (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms)),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("localchat"))
        .unwrap_or_else(|| PathBuf::from(".localchat"))
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring malformed {}={:?}, using the default", key, raw);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> StoreConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        StoreConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]);
        assert_eq!(config, StoreConfig::default());
        assert!(config.database_path().ends_with("localchat.sqlite"));
        assert_eq!(config.store_options().poll_interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            (ENV_DATA_DIR, "/tmp/lc"),
            (ENV_DB_FILE, "test.db"),
            (ENV_POLL_MS, "0"),
            (ENV_RETENTION, "50"),
            (ENV_EXPORT_PREFIX, "backup"),
        ]);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/lc/test.db"));
        assert_eq!(config.store_options().poll_interval, None);
        assert_eq!(config.change_log_retention, 50);
        assert_eq!(config.export_prefix, "backup");
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = config_from(&[(ENV_POLL_MS, "soon"), (ENV_RETENTION, "-5")]);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_MS);
        // Retention is clamped to at least one record
        assert_eq!(config.change_log_retention, 1);
    }
}
