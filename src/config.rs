use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

/// Client configuration (config.toml + FRAMENOTE_* env overrides)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Empty means same-origin; only absolute URLs can actually be sent.
    #[serde(default)]
    pub base_url: String,
    /// Whole-request deadline for ordinary calls and polls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Longest silence tolerated while a transfer or stream body is flowing
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_task_interval_ms")]
    pub task_interval_ms: u64,
    #[serde(default = "default_payment_interval_ms")]
    pub payment_interval_ms: u64,
    #[serde(default = "default_payment_error_interval_ms")]
    pub payment_error_interval_ms: u64,
    #[serde(default = "default_payment_max_wait_secs")]
    pub payment_max_wait_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentConfig {
    #[serde(default = "default_return_marker")]
    pub return_marker: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_read_timeout_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    format!("framenote/{}", env!("CARGO_PKG_VERSION"))
}
fn default_task_interval_ms() -> u64 {
    2000
}
fn default_payment_interval_ms() -> u64 {
    2000
}
fn default_payment_error_interval_ms() -> u64 {
    3000
}
fn default_payment_max_wait_secs() -> u64 {
    600
}
fn default_return_marker() -> String {
    "payment-return".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            task_interval_ms: default_task_interval_ms(),
            payment_interval_ms: default_payment_interval_ms(),
            payment_error_interval_ms: default_payment_error_interval_ms(),
            payment_max_wait_secs: default_payment_max_wait_secs(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            return_marker: default_return_marker(),
        }
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}

impl PollingConfig {
    pub fn task_interval(&self) -> Duration {
        Duration::from_millis(self.task_interval_ms)
    }

    pub fn payment_interval(&self) -> Duration {
        Duration::from_millis(self.payment_interval_ms)
    }

    pub fn payment_error_interval(&self) -> Duration {
        Duration::from_millis(self.payment_error_interval_ms)
    }

    pub fn payment_max_wait(&self) -> Duration {
        Duration::from_secs(self.payment_max_wait_secs)
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path`, falling back to defaults when the file does not exist,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {:?}, using defaults", path);
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply FRAMENOTE_* overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("FRAMENOTE_API_BASE") {
            self.api.base_url = base;
        }
        if let Some(value) = lookup("FRAMENOTE_TIMEOUT_SECS") {
            self.api.timeout_secs = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "FRAMENOTE_TIMEOUT_SECS",
                value,
            })?;
        }
        if let Some(path) = lookup("FRAMENOTE_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Configured database path, or the platform default
    pub fn database_path(&self) -> Result<PathBuf, String> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::paths::get_database_path(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.api.base_url, "");
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.api.read_timeout(), Duration::from_secs(120));
        assert_eq!(config.polling.task_interval(), Duration::from_millis(2000));
        assert_eq!(config.polling.payment_interval(), Duration::from_millis(2000));
        assert_eq!(config.polling.payment_error_interval(), Duration::from_millis(3000));
        assert_eq!(config.polling.payment_max_wait(), Duration::from_secs(600));
        assert_eq!(config.payment.return_marker, "payment-return");
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [api]
            base_url = "https://framenote.example"

            [polling]
            task_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://framenote.example");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.polling.task_interval_ms, 500);
        assert_eq!(config.polling.payment_error_interval_ms, 3000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FRAMENOTE_API_BASE", "http://127.0.0.1:8000"),
            ("FRAMENOTE_TIMEOUT_SECS", "12"),
            ("FRAMENOTE_DB_PATH", "/tmp/fn.db"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.api.timeout_secs, 12);
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/fn.db"));
    }

    #[test]
    fn test_bad_env_timeout() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "FRAMENOTE_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.polling, PollingConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbase_url = 1").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
