use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::events::LinkPolicy;
use crate::ledger::linker::{DEFAULT_MAX_APPEND_ATTEMPTS, DEFAULT_STORAGE_TIMEOUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub storage_timeout_ms: u64,
    pub max_append_attempts: u32,
    pub link_policy: LinkPolicy,
    pub max_recent_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://grading-ledger.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            storage_timeout_ms: DEFAULT_STORAGE_TIMEOUT.as_millis() as u64,
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
            link_policy: LinkPolicy::Strict,
            max_recent_limit: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, with defaults
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> Result<Self, LedgerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = AppConfig {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            server_host: lookup("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or(&lookup, "SERVER_PORT", defaults.server_port)?,
            storage_timeout_ms: parse_or(
                &lookup,
                "LEDGER_STORAGE_TIMEOUT_MS",
                defaults.storage_timeout_ms,
            )?,
            max_append_attempts: parse_or(
                &lookup,
                "LEDGER_MAX_APPEND_ATTEMPTS",
                defaults.max_append_attempts,
            )?,
            link_policy: parse_or(&lookup, "LEDGER_LINK_POLICY", defaults.link_policy)?,
            max_recent_limit: parse_or(
                &lookup,
                "LEDGER_MAX_RECENT_LIMIT",
                defaults.max_recent_limit,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self, LedgerError> {
        info!("Loading ledger configuration from: {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Failed to read {:?}: {}", path, e))
        })?;

        let config: AppConfig = toml::from_str(&contents).map_err(|e| {
            LedgerError::Config(format!("Failed to parse {:?}: {}", path, e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.storage_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "storage_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_append_attempts == 0 {
            return Err(LedgerError::Config(
                "max_append_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_recent_limit == 0 {
            return Err(LedgerError::Config(
                "max_recent_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, LedgerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| LedgerError::Config(format!("Invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_from(lookup_in(&[])).unwrap();

        assert_eq!(config.database_url, "sqlite://grading-ledger.db");
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.storage_timeout(), DEFAULT_STORAGE_TIMEOUT);
        assert_eq!(config.max_append_attempts, DEFAULT_MAX_APPEND_ATTEMPTS);
        assert_eq!(config.link_policy, LinkPolicy::Strict);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::load_from(lookup_in(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("SERVER_PORT", "8080"),
            ("LEDGER_STORAGE_TIMEOUT_MS", "250"),
            ("LEDGER_LINK_POLICY", "degraded"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.storage_timeout(), Duration::from_millis(250));
        assert_eq!(config.link_policy, LinkPolicy::Degraded);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::load_from(lookup_in(&[("SERVER_PORT", "not-a-port")])).is_err());
        assert!(AppConfig::load_from(lookup_in(&[("LEDGER_MAX_APPEND_ATTEMPTS", "0")])).is_err());
        assert!(AppConfig::load_from(lookup_in(&[("LEDGER_LINK_POLICY", "yolo")])).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url = \"sqlite:///var/lib/ledger.db\"\nlink_policy = \"degraded\"\nmax_recent_limit = 25"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_url, "sqlite:///var/lib/ledger.db");
        assert_eq!(config.link_policy, LinkPolicy::Degraded);
        assert_eq!(config.max_recent_limit, 25);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_from_missing_file() {
        let result = AppConfig::from_file(Path::new("/nonexistent/ledger.toml"));
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }
}
