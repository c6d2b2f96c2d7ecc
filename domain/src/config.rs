//! Centralized configuration for the user registry.
//!
//! All environment variables are loaded and validated up front to fail fast
//! on misconfiguration rather than on first use.

use std::env;
use std::fmt;

use crate::adapters::cached_repo::DEFAULT_CACHE_SIZE;

/// API key used when `API_KEY` is unset. Only meant for local runs.
pub const DEV_API_KEY: &str = "local-dev";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Application configuration handed to the services.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Connection string of the backing store (default: `memory://`)
    pub database_url: String,
    pub api_key: String,
    pub debug: bool,
    /// Upper bound for pooled connections (default: 100)
    pub max_connections: u32,
    pub allowed_hosts: Vec<String>,
    /// Entries kept by read caches (default: 1000, 0 disables)
    pub cache_size: usize,
    pub log_format: LogFormat,
}

impl Config {
    pub fn new(database_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            api_key: api_key.into(),
            debug: false,
            max_connections: 100,
            allowed_hosts: Vec::new(),
            cache_size: DEFAULT_CACHE_SIZE,
            log_format: LogFormat::Pretty,
        }
    }

    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| "memory://".into());
        let api_key = lookup("API_KEY").unwrap_or_else(|| DEV_API_KEY.into());

        let debug = matches!(
            lookup("DEBUG").unwrap_or_default().to_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        let max_connections = match lookup("MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError {
                field: "MAX_CONNECTIONS",
                message: format!("Invalid number '{}': {}", raw, e),
            })?,
            None => 100,
        };

        let cache_size = match lookup("CACHE_SIZE") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| ConfigError {
                field: "CACHE_SIZE",
                message: format!("Invalid number '{}': {}", raw, e),
            })?,
            None => DEFAULT_CACHE_SIZE,
        };

        let allowed_hosts: Vec<String> = lookup("ALLOWED_HOSTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let log_format =
            LogFormat::from_str(&lookup("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        let config = Self {
            database_url,
            api_key,
            debug,
            max_connections,
            allowed_hosts,
            cache_size,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError {
                field: "DATABASE_URL",
                message: "database_url is required".into(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError {
                field: "API_KEY",
                message: "api_key is required".into(),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError {
                field: "MAX_CONNECTIONS",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        if self.api_key == DEV_API_KEY {
            tracing::warn!(
                "API_KEY not set: using the built-in development key. DO NOT USE IN PRODUCTION."
            );
        }
        if self.debug {
            tracing::warn!("DEBUG is enabled.");
        }
    }
}

// Hand-written so the API key never reaches logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("api_key", &"<redacted>")
            .field("debug", &self.debug)
            .field("max_connections", &self.max_connections)
            .field("allowed_hosts", &self.allowed_hosts)
            .field("cache_size", &self.cache_size)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.database_url, "memory://");
        assert_eq!(cfg.api_key, DEV_API_KEY);
        assert!(!cfg.debug);
        assert_eq!(cfg.max_connections, 100);
        assert_eq!(cfg.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.allowed_hosts.is_empty());
    }

    #[test]
    fn parses_values() {
        let cfg = load(&[
            ("DATABASE_URL", "test://"),
            ("API_KEY", "secret"),
            ("DEBUG", "Yes"),
            ("MAX_CONNECTIONS", "8"),
            ("CACHE_SIZE", "2"),
            ("ALLOWED_HOSTS", "a.example, b.example,,"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert!(cfg.debug);
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.cache_size, 2);
        assert_eq!(cfg.allowed_hosts, vec!["a.example", "b.example"]);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_numbers_and_empty_required_fields() {
        let err = load(&[("MAX_CONNECTIONS", "many")]).unwrap_err();
        assert_eq!(err.field, "MAX_CONNECTIONS");
        let err = load(&[("MAX_CONNECTIONS", "0")]).unwrap_err();
        assert_eq!(err.field, "MAX_CONNECTIONS");
        let err = load(&[("API_KEY", "  ")]).unwrap_err();
        assert_eq!(err.field, "API_KEY");
        let err = load(&[("DATABASE_URL", "")]).unwrap_err();
        assert_eq!(err.field, "DATABASE_URL");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let cfg = Config::new("test://", "super-secret");
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }
}
