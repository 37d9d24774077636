//! Server configuration module
//!
//! Configuration comes from an optional JSON file named by `DUCAT_CONFIG`,
//! with `DUCAT_*` environment variable overrides applied on top.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use ducat_core::backend::BackendConfig;
use ducat_core::{AddMode, PagePolicy, ServicePolicy};

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server port (default: 5000)
    pub port: u16,
    /// Server host as IPv4 octets (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 10)
    pub body_limit_mb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false; set true in production configs)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Storage backend selection (default: empty in-memory store)
    pub backend: BackendConfig,
    /// Credential tables; leaving both empty runs the instance open
    pub auth: AuthConfig,
    /// Protocol policy knobs
    pub taxii: TaxiiConfig,
}

/// Credentials for the two supported schemes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Username to argon2 password hash, for HTTP Basic
    pub users: BTreeMap<String, String>,
    /// API key to the username it authenticates as, for `Authorization: Token`
    pub api_keys: BTreeMap<String, String>,
}

impl AuthConfig {
    /// Whether any credentials are configured at all.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.api_keys.is_empty()
    }
}

/// Paging and write-mode policy served to the protocol layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaxiiConfig {
    /// Page size when a request sends no `limit` (default: 100)
    pub default_page_size: usize,
    /// Hard cap on requested page sizes (default: 100)
    pub max_page_size: usize,
    /// Whether adds resolve inline or in a background task (default: inline)
    pub add_mode: AddMode,
}

impl Default for TaxiiConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 100,
            add_mode: AddMode::Inline,
        }
    }
}

impl TaxiiConfig {
    pub fn service_policy(&self) -> ServicePolicy {
        ServicePolicy {
            page: PagePolicy {
                default_limit: self.default_page_size,
                max_limit: self.max_page_size,
            },
            add_mode: self.add_mode,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 10,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            taxii: TaxiiConfig::default(),
        }
    }
}

impl Config {
    /// Parse a JSON configuration file. Unset sections keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load configuration: the `DUCAT_CONFIG` file when set, then
    /// environment variable overrides on top.
    pub fn from_env() -> std::io::Result<Self> {
        let mut config = match std::env::var("DUCAT_CONFIG") {
            Ok(path) => {
                let config = Self::from_file(&path)?;
                tracing::info!(path = %path, "Loaded configuration file");
                config
            }
            Err(_) => Self::default(),
        };

        config.port = std::env::var("DUCAT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.port);

        config.host = std::env::var("DUCAT_HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(config.host);

        config.allowed_origins = std::env::var("DUCAT_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .or(config.allowed_origins);

        config.body_limit_mb = std::env::var("DUCAT_BODY_LIMIT_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.body_limit_mb);

        config.timeout_secs = std::env::var("DUCAT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.timeout_secs);

        config.rate_limit_enabled = std::env::var("DUCAT_RATE_LIMIT_ENABLED")
            .ok()
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(config.rate_limit_enabled);

        config.rate_limit_per_sec = std::env::var("DUCAT_RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.rate_limit_per_sec);

        config.rate_limit_burst = std::env::var("DUCAT_RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.rate_limit_burst);

        // Backend overrides, most specific first: a database URL selects
        // postgres, a data directory the read-only tree, a seed file the
        // memory store.
        if let Ok(url) = std::env::var("DUCAT_DATABASE_URL") {
            config.backend = BackendConfig::Postgres {
                url,
                max_connections: std::env::var("DUCAT_DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                seed_file: std::env::var("DUCAT_SEED_FILE").ok().map(Into::into),
            };
        } else if let Ok(root) = std::env::var("DUCAT_DATA_DIR") {
            config.backend = BackendConfig::Directory { root: root.into() };
        } else if let Ok(seed_file) = std::env::var("DUCAT_SEED_FILE") {
            config.backend = BackendConfig::Memory {
                seed_file: Some(seed_file.into()),
                persist: std::env::var("DUCAT_PERSIST")
                    .map(|v| v.to_lowercase() == "true")
                    .unwrap_or(false),
            };
        }

        Ok(config)
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert!(!config.rate_limit_enabled);
        assert!(config.auth.is_empty());
        assert!(matches!(
            config.backend,
            BackendConfig::Memory {
                seed_file: None,
                persist: false
            }
        ));
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:5000");
    }

    #[test]
    fn test_config_file_sections() {
        let config: Config = serde_json::from_str(
            r#"{
                "port": 7000,
                "host": [0, 0, 0, 0],
                "backend": { "type": "directory", "root": "/var/lib/stix" },
                "auth": {
                    "users": { "admin": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$x" },
                    "api_keys": { "123456": "admin" }
                },
                "taxii": { "max_page_size": 20, "add_mode": "deferred" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.host, [0, 0, 0, 0]);
        assert!(matches!(config.backend, BackendConfig::Directory { .. }));
        assert_eq!(config.auth.api_keys["123456"], "admin");
        assert_eq!(config.taxii.max_page_size, 20);
        assert_eq!(config.taxii.add_mode, AddMode::Deferred);
        // Unset sections keep defaults
        assert_eq!(config.taxii.default_page_size, 100);
        assert_eq!(config.body_limit_mb, 10);
    }

    #[test]
    fn test_service_policy_conversion() {
        let taxii = TaxiiConfig {
            default_page_size: 50,
            max_page_size: 200,
            add_mode: AddMode::Deferred,
        };
        let policy = taxii.service_policy();
        assert_eq!(policy.page.default_limit, 50);
        assert_eq!(policy.page.max_limit, 200);
        assert_eq!(policy.add_mode, AddMode::Deferred);
    }
}
