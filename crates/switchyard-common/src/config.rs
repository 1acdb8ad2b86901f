//! Gateway configuration
//!
//! The configuration is loaded once at startup from a YAML or JSON file and
//! treated as an immutable snapshot for the lifetime of the process.
//!
//! ```yaml
//! policies:
//!   - name: modern
//!     routes:
//!       - endpoint: /
//!         backend: http://localhost:9100
//!       - endpoint: /remote.php/
//!         backend: http://localhost:9140
//!         apache_vhost: true
//! policy_selector:
//!   kind: migration
//!   params:
//!     acc_found_policy: modern
//!     acc_not_found_policy: legacy
//! token_manager:
//!   jwt_secret: change-me
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address for the gateway
pub const DEFAULT_ADDR: &str = "0.0.0.0:9200";

/// Endpoint of the catch-all route of a policy
pub const ROOT_ENDPOINT: &str = "/";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the file
        path: PathBuf,
        /// Parser error message
        message: String,
    },

    /// The configuration is structurally valid but semantically wrong
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging setup
    pub log: LogConfig,
    /// HTTP listener
    pub http: HttpConfig,
    /// Backend clusters and their routes, in configuration order
    pub policies: Vec<Policy>,
    /// Descriptor of the policy selection strategy
    pub policy_selector: PolicySelectorConfig,
    /// Signing material for identity assertions
    pub token_manager: TokenManagerConfig,
    /// Account directory service
    pub directory: ServiceEndpoint,
    /// Role assignment service
    pub roles: ServiceEndpoint,
    /// Account cache sizing
    pub account_cache: AccountCacheConfig,
    /// Identity middleware toggle
    pub account_uuid: AccountUuidConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    /// Human-readable output instead of JSON
    pub pretty: bool,
    /// ANSI colors (only honoured with `pretty`)
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
            color: false,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Socket address to bind
    pub addr: String,
    /// PEM certificate; TLS is enabled when both cert and key are set
    pub tls_cert: Option<PathBuf>,
    /// PEM private key
    pub tls_key: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl HttpConfig {
    /// Certificate and key paths, if TLS is configured
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// A named backend cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy name
    pub name: String,
    /// Forwarding rules
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// How a route endpoint is matched against a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    /// Endpoint is a path prefix
    #[default]
    Prefix,
    /// Endpoint is a path prefix plus required query parameters
    Query,
    /// Endpoint is a regular expression over the path
    Regex,
}

/// One forwarding rule within a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Matching mode
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
    /// Path prefix, query endpoint or pattern, depending on `route_type`
    pub endpoint: String,
    /// Backend base URL
    pub backend: String,
    /// Overwrite the outbound Host with the backend host
    #[serde(default, alias = "apache-vhost")]
    pub apache_vhost: bool,
}

impl Route {
    /// Prefix route without virtual-host rewriting
    pub fn prefix(endpoint: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            route_type: RouteType::Prefix,
            endpoint: endpoint.into(),
            backend: backend.into(),
            apache_vhost: false,
        }
    }
}

/// Policy strategy descriptor: a kind plus an opaque parameter bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySelectorConfig {
    /// Strategy kind (`static_policy` or `migration`)
    pub kind: String,
    /// Strategy specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Default for PolicySelectorConfig {
    fn default() -> Self {
        Self {
            kind: "static_policy".to_string(),
            params: serde_json::json!({ "policy": "default" }),
        }
    }
}

/// Token signing configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenManagerConfig {
    /// Shared HMAC secret
    pub jwt_secret: String,
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("jwt_secret", &"<redacted>")
            .finish()
    }
}

/// Address and timeout of an external service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoint {
    /// Base URL
    pub url: String,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ServiceEndpoint {
    fn default() -> Self {
        Self {
            url: "http://localhost:9181".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Account cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountCacheConfig {
    /// Maximum number of cached accounts
    pub size: usize,
    /// Validity window of an entry in seconds
    pub ttl_secs: u64,
}

impl Default for AccountCacheConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            ttl_secs: 300,
        }
    }
}

/// Identity middleware toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountUuidConfig {
    /// Run the identity middleware in front of the proxy
    pub enabled: bool,
}

impl Default for AccountUuidConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as YAML.
    /// The result is validated before it is returned.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config: Config = if is_json {
            serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&data).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err(ConfigError::Invalid("policy name must not be empty".into()));
            }
            if !names.insert(policy.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate policy: {}",
                    policy.name
                )));
            }

            let mut endpoints = HashSet::new();
            for route in &policy.routes {
                if route.endpoint.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "policy {} has a route with an empty endpoint",
                        policy.name
                    )));
                }
                if !endpoints.insert(route.endpoint.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "policy {} has more than one route for endpoint {}",
                        policy.name, route.endpoint
                    )));
                }
            }
        }

        if self.http.tls_cert.is_some() != self.http.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "http.tls_cert and http.tls_key must be set together".into(),
            ));
        }

        if self.policy_selector.kind.is_empty() {
            return Err(ConfigError::Invalid(
                "policy_selector.kind must not be empty".into(),
            ));
        }

        if self.account_uuid.enabled && self.token_manager.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "token_manager.jwt_secret is required when account_uuid is enabled".into(),
            ));
        }

        if self.account_cache.size == 0 {
            return Err(ConfigError::Invalid(
                "account_cache.size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
