//! Client configuration.
//!
//! A [`StoreConfig`] can come from environment variables alone
//! ([`StoreConfig::from_env`]) or from a YAML file ([`StoreConfig::from_file`])
//! with the same variables layered on top. Every field has a default, so an
//! empty file or an empty environment yields a client for a local node.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `ENTITYSTORE_BACKEND` | `backend` | `http` |
//! | `ENTITYSTORE_HOST` | `host` | `localhost` |
//! | `ENTITYSTORE_STREAM_PORT` | `stream_port` | `2113` |
//! | `ENTITYSTORE_HTTP_PORT` | `http_port` | `2113` |
//! | `ENTITYSTORE_USERNAME` | `username` | none |
//! | `ENTITYSTORE_PASSWORD` | `password` | none |
//! | `ENTITYSTORE_PAGE_SIZE` | `page_size` | `200` |
//! | `ENTITYSTORE_QUERY_POLL_MS` | `query_poll_ms` | `250` |

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use entitystore_db::Credentials;
use serde::Deserialize;

/// Environment variable selecting the backend.
pub const ENV_BACKEND: &str = "ENTITYSTORE_BACKEND";
/// Environment variable holding the server host name or address.
pub const ENV_HOST: &str = "ENTITYSTORE_HOST";
/// Environment variable holding the stream endpoint port.
pub const ENV_STREAM_PORT: &str = "ENTITYSTORE_STREAM_PORT";
/// Environment variable holding the management endpoint port.
pub const ENV_HTTP_PORT: &str = "ENTITYSTORE_HTTP_PORT";
/// Environment variable holding the user name.
pub const ENV_USERNAME: &str = "ENTITYSTORE_USERNAME";
/// Environment variable holding the password.
pub const ENV_PASSWORD: &str = "ENTITYSTORE_PASSWORD";
/// Environment variable holding the replay page size.
pub const ENV_PAGE_SIZE: &str = "ENTITYSTORE_PAGE_SIZE";
/// Environment variable holding the query poll interval in milliseconds.
pub const ENV_QUERY_POLL_MS: &str = "ENTITYSTORE_QUERY_POLL_MS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is present but unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Which log backend the client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// EventStoreDB over its HTTP API.
    #[default]
    Http,
    /// In-process node; nothing leaves the process.
    Memory,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "eventstore" => Ok(Self::Http),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid(format!("unknown backend: {other}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Connection and tuning settings for an [`EntityStore`](crate::EntityStore).
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to use.
    pub backend: BackendKind,
    /// Host name or address of the log service.
    pub host: String,
    /// Port for stream traffic.
    pub stream_port: u16,
    /// Port for management and query traffic.
    pub http_port: u16,
    /// User name for basic auth. Must be set together with `password`.
    pub username: Option<String>,
    /// Password for basic auth.
    pub password: Option<String>,
    /// Records fetched per page while replaying a stream.
    pub page_size: usize,
    /// Delay between polls for a query result, in milliseconds.
    pub query_poll_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            host: "localhost".to_owned(),
            stream_port: 2113,
            http_port: 2113,
            username: None,
            password: None,
            page_size: 200,
            query_poll_ms: 250,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("stream_port", &self.stream_port)
            .field("http_port", &self.http_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("page_size", &self.page_size)
            .field("query_poll_ms", &self.query_poll_ms)
            .finish()
    }
}

impl StoreConfig {
    /// Configuration for the in-process backend.
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Load configuration from `ENTITYSTORE_*` environment variables.
    ///
    /// Unset variables fall back to the defaults listed in the module docs.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self::default().apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yml::from_str(&contents)?;
        let config = config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields with any variables `lookup` resolves.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend = backend.parse()?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_STREAM_PORT) {
            self.stream_port = parse_var(ENV_STREAM_PORT, &port)?;
        }
        if let Some(port) = lookup(ENV_HTTP_PORT) {
            self.http_port = parse_var(ENV_HTTP_PORT, &port)?;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = Some(password);
        }
        if let Some(size) = lookup(ENV_PAGE_SIZE) {
            self.page_size = parse_var(ENV_PAGE_SIZE, &size)?;
        }
        if let Some(ms) = lookup(ENV_QUERY_POLL_MS) {
            self.query_poll_ms = parse_var(ENV_QUERY_POLL_MS, &ms)?;
        }
        Ok(self)
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendKind::Http && self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_owned()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_owned()));
        }
        if self.query_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "query_poll_ms must be at least 1".to_owned(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::Invalid(
                "username and password must be set together".to_owned(),
            ));
        }
        Ok(())
    }

    /// Basic-auth credentials, if configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Delay between polls for a query result.
    pub const fn query_poll_interval(&self) -> Duration {
        Duration::from_millis(self.query_poll_ms)
    }
}

fn parse_var<V>(key: &str, raw: &str) -> Result<V, ConfigError>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("invalid {key}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.page_size, 200);
        assert_eq!(config.query_poll_interval(), Duration::from_millis(250));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_BACKEND, "memory"),
            (ENV_HOST, "es.internal"),
            (ENV_STREAM_PORT, "1113"),
            (ENV_HTTP_PORT, "2114"),
            (ENV_USERNAME, "admin"),
            (ENV_PASSWORD, "changeit"),
            (ENV_PAGE_SIZE, "50"),
            (ENV_QUERY_POLL_MS, "10"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.host, "es.internal");
        assert_eq!(config.stream_port, 1113);
        assert_eq!(config.http_port, 2114);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.query_poll_ms, 10);
        assert_eq!(config.credentials().unwrap().username, "admin");
    }

    #[test]
    fn bad_number_is_reported_with_key() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_PAGE_SIZE, "lots")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PAGE_SIZE));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(StoreConfig::from_lookup(lookup(&[(ENV_BACKEND, "sqlite")])).is_err());
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = StoreConfig::parse("host: es.example\npage_size: 10\n").unwrap();
        assert_eq!(config.host, "es.example");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.http_port, 2113);
        assert_eq!(config.backend, BackendKind::Http);
    }

    #[test]
    fn yaml_backend_is_lowercase() {
        let config = StoreConfig::parse("backend: memory\n").unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn invalid_yaml_is_a_yaml_error() {
        let err = StoreConfig::parse("page_size: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn zero_page_size_is_invalid() {
        assert!(matches!(
            StoreConfig::parse("page_size: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn credentials_must_be_paired() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_USERNAME, "admin")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let config = StoreConfig {
            username: Some("admin".to_owned()),
            password: Some("changeit".to_owned()),
            ..StoreConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("changeit"));
    }
}
