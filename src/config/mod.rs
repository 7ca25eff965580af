mod secrets;
pub use secrets::{OAuthClient, Secrets};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

pub use crate::queue::NatsConfig;

/// Complete keyway configuration (tunables only, secrets live in [`Secrets`])
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public URL; sign-in links and OAuth redirects are built from it
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            base_url: default_base_url(),
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_check_revoked")]
    pub check_revoked: bool,
    /// Defaults to true when the base URL is https
    #[serde(default)]
    pub cookie_secure: Option<bool>,
}

fn default_session_ttl() -> u64 {
    60 * 60 * 24 * 14
}

fn default_check_revoked() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            check_revoked: default_check_revoked(),
            cookie_secure: None,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn cookie_secure(&self, base_url: &str) -> bool {
        self.cookie_secure
            .unwrap_or_else(|| base_url.starts_with("https://"))
    }
}

/// Webhook verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Maximum accepted clock skew between sender and receiver
    #[serde(default = "default_tolerance")]
    pub tolerance_seconds: i64,
}

fn default_tolerance() -> i64 {
    crate::webhook::DEFAULT_TOLERANCE_SECONDS
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            tolerance_seconds: default_tolerance(),
        }
    }
}

/// Per-collaborator timeouts (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout")]
    pub identity_seconds: u64,
    #[serde(default = "default_timeout")]
    pub token_endpoint_seconds: u64,
    #[serde(default = "default_timeout")]
    pub store_seconds: u64,
    #[serde(default = "default_timeout")]
    pub queue_seconds: u64,
}

fn default_timeout() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            identity_seconds: default_timeout(),
            token_endpoint_seconds: default_timeout(),
            store_seconds: default_timeout(),
            queue_seconds: default_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn identity(&self) -> Duration {
        Duration::from_secs(self.identity_seconds)
    }

    pub fn token_endpoint(&self) -> Duration {
        Duration::from_secs(self.token_endpoint_seconds)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_seconds)
    }

    pub fn queue(&self) -> Duration {
        Duration::from_secs(self.queue_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Credential store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_sqlite_path() -> String {
    "keyway.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Nats,
    Memory,
}

/// Event queue selection; NATS details live under `[nats]`
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Nats
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// In-process provider, for development
    Local,
    /// Google Identity Platform / Firebase Auth
    IdentityToolkit,
}

/// Identity provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_mode")]
    pub mode: IdentityMode,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_identity_api_base")]
    pub api_base: String,
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,
}

fn default_identity_mode() -> IdentityMode {
    IdentityMode::Local
}

fn default_identity_api_base() -> String {
    crate::identity::DEFAULT_API_BASE.to_string()
}

fn default_jwks_url() -> String {
    crate::identity::DEFAULT_JWKS_URL.to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: default_identity_mode(),
            project_id: None,
            api_base: default_identity_api_base(),
            jwks_url: default_jwks_url(),
        }
    }
}

/// OAuth connect flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a CSRF state stays redeemable
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

impl KeywayConfig {
    /// Loads `KEYWAY_CONFIG` if set (defaults otherwise), then applies
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("KEYWAY_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.state_cleanup_interval_seconds == 0 {
            return Err(Error::Config(
                "oauth.state_cleanup_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.oauth.state_expiry_seconds <= 0 {
            return Err(Error::Config(
                "oauth.state_expiry_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Overrides the commonly deployed settings from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("KEYWAY_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = lookup("KEYWAY_BASE_URL") {
            self.server.base_url = value;
        }
        if let Some(value) = lookup("KEYWAY_SQLITE_PATH") {
            self.storage.sqlite_path = value;
        }
        if let Some(value) = lookup("NATS_URL") {
            self.nats.url = value;
        }
        if let Some(value) = lookup("KEYWAY_NATS_SUBJECT") {
            self.nats.subject = value;
        }
        if let Some(value) = lookup("KEYWAY_IDENTITY_PROJECT_ID") {
            self.identity.project_id = Some(value);
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<KeywayConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read config file '{}': {}", path, e)))?;
    let config: KeywayConfig = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("invalid config file '{}': {}", path, e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = KeywayConfig::default();
        assert_eq!(config.server.base_url, "http://localhost:8080");
        assert_eq!(config.session.ttl_seconds, 1_209_600);
        assert!(config.session.check_revoked);
        assert_eq!(config.webhook.tolerance_seconds, 300);
        assert_eq!(config.timeouts.store(), Duration::from_secs(5));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.queue.backend, QueueBackend::Nats);
        assert_eq!(config.identity.mode, IdentityMode::Local);
        assert_eq!(config.oauth.state_expiry_seconds, 600);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_address = "127.0.0.1:9000"
            base_url = "https://keyway.example.com"

            [session]
            ttl_seconds = 3600
            check_revoked = false

            [webhook]
            tolerance_seconds = 60

            [timeouts]
            queue_seconds = 2

            [storage]
            backend = "memory"

            [queue]
            backend = "memory"

            [nats]
            url = "nats://example.com:4222"

            [identity]
            mode = "identity_toolkit"
            project_id = "my-project"
        "#;

        let config: KeywayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.session.ttl(), Duration::from_secs(3600));
        assert!(!config.session.check_revoked);
        assert_eq!(config.webhook.tolerance_seconds, 60);
        assert_eq!(config.timeouts.queue(), Duration::from_secs(2));
        assert_eq!(config.timeouts.identity(), Duration::from_secs(5));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.nats.url, "nats://example.com:4222");
        assert_eq!(config.nats.stream_name, "KEYWAY_WEBHOOKS");
        assert_eq!(config.identity.mode, IdentityMode::IdentityToolkit);
        assert_eq!(config.identity.project_id.as_deref(), Some("my-project"));
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[oauth]\nstate_cleanup_interval_seconds = 0").unwrap();

        let result = load_config(file.path().to_str().unwrap());
        assert!(matches!(result, Err(Error::Config(_))));

        let mut config = KeywayConfig::default();
        assert!(config.validate().is_ok());
        config.oauth.state_expiry_seconds = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cookie_secure_follows_base_url() {
        let session = SessionConfig::default();
        assert!(session.cookie_secure("https://keyway.example.com"));
        assert!(!session.cookie_secure("http://localhost:8080"));

        let forced = SessionConfig {
            cookie_secure: Some(false),
            ..SessionConfig::default()
        };
        assert!(!forced.cookie_secure("https://keyway.example.com"));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("KEYWAY_BASE_URL", "https://override.example.com"),
            ("NATS_URL", "nats://nats:4222"),
        ]);

        let mut config = KeywayConfig::default();
        config.apply_overrides(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.server.base_url, "https://override.example.com");
        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[webhook]\ntolerance_seconds = 120").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.webhook.tolerance_seconds, 120);
    }

    #[test]
    fn test_load_config_errors() {
        assert!(matches!(
            load_config("/nonexistent/keyway.toml"),
            Err(Error::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[webhook]\ntolerance_seconds = \"soon\"").unwrap();
        assert!(matches!(
            load_config(file.path().to_str().unwrap()),
            Err(Error::Config(_))
        ));
    }
}
