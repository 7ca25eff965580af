//! Secrets read from the environment at startup.
//!
//! Secrets never come from the config file. Missing required values stop the
//! process before it binds a port.

use super::IdentityMode;
use crate::credentials::validate_key;
use crate::error::{Error, Result};
use crate::oauth::SUPPORTED_PROVIDERS;

/// OAuth client credentials for one provider.
#[derive(Clone)]
pub struct OAuthClient {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct Secrets {
    /// Base64 of 32 raw bytes, validated on load
    pub encryption_key: String,
    pub webhook_secret: String,
    pub identity_api_key: Option<String>,
    pub identity_admin_token: Option<String>,
    pub session_secret: Option<String>,
    pub oauth_clients: Vec<OAuthClient>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("encryption_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("identity_api_key", &self.identity_api_key.is_some())
            .field("identity_admin_token", &self.identity_admin_token.is_some())
            .field("session_secret", &self.session_secret.is_some())
            .field(
                "oauth_clients",
                &self
                    .oauth_clients
                    .iter()
                    .map(|client| client.provider.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Secrets {
    pub fn from_env(mode: IdentityMode) -> Result<Self> {
        Self::from_lookup(mode, |name| std::env::var(name).ok())
    }

    /// Reads secrets through `lookup`. Empty values count as missing.
    pub fn from_lookup(mode: IdentityMode, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| Error::Config(format!("{} is not set", name)))
        };

        let encryption_key = require("KEYWAY_ENCRYPTION_KEY")?;
        validate_key(&encryption_key)?;

        let webhook_secret = require("KEYWAY_WEBHOOK_SECRET")?;

        let (identity_api_key, identity_admin_token, session_secret) = match mode {
            IdentityMode::Local => (None, None, Some(require("KEYWAY_SESSION_SECRET")?)),
            IdentityMode::IdentityToolkit => (
                Some(require("KEYWAY_IDENTITY_API_KEY")?),
                Some(require("KEYWAY_IDENTITY_ADMIN_TOKEN")?),
                None,
            ),
        };

        // A provider is only usable with both halves of its credentials
        let oauth_clients = SUPPORTED_PROVIDERS
            .iter()
            .filter_map(|provider| {
                let prefix = format!("KEYWAY_OAUTH_{}", provider.to_uppercase());
                Some(OAuthClient {
                    provider: provider.to_string(),
                    client_id: get(&format!("{}_CLIENT_ID", prefix))?,
                    client_secret: get(&format!("{}_CLIENT_SECRET", prefix))?,
                })
            })
            .collect();

        Ok(Self {
            encryption_key,
            webhook_secret,
            identity_api_key,
            identity_admin_token,
            session_secret,
            oauth_clients,
        })
    }
}
