//! OAuth 2.0 plumbing for connecting content platforms.
//!
//! Implements the authorization code flow:
//! 1. Signed-in user hits GET /oauth/:provider/connect → redirect to provider
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to /oauth/:provider/callback
//! 4. Code is exchanged for tokens, which the vault encrypts and stores
//!
//! Refreshing later goes through the same [`TokenEndpoint`].

mod exchange;
mod provider;
mod state_manager;

pub use exchange::HttpTokenEndpoint;
pub use provider::{is_supported_provider, ProviderConfig, ProviderRegistry, SUPPORTED_PROVIDERS};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// OAuth token response (standard OAuth 2.0)
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, relative to receipt
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry as Unix seconds, when a client already computed it
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A provider's token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse>;

    /// `grant_type=refresh_token`
    ///
    /// Fails with `AuthExpired` when the provider rejects the grant and
    /// `ProviderUnavailable` on network failure.
    async fn refresh(&self, provider: &ProviderConfig, refresh_token: &str) -> Result<TokenResponse>;
}
