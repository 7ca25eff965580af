//! Identity provider seam.
//!
//! The session flow never talks to an identity backend directly. It goes
//! through [`IdentityGateway`], which has two adapters:
//!
//! - [`IdentityToolkitGateway`]: Google Identity Platform / Firebase Auth REST API
//! - [`LocalIdentityGateway`]: self-contained provider for development and tests

mod local;
mod toolkit;

pub use local::LocalIdentityGateway;
pub use toolkit::{IdentityToolkitGateway, ToolkitConfig, DEFAULT_API_BASE, DEFAULT_JWKS_URL};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Short-lived proof of identity returned when a one-time code is redeemed.
#[derive(Clone)]
pub struct IdentityAssertion {
    pub id_token: String,
    pub uid: String,
    pub email: String,
}

impl std::fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityAssertion")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .finish()
    }
}

/// Signed bearer token carried in the session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Identity claims carried by a verified session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Claims {
    pub uid: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auth_time: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Mints a one-time sign-in link for `email` that lands on `continue_url`.
    ///
    /// The returned link carries the one-time code in its `oobCode` parameter.
    async fn generate_sign_in_link(&self, email: &str, continue_url: &str) -> Result<String>;

    /// Redeems a one-time code. Fails with `Authentication` if the provider
    /// rejects it.
    async fn exchange_code(&self, email: &str, code: &str) -> Result<IdentityAssertion>;

    /// Mints a session token valid for `ttl` from a fresh assertion.
    async fn create_session(&self, id_token: &str, ttl: Duration) -> Result<SessionToken>;

    /// Verifies a session token. Missing, malformed, expired and (when
    /// `check_revoked` is set) revoked sessions all fail with `Authentication`.
    async fn verify_session(&self, token: &str, check_revoked: bool) -> Result<Claims>;
}

/// Converts a Unix timestamp claim, rejecting values chrono cannot represent.
pub(crate) fn claim_time(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        crate::error::Error::Authentication(format!("invalid timestamp claim: {}", seconds))
    })
}
