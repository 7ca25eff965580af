//! Encrypted credential storage for OAuth tokens.
//!
//! This module provides the credential vault: per-user, per-provider OAuth
//! tokens encrypted at rest with AES-256-GCM and refreshed transparently when
//! they expire.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialVault                    │
//! │  - get valid token / refresh             │
//! │  - save / delete / list connections      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Cipher                             │
//! │  - AES-256-GCM                           │
//! │  - Unique nonces per token               │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (trait)            │
//! │  - SQLite or in-memory                   │
//! │  - Ciphertext only                       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - All tokens encrypted at rest with AES-256-GCM
//! - Each token has a unique nonce (never reused)
//! - Master key must be 32 bytes (256 bits), held in memory only
//! - Decryption failures surface as `Error::Decryption`, never as "not connected"

use crate::error::{Error, Result};
use crate::oauth::TokenResponse;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;
mod store;
mod vault;

pub use encryption::{validate_key, Cipher};
pub use storage::SqliteCredentialStore;
pub use store::{CredentialStore, InMemoryCredentialStore};
pub use vault::CredentialVault;

/// Identity anchor, keyed by the identity provider's subject id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(uid: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// OAuth token for a connected provider, in plaintext.
///
/// Only ever lives in memory; the persisted form is [`StoredToken`].
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub provider: String,

    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires; `None` means it never does
    pub expires_at: Option<DateTime<Utc>>,

    pub token_type: String,

    /// Space-separated scopes granted by the provider
    pub scope: Option<String>,

    pub connected_at: DateTime<Utc>,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

impl OAuthToken {
    /// Normalizes a raw provider token response.
    ///
    /// An absolute `expires_at` wins over a relative `expires_in`. An expiry
    /// that cannot be represented is rejected rather than stored as "never".
    pub fn from_response(provider: &str, response: &TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = match (response.expires_at, response.expires_in) {
            (Some(epoch), _) => Some(Utc.timestamp_opt(epoch, 0).single().ok_or_else(|| {
                invalid_expiry(provider, format!("expires_at {} is out of range", epoch))
            })?),
            (None, Some(seconds)) => Some(
                TimeDelta::try_seconds(seconds)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| {
                        invalid_expiry(provider, format!("expires_in {} is out of range", seconds))
                    })?,
            ),
            (None, None) => None,
        };

        Ok(Self {
            provider: provider.to_string(),
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .filter(|token| !token.is_empty()),
            expires_at,
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope.clone(),
            connected_at: now,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

fn invalid_expiry(provider: &str, detail: String) -> Error {
    Error::ProviderUnavailable(format!("invalid token response from '{}': {}", provider, detail))
}

/// Persisted form of an [`OAuthToken`]: secrets hold ciphertext only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub provider: String,
    pub sealed_access_token: String,
    pub sealed_refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: String,
    pub scope: Option<String>,
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> TokenResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_from_response_with_expires_in() {
        let now = Utc::now();
        let token = OAuthToken::from_response(
            "google",
            &response(serde_json::json!({
                "access_token": "ya29.abc",
                "refresh_token": "1//refresh",
                "expires_in": 3600,
                "scope": "openid email"
            })),
            now,
        )
        .unwrap();

        assert_eq!(token.provider, "google");
        assert_eq!(token.access_token, "ya29.abc");
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(token.expires_at, Some(now + chrono::Duration::seconds(3600)));
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.scope.as_deref(), Some("openid email"));
    }

    #[test]
    fn test_absolute_expiry_wins() {
        let now = Utc::now();
        let token = OAuthToken::from_response(
            "adobe",
            &response(serde_json::json!({
                "access_token": "T",
                "expires_at": 1_900_000_000,
                "expires_in": 10,
                "token_type": "bearer"
            })),
            now,
        )
        .unwrap();

        assert_eq!(token.expires_at.unwrap().timestamp(), 1_900_000_000);
        assert_eq!(token.token_type, "bearer");
    }

    #[test]
    fn test_unrepresentable_expiry_rejected() {
        let now = Utc::now();

        for json in [
            serde_json::json!({ "access_token": "T", "expires_in": 1_000_000_000_000_000i64 }),
            serde_json::json!({ "access_token": "T", "expires_in": i64::MAX }),
            serde_json::json!({ "access_token": "T", "expires_at": i64::MAX }),
            serde_json::json!({ "access_token": "T", "expires_at": i64::MIN }),
        ] {
            let result = OAuthToken::from_response("google", &response(json.clone()), now);
            assert!(
                matches!(result, Err(Error::ProviderUnavailable(_))),
                "{} was accepted",
                json
            );
        }
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let mut token = OAuthToken::from_response(
            "google",
            &response(serde_json::json!({ "access_token": "T", "refresh_token": "" })),
            now,
        )
        .unwrap();

        // Empty refresh token is treated as absent
        assert!(token.refresh_token.is_none());

        // No expiry means never expires
        assert!(!token.is_expired_at(now + chrono::Duration::days(3650)));

        token.expires_at = Some(now);
        assert!(token.is_expired_at(now));
        assert!(!token.is_expired_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let token = OAuthToken::from_response(
            "google",
            &response(serde_json::json!({ "access_token": "super-secret", "refresh_token": "also-secret" })),
            Utc::now(),
        )
        .unwrap();

        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
    }
}
