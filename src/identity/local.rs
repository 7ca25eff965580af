//! Self-contained identity provider for development and tests.
//!
//! One-time codes live in memory, uids are assigned per email on first sign-in
//! and sessions are HS256 JWTs signed with a configured secret.

use super::{claim_time, Claims, IdentityAssertion, IdentityGateway, SessionToken};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const ISSUER: &str = "keyway-local";
const LINK_BASE: &str = "https://keyway.local/__/auth/action";
const CODE_TTL_SECONDS: i64 = 3600;
const ID_TOKEN_TTL_SECONDS: i64 = 3600;

const TYP_ID: &str = "id";
const TYP_SESSION: &str = "session";

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    email: String,
    iat: i64,
    exp: i64,
    auth_time: i64,
    iss: String,
    typ: String,
}

struct PendingCode {
    email: String,
    issued_at: i64,
}

pub struct LocalIdentityGateway {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    codes: DashMap<String, PendingCode>,
    /// lowercased email → uid
    uids: DashMap<String, String>,
    /// uid → sessions authenticated at or before this time are revoked
    revoked_before: DashMap<String, i64>,
}

impl LocalIdentityGateway {
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < 32 {
            return Err(Error::Config(
                "session secret must be at least 32 bytes".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            codes: DashMap::new(),
            uids: DashMap::new(),
            revoked_before: DashMap::new(),
        })
    }

    /// Revokes every session issued to `uid` so far.
    ///
    /// Only enforced when sessions are verified with `check_revoked`.
    pub fn revoke(&self, uid: &str) {
        self.revoked_before
            .insert(uid.to_string(), Utc::now().timestamp());
        info!(uid = %uid, "Revoked sessions");
    }

    /// Drops one-time codes older than their lifetime. Returns how many went.
    pub fn cleanup_expired_codes(&self) -> usize {
        let cutoff = Utc::now().timestamp() - CODE_TTL_SECONDS;
        let before = self.codes.len();
        self.codes.retain(|_, pending| pending.issued_at >= cutoff);
        before.saturating_sub(self.codes.len())
    }

    fn uid_for(&self, email: &str) -> String {
        self.uids
            .entry(email.to_lowercase())
            .or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone()
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| Error::Authentication(format!("failed to sign token: {}", e)))
    }

    fn decode_typed(&self, token: &str, typ: &str) -> Result<TokenClaims> {
        if token.is_empty() {
            return Err(Error::Authentication(format!("missing {} token", typ)));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| Error::Authentication(format!("invalid {} token: {}", typ, e)))?
            .claims;

        if claims.typ != typ {
            return Err(Error::Authentication(format!(
                "expected {} token, got {}",
                typ, claims.typ
            )));
        }

        Ok(claims)
    }
}

#[async_trait]
impl IdentityGateway for LocalIdentityGateway {
    async fn generate_sign_in_link(&self, email: &str, continue_url: &str) -> Result<String> {
        if !email.contains('@') {
            return Err(Error::Authentication("INVALID_EMAIL".to_string()));
        }

        let purged = self.cleanup_expired_codes();
        if purged > 0 {
            debug!(purged, "Dropped expired sign-in codes");
        }

        let code = Uuid::new_v4().simple().to_string();
        self.codes.insert(
            code.clone(),
            PendingCode {
                email: email.to_string(),
                issued_at: Utc::now().timestamp(),
            },
        );

        debug!(pending_codes = self.codes.len(), "Issued one-time sign-in code");

        Ok(format!(
            "{}?mode=signIn&oobCode={}&continueUrl={}&lang=en",
            LINK_BASE,
            code,
            urlencoding::encode(continue_url)
        ))
    }

    async fn exchange_code(&self, _email: &str, code: &str) -> Result<IdentityAssertion> {
        // Single use: the code is gone whether or not it is still valid
        let (_, pending) = self
            .codes
            .remove(code)
            .ok_or_else(|| Error::Authentication("INVALID_OOB_CODE".to_string()))?;

        let now = Utc::now().timestamp();
        if now - pending.issued_at > CODE_TTL_SECONDS {
            return Err(Error::Authentication("EXPIRED_OOB_CODE".to_string()));
        }

        let uid = self.uid_for(&pending.email);
        let id_token = self.sign(&TokenClaims {
            sub: uid.clone(),
            email: pending.email.clone(),
            iat: now,
            exp: now + ID_TOKEN_TTL_SECONDS,
            auth_time: now,
            iss: ISSUER.to_string(),
            typ: TYP_ID.to_string(),
        })?;

        Ok(IdentityAssertion {
            id_token,
            uid,
            email: pending.email,
        })
    }

    async fn create_session(&self, id_token: &str, ttl: Duration) -> Result<SessionToken> {
        let identity = self.decode_typed(id_token, TYP_ID)?;

        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| Error::BadRequest(format!("session lifetime out of range: {}", e)))?;
        let now = Utc::now().timestamp();

        let token = self.sign(&TokenClaims {
            sub: identity.sub,
            email: identity.email,
            iat: now,
            exp: now + ttl.num_seconds(),
            auth_time: identity.auth_time,
            iss: ISSUER.to_string(),
            typ: TYP_SESSION.to_string(),
        })?;

        Ok(SessionToken(token))
    }

    async fn verify_session(&self, token: &str, check_revoked: bool) -> Result<Claims> {
        let claims = self.decode_typed(token, TYP_SESSION)?;

        if check_revoked {
            if let Some(before) = self.revoked_before.get(&claims.sub) {
                if claims.auth_time <= *before {
                    return Err(Error::Authentication("session revoked".to_string()));
                }
            }
        }

        Ok(Claims {
            issued_at: claim_time(claims.iat)?,
            expires_at: claim_time(claims.exp)?,
            auth_time: claim_time(claims.auth_time)?,
            uid: claims.sub,
            email: claims.email,
        })
    }
}
