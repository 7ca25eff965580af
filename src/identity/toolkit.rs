//! Google Identity Platform (Firebase Auth) adapter over its REST API.
//!
//! Session cookies are RS256 JWTs issued by
//! `https://session.firebase.google.com/{project}` and verified locally
//! against the published JWKS. Revocation is checked with an account lookup.

use super::{claim_time, Claims, IdentityAssertion, IdentityGateway, SessionToken};
use crate::error::{Error, Result};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Unknown key ids never trigger more than one key set fetch per interval.
const KEY_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ToolkitConfig {
    pub project_id: String,
    /// Web API key, used for the end-user sign-in call
    pub api_key: String,
    /// OAuth bearer token for the admin endpoints
    pub admin_token: String,
    pub api_base: String,
    pub jwks_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ToolkitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitConfig")
            .field("project_id", &self.project_id)
            .field("api_base", &self.api_base)
            .field("jwks_url", &self.jwks_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionClaims {
    sub: String,
    #[serde(default)]
    email: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    auth_time: Option<i64>,
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    local_id: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    #[serde(default)]
    disabled: bool,
    /// Unix seconds as a string; sessions authenticated before it are revoked
    #[serde(default)]
    valid_since: Option<String>,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

pub struct IdentityToolkitGateway {
    config: ToolkitConfig,
    client: reqwest::Client,
    keys: RwLock<KeyCache>,
}

impl IdentityToolkitGateway {
    pub fn new(config: ToolkitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            keys: RwLock::new(KeyCache::default()),
        })
    }

    fn issuer(&self) -> String {
        format!("https://session.firebase.google.com/{}", self.config.project_id)
    }

    /// POSTs a JSON body and returns the JSON response.
    ///
    /// 4xx responses are `Authentication` failures carrying the provider's
    /// error message; network failures and 5xx are `ProviderUnavailable`.
    async fn call(&self, path: &str, body: Value, admin: bool) -> Result<Value> {
        let url = format!("{}/v1/{}", self.config.api_base, path);
        let mut request = self.client.post(&url).json(&body);
        if admin {
            request = request.bearer_auth(&self.config.admin_token);
        } else {
            request = request.query(&[("key", self.config.api_key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            warn!(path = %path, error = %e, "Identity provider request failed");
            Error::ProviderUnavailable(format!("identity provider unreachable: {}", e))
        })?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(payload);
        }

        let message = payload
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();

        debug!(path = %path, status = %status, message = %message, "Identity provider rejected request");

        if status.is_client_error() {
            Err(Error::Authentication(message))
        } else {
            Err(Error::ProviderUnavailable(format!(
                "identity provider returned {}: {}",
                status, message
            )))
        }
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, DecodingKey>> {
        let jwks: Jwks = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::ProviderUnavailable(format!("failed to fetch signing keys: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid signing key set: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, error = %e, "Skipping unusable signing key"),
            }
        }

        debug!(count = keys.len(), "Loaded session signing keys");
        Ok(keys)
    }

    /// Looks up the key for `kid`, refetching the key set on a miss since
    /// keys rotate.
    ///
    /// `kid` comes from an unverified header, so refetches are limited to one
    /// per [`KEY_REFETCH_INTERVAL`]; other misses are plain authentication
    /// failures.
    async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.keys.read().await.keys.get(kid) {
            return Ok(key.clone());
        }

        let unknown = || Error::Authentication(format!("unknown signing key '{}'", kid));

        let mut cache = self.keys.write().await;
        if let Some(key) = cache.keys.get(kid) {
            return Ok(key.clone());
        }
        if matches!(cache.fetched_at, Some(at) if at.elapsed() < KEY_REFETCH_INTERVAL) {
            return Err(unknown());
        }

        cache.fetched_at = Some(Instant::now());
        match self.fetch_keys().await {
            Ok(keys) => cache.keys = keys,
            // Keep serving the previous key set
            Err(e) if !cache.keys.is_empty() => {
                warn!(error = %e, "Signing key refresh failed");
                return Err(unknown());
            }
            Err(e) => return Err(e),
        }

        cache.keys.get(kid).cloned().ok_or_else(unknown)
    }

    async fn check_revoked(&self, uid: &str, auth_time: i64) -> Result<()> {
        let payload = self
            .call("accounts:lookup", json!({ "localId": [uid] }), true)
            .await?;
        let lookup: LookupResponse = serde_json::from_value(payload).map_err(|e| {
            Error::ProviderUnavailable(format!("invalid account lookup response: {}", e))
        })?;

        let account = lookup
            .users
            .into_iter()
            .next()
            .ok_or_else(|| Error::Authentication("user no longer exists".to_string()))?;

        if account.disabled {
            return Err(Error::Authentication("user is disabled".to_string()));
        }

        let valid_since = account
            .valid_since
            .and_then(|value| value.parse::<i64>().ok());
        if matches!(valid_since, Some(since) if auth_time < since) {
            return Err(Error::Authentication("session revoked".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl IdentityGateway for IdentityToolkitGateway {
    async fn generate_sign_in_link(&self, email: &str, continue_url: &str) -> Result<String> {
        let payload = self
            .call(
                "accounts:sendOobCode",
                json!({
                    "requestType": "EMAIL_SIGNIN",
                    "email": email,
                    "continueUrl": continue_url,
                    "canHandleCodeInApp": true,
                    "returnOobLink": true,
                    "targetProjectId": self.config.project_id,
                }),
                true,
            )
            .await?;

        payload
            .get("oobLink")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::ProviderUnavailable("sign-in link missing from response".to_string()))
    }

    async fn exchange_code(&self, email: &str, code: &str) -> Result<IdentityAssertion> {
        let payload = self
            .call(
                "accounts:signInWithEmailLink",
                json!({ "email": email, "oobCode": code }),
                false,
            )
            .await?;

        let response: SignInResponse = serde_json::from_value(payload).map_err(|e| {
            Error::ProviderUnavailable(format!("invalid sign-in response: {}", e))
        })?;

        Ok(IdentityAssertion {
            id_token: response.id_token,
            uid: response.local_id,
            email: response.email,
        })
    }

    async fn create_session(&self, id_token: &str, ttl: Duration) -> Result<SessionToken> {
        let payload = self
            .call(
                &format!("projects/{}:createSessionCookie", self.config.project_id),
                json!({
                    "idToken": id_token,
                    "validDuration": ttl.as_secs().to_string(),
                }),
                true,
            )
            .await?;

        payload
            .get("sessionCookie")
            .and_then(Value::as_str)
            .map(|cookie| SessionToken(cookie.to_string()))
            .ok_or_else(|| Error::ProviderUnavailable("session cookie missing from response".to_string()))
    }

    async fn verify_session(&self, token: &str, check_revoked: bool) -> Result<Claims> {
        if token.is_empty() {
            return Err(Error::Authentication("missing session".to_string()));
        }

        let header = decode_header(token)
            .map_err(|e| Error::Authentication(format!("malformed session: {}", e)))?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::Authentication(format!(
                "unexpected session algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::Authentication("session has no key id".to_string()))?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer()]);
        validation.set_audience(&[self.config.project_id.as_str()]);

        let claims = decode::<SessionClaims>(token, &key, &validation)
            .map_err(|e| Error::Authentication(format!("invalid session: {}", e)))?
            .claims;

        let auth_time = claims.auth_time.unwrap_or(claims.iat);

        if check_revoked {
            self.check_revoked(&claims.sub, auth_time).await?;
        }

        Ok(Claims {
            issued_at: claim_time(claims.iat)?,
            expires_at: claim_time(claims.exp)?,
            auth_time: claim_time(auth_time)?,
            uid: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use mockito::Matcher;

    const PROJECT: &str = "keyway-test";
    const SIGNING_KEY: &str = include_str!("testdata/session_key.pem");
    const JWKS: &str = include_str!("testdata/jwks.json");

    fn gateway(server: &mockito::Server) -> IdentityToolkitGateway {
        IdentityToolkitGateway::new(ToolkitConfig {
            project_id: PROJECT.to_string(),
            api_key: "web-key".to_string(),
            admin_token: "admin-token".to_string(),
            api_base: server.url(),
            jwks_url: format!("{}/jwks", server.url()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[derive(Serialize)]
    struct TestClaims<'a> {
        iss: String,
        aud: &'a str,
        sub: &'a str,
        email: &'a str,
        iat: i64,
        exp: i64,
        auth_time: i64,
    }

    fn session_cookie(aud: &str, auth_time: i64) -> String {
        signed_cookie("test-key-1", aud, auth_time)
    }

    fn signed_cookie(kid: &str, aud: &str, auth_time: i64) -> String {
        let now = Utc::now().timestamp();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());

        encode(
            &header,
            &TestClaims {
                iss: format!("https://session.firebase.google.com/{}", PROJECT),
                aud,
                sub: "uid-42",
                email: "a@x.com",
                iat: now,
                exp: now + 3600,
                auth_time,
            },
            &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_link_uses_admin_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/accounts:sendOobCode")
            .match_header("authorization", "Bearer admin-token")
            .match_body(Matcher::PartialJson(json!({
                "requestType": "EMAIL_SIGNIN",
                "email": "a@x.com",
                "continueUrl": "http://localhost/auth/magic/callback",
                "returnOobLink": true,
            })))
            .with_status(200)
            .with_body(r#"{"email":"a@x.com","oobLink":"https://p.firebaseapp.com/__/auth/action?mode=signIn&oobCode=CODE1"}"#)
            .create_async()
            .await;

        let link = gateway(&server)
            .generate_sign_in_link("a@x.com", "http://localhost/auth/magic/callback")
            .await
            .unwrap();

        assert!(link.ends_with("oobCode=CODE1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/accounts:signInWithEmailLink")
            .match_query(Matcher::UrlEncoded("key".into(), "web-key".into()))
            .match_body(Matcher::Json(json!({ "email": "a@x.com", "oobCode": "CODE1" })))
            .with_status(200)
            .with_body(r#"{"idToken":"id-token","localId":"uid-42","email":"a@x.com"}"#)
            .create_async()
            .await;

        let assertion = gateway(&server)
            .exchange_code("a@x.com", "CODE1")
            .await
            .unwrap();

        assert_eq!(assertion.uid, "uid-42");
        assert_eq!(assertion.email, "a@x.com");
        assert_eq!(assertion.id_token, "id-token");
    }

    #[tokio::test]
    async fn test_rejected_code_is_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/accounts:signInWithEmailLink")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"INVALID_OOB_CODE"}}"#)
            .create_async()
            .await;

        let result = gateway(&server).exchange_code("a@x.com", "used").await;
        match result {
            Err(Error::Authentication(message)) => assert_eq!(message, "INVALID_OOB_CODE"),
            other => panic!("expected Authentication, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_outage_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/accounts:sendOobCode")
            .with_status(503)
            .create_async()
            .await;

        let result = gateway(&server)
            .generate_sign_in_link("a@x.com", "http://x")
            .await;
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_create_session_requests_ttl() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/projects/keyway-test:createSessionCookie")
            .match_body(Matcher::Json(json!({
                "idToken": "id-token",
                "validDuration": "1209600",
            })))
            .with_status(200)
            .with_body(r#"{"sessionCookie":"cookie-value"}"#)
            .create_async()
            .await;

        let session = gateway(&server)
            .create_session("id-token", Duration::from_secs(1_209_600))
            .await
            .unwrap();
        assert_eq!(session.as_str(), "cookie-value");
    }

    #[tokio::test]
    async fn test_verify_session_against_jwks() {
        let mut server = mockito::Server::new_async().await;
        let jwks = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(JWKS)
            .expect(1)
            .create_async()
            .await;

        let gateway = gateway(&server);
        let cookie = session_cookie(PROJECT, Utc::now().timestamp());

        let claims = gateway.verify_session(&cookie, false).await.unwrap();
        assert_eq!(claims.uid, "uid-42");
        assert_eq!(claims.email, "a@x.com");

        // Cached key set is reused
        gateway.verify_session(&cookie, false).await.unwrap();
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_key_ids_do_not_refetch_each_time() {
        let mut server = mockito::Server::new_async().await;
        let jwks = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(JWKS)
            .expect(1)
            .create_async()
            .await;

        let gateway = gateway(&server);
        let now = Utc::now().timestamp();

        for n in 0..20 {
            let forged = signed_cookie(&format!("forged-{}", n), PROJECT, now);
            assert!(matches!(
                gateway.verify_session(&forged, false).await,
                Err(Error::Authentication(_))
            ));
        }

        // Known key still verifies from the cache
        let cookie = session_cookie(PROJECT, now);
        assert!(gateway.verify_session(&cookie, false).await.is_ok());
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_key_id_is_unauthenticated_when_key_set_unreachable() {
        let mut server = mockito::Server::new_async().await;
        let jwks = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(JWKS)
            .expect(1)
            .create_async()
            .await;

        let mut gateway = gateway(&server);
        let now = Utc::now().timestamp();
        gateway
            .verify_session(&session_cookie(PROJECT, now), false)
            .await
            .unwrap();
        jwks.assert_async().await;

        // Key set endpoint goes away and the refetch window lapses
        gateway.config.jwks_url = "http://127.0.0.1:1/jwks".to_string();
        gateway.keys.write().await.fetched_at = None;

        let forged = signed_cookie("forged", PROJECT, now);
        assert!(matches!(
            gateway.verify_session(&forged, false).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_body(JWKS)
            .create_async()
            .await;

        let cookie = session_cookie("other-project", Utc::now().timestamp());
        let result = gateway(&server).verify_session(&cookie, false).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_revoked_session_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_body(JWKS)
            .create_async()
            .await;

        let auth_time = Utc::now().timestamp() - 100;
        server
            .mock("POST", "/v1/accounts:lookup")
            .match_header("authorization", "Bearer admin-token")
            .with_status(200)
            .with_body(format!(
                r#"{{"users":[{{"localId":"uid-42","validSince":"{}"}}]}}"#,
                auth_time + 50
            ))
            .create_async()
            .await;

        let gateway = gateway(&server);
        let cookie = session_cookie(PROJECT, auth_time);

        assert!(gateway.verify_session(&cookie, false).await.is_ok());
        assert!(matches!(
            gateway.verify_session(&cookie, true).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_session_rejected_without_network() {
        let server = mockito::Server::new_async().await;
        let gateway = gateway(&server);

        assert!(gateway.verify_session("", true).await.is_err());
        assert!(matches!(
            gateway.verify_session("garbage", true).await,
            Err(Error::Authentication(_))
        ));
    }
}
