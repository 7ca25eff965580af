//! Credential vault: encrypted token persistence with transparent refresh.

use super::{Cipher, CredentialStore, OAuthToken, StoredToken};
use crate::error::{Error, Result};
use crate::oauth::{ProviderRegistry, TokenEndpoint, TokenResponse};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type RefreshKey = (String, String);

/// Returns currently-valid OAuth tokens per (user, provider).
///
/// Tokens are sealed with the [`Cipher`] before they reach the store and
/// opened on the way out. Expired tokens are refreshed against the provider's
/// token endpoint and written back.
///
/// Refreshes for the same (uid, provider) are serialized within the process:
/// concurrent callers that find the same expired token wait for the first
/// refresh and reuse its result.
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<Cipher>,
    providers: Arc<ProviderRegistry>,
    endpoint: Arc<dyn TokenEndpoint>,
    store_timeout: Duration,
    refresh_locks: Arc<DashMap<RefreshKey, Arc<Mutex<()>>>>,
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: Arc<Cipher>,
        providers: Arc<ProviderRegistry>,
        endpoint: Arc<dyn TokenEndpoint>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            providers,
            endpoint,
            store_timeout,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Returns the stored token, refreshing it first if it has expired.
    ///
    /// # Errors
    /// - `NotConnected` if the user never authorized `provider`
    /// - `TokenExpired` if the token expired and has no refresh token
    /// - `AuthExpired` / `ProviderUnavailable` from the refresh itself
    /// - `Decryption` if the stored ciphertext cannot be opened
    pub async fn get_valid_token(&self, uid: &str, provider: &str) -> Result<OAuthToken> {
        let token = self.require(uid, provider).await?;
        if !token.is_expired() {
            return Ok(token);
        }

        debug!(uid = %uid, provider = %provider, "Stored token expired");

        self.with_refresh_lock(uid, provider, |vault, uid, provider| async move {
            // Another request may have refreshed while we waited for the lock
            let current = vault.require(&uid, &provider).await?;
            if !current.is_expired() {
                debug!(uid = %uid, provider = %provider, "Token refreshed by concurrent request");
                return Ok(current);
            }
            vault.refresh_token(&uid, current).await
        })
        .await
    }

    /// Refreshes the stored token unconditionally.
    pub async fn refresh(&self, uid: &str, provider: &str) -> Result<OAuthToken> {
        self.with_refresh_lock(uid, provider, |vault, uid, provider| async move {
            let current = vault.require(&uid, &provider).await?;
            vault.refresh_token(&uid, current).await
        })
        .await
    }

    /// Normalizes a provider token response, encrypts it and stores it.
    ///
    /// The user must already exist; tokens never create users.
    pub async fn save(&self, uid: &str, provider: &str, response: &TokenResponse) -> Result<OAuthToken> {
        let token = OAuthToken::from_response(provider, response, Utc::now())?;
        self.persist(uid, &token).await?;

        info!(
            uid = %uid,
            provider = %provider,
            has_refresh_token = token.refresh_token.is_some(),
            expires_at = ?token.expires_at,
            "Saved OAuth token"
        );

        Ok(token)
    }

    /// Exchanges an authorization code with the provider and saves the result.
    pub async fn connect(
        &self,
        uid: &str,
        provider: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthToken> {
        let config = self.providers.get(provider).ok_or_else(|| {
            Error::NotFound(format!("OAuth provider '{}' is not configured", provider))
        })?;

        let response = self
            .endpoint
            .exchange_code(config, code, redirect_uri)
            .await?;

        self.save(uid, provider, &response).await
    }

    /// Removes the stored token. Returns `false` if there was none.
    pub async fn delete(&self, uid: &str, provider: &str) -> Result<bool> {
        let deleted = self
            .store_call("delete token", self.store.delete_token(uid, provider))
            .await?;

        if deleted {
            info!(uid = %uid, provider = %provider, "Disconnected provider");
        }

        Ok(deleted)
    }

    pub async fn list_connections(&self, uid: &str) -> Result<BTreeSet<String>> {
        let providers = self
            .store_call("list connections", self.store.list_providers(uid))
            .await?;

        Ok(providers.into_iter().collect())
    }

    /// Runs `f` while holding the refresh lock for (uid, provider).
    ///
    /// Waiting for the lock, the refresh and the lock cleanup all run in a
    /// spawned task, so a caller that goes away mid-flight neither leaks the
    /// lock entry nor releases the lock before the new token is stored.
    async fn with_refresh_lock<F, Fut>(&self, uid: &str, provider: &str, f: F) -> Result<OAuthToken>
    where
        F: FnOnce(CredentialVault, String, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<OAuthToken>> + Send + 'static,
    {
        let vault = self.clone();
        let key = (uid.to_string(), provider.to_string());

        let task = tokio::spawn(async move {
            let lock = vault
                .refresh_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            let result = {
                let _guard = lock.lock().await;
                f(vault.clone(), key.0.clone(), key.1.clone()).await
            };

            drop(lock);
            // Only the map still holds it once nobody is waiting
            vault
                .refresh_locks
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

            result
        });

        task.await.map_err(|e| {
            warn!(uid = %uid, provider = %provider, error = %e, "Token refresh task failed");
            Error::ProviderUnavailable(format!("token refresh task failed: {}", e))
        })?
    }

    /// Calls the provider's token endpoint and persists the result.
    async fn refresh_token(&self, uid: &str, current: OAuthToken) -> Result<OAuthToken> {
        let provider = current.provider.clone();

        let refresh_token = match current.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(Error::TokenExpired(format!(
                    "{} token expired and no refresh token is available",
                    provider
                )))
            }
        };

        let config = self.providers.get(&provider).ok_or_else(|| {
            Error::TokenExpired(format!(
                "{} token expired and client credentials are not configured for refresh",
                provider
            ))
        })?;

        info!(uid = %uid, provider = %provider, "Refreshing OAuth token");

        let response = self.endpoint.refresh(config, &refresh_token).await?;

        let mut token = OAuthToken::from_response(&config.name, &response, Utc::now())?;
        // Keep the existing refresh token if the provider did not rotate it
        if token.refresh_token.is_none() {
            token.refresh_token = current.refresh_token;
        }
        token.connected_at = current.connected_at;

        self.persist(uid, &token).await?;

        info!(
            uid = %uid,
            provider = %config.name,
            expires_at = ?token.expires_at,
            "OAuth token refreshed successfully"
        );

        Ok(token)
    }

    async fn require(&self, uid: &str, provider: &str) -> Result<OAuthToken> {
        self.load(uid, provider)
            .await?
            .ok_or_else(|| Error::NotConnected {
                provider: provider.to_string(),
            })
    }

    async fn load(&self, uid: &str, provider: &str) -> Result<Option<OAuthToken>> {
        let stored = self
            .store_call("read token", self.store.get_token(uid, provider))
            .await?;

        stored.map(|stored| self.open(stored)).transpose()
    }

    async fn persist(&self, uid: &str, token: &OAuthToken) -> Result<()> {
        let sealed = self.seal(token)?;

        let stored = self
            .store_call("write token", self.store.put_token(uid, &sealed))
            .await?;

        if !stored {
            return Err(Error::NotFound(format!("user '{}' does not exist", uid)));
        }

        Ok(())
    }

    fn seal(&self, token: &OAuthToken) -> Result<StoredToken> {
        Ok(StoredToken {
            provider: token.provider.clone(),
            sealed_access_token: self.cipher.encrypt(&token.access_token)?,
            sealed_refresh_token: token
                .refresh_token
                .as_deref()
                .map(|refresh| self.cipher.encrypt(refresh))
                .transpose()?,
            expires_at: token.expires_at,
            token_type: token.token_type.clone(),
            scope: token.scope.clone(),
            connected_at: token.connected_at,
        })
    }

    fn open(&self, stored: StoredToken) -> Result<OAuthToken> {
        Ok(OAuthToken {
            access_token: self.cipher.decrypt(&stored.sealed_access_token)?,
            refresh_token: stored
                .sealed_refresh_token
                .as_deref()
                .map(|sealed| self.cipher.decrypt(sealed))
                .transpose()?,
            provider: stored.provider,
            expires_at: stored.expires_at,
            token_type: stored.token_type,
            scope: stored.scope,
            connected_at: stored.connected_at,
        })
    }

    /// Bounds a store call by the configured timeout and converts its error.
    async fn store_call<T>(
        &self,
        operation: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(operation = %operation, error = %e, "Credential store call failed");
                Err(Error::StoreUnavailable(format!("{}: {:#}", operation, e)))
            }
            Err(_) => {
                warn!(operation = %operation, "Credential store call timed out");
                Err(Error::StoreUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.store_timeout
                )))
            }
        }
    }
}
