//! Persistence interface for users and their encrypted tokens.

use super::{StoredToken, User};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Key-value persistence over a user record and its per-provider tokens.
///
/// Implementations only ever see ciphertext; encryption happens in the vault.
/// Errors are backend-specific and are converted by the caller.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the existing user, or creates one with `email`.
    ///
    /// An existing user's email is never overwritten.
    async fn get_or_create_user(&self, uid: &str, email: &str) -> Result<User>;

    async fn get_user(&self, uid: &str) -> Result<Option<User>>;

    /// Upserts the token for `token.provider`.
    ///
    /// Returns `false` without writing when the user does not exist.
    async fn put_token(&self, uid: &str, token: &StoredToken) -> Result<bool>;

    async fn get_token(&self, uid: &str, provider: &str) -> Result<Option<StoredToken>>;

    /// Returns `true` if a token was removed.
    async fn delete_token(&self, uid: &str, provider: &str) -> Result<bool>;

    /// Provider names with a stored token, sorted.
    async fn list_providers(&self, uid: &str) -> Result<Vec<String>>;
}

struct UserRecord {
    user: User,
    tokens: BTreeMap<String, StoredToken>,
}

/// In-memory store for development and tests. Data is lost on restart.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, UserRecord>>> {
        self.users
            .lock()
            .map_err(|_| anyhow!("credential store lock poisoned"))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_or_create_user(&self, uid: &str, email: &str) -> Result<User> {
        let mut users = self.users()?;
        let record = users.entry(uid.to_string()).or_insert_with(|| UserRecord {
            user: User::new(uid, email),
            tokens: BTreeMap::new(),
        });
        Ok(record.user.clone())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.users()?.get(uid).map(|record| record.user.clone()))
    }

    async fn put_token(&self, uid: &str, token: &StoredToken) -> Result<bool> {
        let mut users = self.users()?;
        let Some(record) = users.get_mut(uid) else {
            return Ok(false);
        };

        record.tokens.insert(token.provider.clone(), token.clone());
        record.user.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_token(&self, uid: &str, provider: &str) -> Result<Option<StoredToken>> {
        Ok(self
            .users()?
            .get(uid)
            .and_then(|record| record.tokens.get(provider).cloned()))
    }

    async fn delete_token(&self, uid: &str, provider: &str) -> Result<bool> {
        let mut users = self.users()?;
        let Some(record) = users.get_mut(uid) else {
            return Ok(false);
        };

        let removed = record.tokens.remove(provider).is_some();
        if removed {
            record.user.updated_at = Utc::now();
        }
        Ok(removed)
    }

    async fn list_providers(&self, uid: &str) -> Result<Vec<String>> {
        Ok(self
            .users()?
            .get(uid)
            .map(|record| record.tokens.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(provider: &str) -> StoredToken {
        StoredToken {
            provider: provider.to_string(),
            sealed_access_token: "sealed-access".to_string(),
            sealed_refresh_token: None,
            expires_at: None,
            token_type: "Bearer".to_string(),
            scope: None,
            connected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_keeps_first_email() {
        let store = InMemoryCredentialStore::new();

        let first = store.get_or_create_user("uid-1", "a@x.com").await.unwrap();
        let second = store.get_or_create_user("uid-1", "b@x.com").await.unwrap();

        assert_eq!(first.email, "a@x.com");
        assert_eq!(second.email, "a@x.com");
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_put_token_requires_user() {
        let store = InMemoryCredentialStore::new();

        assert!(!store.put_token("ghost", &stored("google")).await.unwrap());
        assert!(store.get_token("ghost", "google").await.unwrap().is_none());

        store.get_or_create_user("uid-1", "a@x.com").await.unwrap();
        assert!(store.put_token("uid-1", &stored("google")).await.unwrap());
        assert!(store.get_token("uid-1", "google").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = InMemoryCredentialStore::new();
        store.get_or_create_user("uid-1", "a@x.com").await.unwrap();
        store.put_token("uid-1", &stored("google")).await.unwrap();
        store.put_token("uid-1", &stored("adobe")).await.unwrap();

        assert_eq!(
            store.list_providers("uid-1").await.unwrap(),
            vec!["adobe".to_string(), "google".to_string()]
        );

        assert!(store.delete_token("uid-1", "google").await.unwrap());
        assert!(!store.delete_token("uid-1", "google").await.unwrap());
        assert!(!store.delete_token("nobody", "google").await.unwrap());

        assert_eq!(store.list_providers("uid-1").await.unwrap(), vec!["adobe"]);
        assert!(store.list_providers("nobody").await.unwrap().is_empty());
    }
}
