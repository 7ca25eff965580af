//! Credential storage using SQLite.
//!
//! Stores users and their OAuth token records. Token secrets arrive here
//! already encrypted; this layer never sees plaintext.

use super::store::CredentialStore;
use super::{StoredToken, User};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE users (
///     uid TEXT PRIMARY KEY,
///     email TEXT NOT NULL,
///     created_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL          -- ISO 8601 timestamp
/// );
///
/// CREATE TABLE oauth_tokens (
///     id INTEGER PRIMARY KEY,
///     uid TEXT NOT NULL REFERENCES users(uid),
///     provider TEXT NOT NULL,
///     access_token TEXT NOT NULL,       -- Encrypted
///     refresh_token TEXT,               -- Encrypted (optional)
///     expires_at TEXT,                  -- ISO 8601 timestamp (optional)
///     token_type TEXT NOT NULL,
///     scope TEXT,
///     connected_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(uid, provider)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex and only touched from blocking tasks
/// - SQLite ACID guarantees prevent partial updates
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store.
    ///
    /// Pass `":memory:"` for a throwaway database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY,
                uid TEXT NOT NULL REFERENCES users(uid),
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                token_type TEXT NOT NULL,
                scope TEXT,
                connected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(uid, provider)
            );

            CREATE INDEX IF NOT EXISTS idx_uid_provider ON oauth_tokens(uid, provider);
            "#,
        )
        .context("Failed to create credential tables")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| anyhow!("credential database lock poisoned"))?;
            f(&conn)
        })
        .await
        .context("Credential database task failed")?
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}

fn read_user(conn: &Connection, uid: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT uid, email, created_at, updated_at FROM users WHERE uid = ?1",
            params![uid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .context("Failed to query user")?;

    row.map(|(uid, email, created_at, updated_at)| {
        Ok(User {
            uid,
            email,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    })
    .transpose()
}

type TokenRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
);

fn token_row(row: &Row<'_>) -> rusqlite::Result<TokenRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get_or_create_user(&self, uid: &str, email: &str) -> Result<User> {
        let uid = uid.to_string();
        let email = email.to_string();

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();

            // Existing rows keep their email
            conn.execute(
                r#"
                INSERT INTO users (uid, email, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?3)
                ON CONFLICT(uid) DO NOTHING
                "#,
                params![uid, email, now],
            )
            .context("Failed to create user")?;

            read_user(conn, &uid)?.ok_or_else(|| anyhow!("User '{}' vanished after insert", uid))
        })
        .await
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        let uid = uid.to_string();
        self.with_conn(move |conn| read_user(conn, &uid)).await
    }

    async fn put_token(&self, uid: &str, token: &StoredToken) -> Result<bool> {
        let uid = uid.to_string();
        let token = token.clone();

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();

            let user_updated = conn
                .execute(
                    "UPDATE users SET updated_at = ?2 WHERE uid = ?1",
                    params![uid, now],
                )
                .context("Failed to touch user")?;
            if user_updated == 0 {
                return Ok(false);
            }

            conn.execute(
                r#"
                INSERT INTO oauth_tokens (
                    uid, provider,
                    access_token, refresh_token,
                    expires_at, token_type, scope,
                    connected_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(uid, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    token_type = excluded.token_type,
                    scope = excluded.scope,
                    connected_at = excluded.connected_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    uid,
                    token.provider,
                    token.sealed_access_token,
                    token.sealed_refresh_token,
                    token.expires_at.map(|dt| dt.to_rfc3339()),
                    token.token_type,
                    token.scope,
                    token.connected_at.to_rfc3339(),
                    now,
                ],
            )
            .context("Failed to store token")?;

            Ok(true)
        })
        .await
    }

    async fn get_token(&self, uid: &str, provider: &str) -> Result<Option<StoredToken>> {
        let uid = uid.to_string();
        let provider = provider.to_string();

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT provider, access_token, refresh_token,
                           expires_at, token_type, scope, connected_at
                    FROM oauth_tokens
                    WHERE uid = ?1 AND provider = ?2
                    "#,
                    params![uid, provider],
                    token_row,
                )
                .optional()
                .context("Failed to query token")?;

            let Some((provider, access, refresh, expires_at, token_type, scope, connected_at)) =
                row
            else {
                return Ok(None);
            };

            Ok(Some(StoredToken {
                provider,
                sealed_access_token: access,
                sealed_refresh_token: refresh,
                expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
                token_type,
                scope,
                connected_at: parse_timestamp(&connected_at)?,
            }))
        })
        .await
    }

    async fn delete_token(&self, uid: &str, provider: &str) -> Result<bool> {
        let uid = uid.to_string();
        let provider = provider.to_string();

        self.with_conn(move |conn| {
            let rows_affected = conn
                .execute(
                    "DELETE FROM oauth_tokens WHERE uid = ?1 AND provider = ?2",
                    params![uid, provider],
                )
                .context("Failed to delete token")?;

            if rows_affected > 0 {
                conn.execute(
                    "UPDATE users SET updated_at = ?2 WHERE uid = ?1",
                    params![uid, Utc::now().to_rfc3339()],
                )
                .context("Failed to touch user")?;
            }

            Ok(rows_affected > 0)
        })
        .await
    }

    async fn list_providers(&self, uid: &str) -> Result<Vec<String>> {
        let uid = uid.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT provider FROM oauth_tokens WHERE uid = ?1 ORDER BY provider")
                .context("Failed to prepare query")?;

            let providers = stmt
                .query_map(params![uid], |row| row.get(0))
                .context("Failed to execute query")?
                .collect::<Result<Vec<String>, _>>()
                .context("Failed to read results")?;

            Ok(providers)
        })
        .await
    }
}
