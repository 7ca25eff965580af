//! Passwordless sign-in: one-time email links redeemed into session cookies.

mod cookie;

pub use cookie::{clear_session_cookie, session_cookie, session_from_headers, SESSION_COOKIE};

use crate::credentials::{CredentialStore, User};
use crate::error::{Error, Result};
use crate::identity::{Claims, IdentityGateway, SessionToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Path the sign-in link lands on.
pub const CALLBACK_PATH: &str = "/auth/magic/callback";

/// A sign-in link ready for delivery.
#[derive(Clone)]
pub struct LoginLink {
    pub url: String,
    pub code: String,
}

impl std::fmt::Debug for LoginLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginLink").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SessionIssuer {
    identity: Arc<dyn IdentityGateway>,
    store: Arc<dyn CredentialStore>,
    callback_url: String,
    session_ttl: Duration,
    check_revoked: bool,
    store_timeout: Duration,
}

impl SessionIssuer {
    pub fn new(
        identity: Arc<dyn IdentityGateway>,
        store: Arc<dyn CredentialStore>,
        base_url: &str,
        session_ttl: Duration,
        check_revoked: bool,
        store_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            store,
            callback_url: format!("{}{}", base_url.trim_end_matches('/'), CALLBACK_PATH),
            session_ttl,
            check_revoked,
            store_timeout,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Mints a one-time sign-in link for `email`.
    ///
    /// The link points straight at our callback so the code never has to pass
    /// through the provider's hosted action page. It is written to the log,
    /// which is the delivery channel in development.
    pub async fn request_login(&self, email: &str) -> Result<LoginLink> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::BadRequest("email is required".to_string()));
        }

        let provider_link = self
            .identity
            .generate_sign_in_link(email, &self.callback_url)
            .await?;

        let code = reqwest::Url::parse(&provider_link)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "oobCode")
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                Error::ProviderUnavailable("sign-in link has no one-time code".to_string())
            })?;

        let url = format!(
            "{}?oobCode={}&email={}",
            self.callback_url,
            urlencoding::encode(&code),
            urlencoding::encode(email)
        );

        info!(email = %email, link = %url, "Magic link generated");

        Ok(LoginLink { url, code })
    }

    /// Redeems a one-time code into a session.
    ///
    /// The user record is created on first sign-in.
    pub async fn redeem(&self, code: &str, email: &str) -> Result<SessionToken> {
        validate_email(email)?;
        if code.is_empty() {
            return Err(Error::BadRequest("one-time code is required".to_string()));
        }

        let assertion = self.identity.exchange_code(email, code).await?;

        if !assertion.email.eq_ignore_ascii_case(email) {
            warn!(uid = %assertion.uid, "Sign-in link redeemed with a different email");
            return Err(Error::BadRequest(
                "email does not match the sign-in link".to_string(),
            ));
        }

        let user = self.ensure_user(&assertion.uid, &assertion.email).await?;

        let session = self
            .identity
            .create_session(&assertion.id_token, self.session_ttl)
            .await?;

        info!(uid = %user.uid, "Session issued");

        Ok(session)
    }

    /// Verifies a session token and returns its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        if token.is_empty() {
            return Err(Error::Authentication("no session".to_string()));
        }

        self.identity.verify_session(token, self.check_revoked).await
    }

    async fn ensure_user(&self, uid: &str, email: &str) -> Result<User> {
        match tokio::time::timeout(self.store_timeout, self.store.get_or_create_user(uid, email))
            .await
        {
            Ok(Ok(user)) => Ok(user),
            Ok(Err(e)) => Err(Error::StoreUnavailable(format!("create user: {:#}", e))),
            Err(_) => Err(Error::StoreUnavailable(format!(
                "create user timed out after {:?}",
                self.store_timeout
            ))),
        }
    }
}

fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::BadRequest(format!("invalid email address '{}'", email)))
    }
}
