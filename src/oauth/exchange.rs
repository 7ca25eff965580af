//! OAuth token endpoint calls.
//!
//! Handles exchanging authorization codes and refresh tokens for access tokens.

use super::{ProviderConfig, TokenEndpoint, TokenResponse};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Token endpoint client over HTTPS (standard OAuth 2.0 form posts).
#[derive(Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    /// Every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// POSTs `form` to the token endpoint.
    ///
    /// 4xx responses are turned into errors by `rejected`; network failures,
    /// timeouts, 408, 429 and 5xx responses become `ProviderUnavailable`.
    async fn request_token(
        &self,
        provider: &ProviderConfig,
        form: &[(&str, &str)],
        rejected: fn(String) -> Error,
    ) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&provider.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %provider.name, error = %e, "Token endpoint request failed");
                Error::ProviderUnavailable(format!(
                    "token endpoint for '{}' unreachable: {}",
                    provider.name, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            let message = format!(
                "token endpoint for '{}' returned {}: {}",
                provider.name, status, body
            );

            let transient = status == reqwest::StatusCode::REQUEST_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS;

            return Err(if status.is_client_error() && !transient {
                rejected(message)
            } else {
                Error::ProviderUnavailable(message)
            });
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            Error::ProviderUnavailable(format!(
                "invalid token response from '{}': {}",
                provider.name, e
            ))
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        debug!(provider = %provider.name, "Exchanging authorization code for token");

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];

        let token = self
            .request_token(provider, &form, Error::Authentication)
            .await?;

        debug!(
            provider = %provider.name,
            has_refresh_token = token.refresh_token.is_some(),
            expires_in = ?token.expires_in,
            "Token exchange successful"
        );

        Ok(token)
    }

    async fn refresh(&self, provider: &ProviderConfig, refresh_token: &str) -> Result<TokenResponse> {
        debug!(provider = %provider.name, "Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];

        self.request_token(provider, &form, Error::AuthExpired).await
    }
}
