//! Provider connections for the signed-in user.

use super::{AppState, CurrentUser};
use crate::error::{Error, Result};
use crate::oauth::{is_supported_provider, ProviderConfig};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth/connections", get(list_connections))
        .route("/oauth/:provider", delete(disconnect))
        .route("/oauth/:provider/connect", get(oauth_connect))
        .route("/oauth/:provider/callback", get(oauth_callback))
}

/// OAuth callback query parameters
#[derive(Deserialize)]
struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct ConnectionsResponse {
    providers: Vec<String>,
}

#[derive(Serialize)]
struct DisconnectResponse {
    deleted: bool,
}

fn provider_config<'a>(state: &'a AppState, provider: &str) -> Result<&'a ProviderConfig> {
    if !is_supported_provider(provider) {
        return Err(Error::NotFound(format!("unknown provider '{}'", provider)));
    }

    state.providers.get(provider).ok_or_else(|| {
        warn!(provider = %provider, "OAuth client credentials not configured");
        Error::NotFound(format!("provider '{}' is not configured", provider))
    })
}

fn redirect_uri(state: &AppState, provider: &str) -> String {
    format!(
        "{}/oauth/{}/callback",
        state.base_url.trim_end_matches('/'),
        provider
    )
}

/// GET /oauth/:provider/connect
///
/// Redirects to the provider's consent page with a single-use CSRF state
/// bound to the current user.
async fn oauth_connect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    CurrentUser(claims): CurrentUser,
) -> Result<Redirect> {
    let config = provider_config(&state, &provider)?;

    let csrf_state = state.oauth_states.create_state(&provider, &claims.uid);
    let auth_url = config.build_auth_url(&csrf_state, &redirect_uri(&state, &provider));

    info!(provider = %provider, uid = %claims.uid, "Redirecting to OAuth provider");

    Ok(Redirect::temporary(&auth_url))
}

/// GET /oauth/:provider/callback
///
/// The user is identified by the CSRF state, not the cookie, since the
/// provider redirect is a cross-site navigation.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response> {
    debug!(provider = %provider, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(provider = %provider, error = %error, description = %description, "OAuth authorization failed");
        return Err(Error::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| Error::BadRequest("missing authorization code".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| Error::BadRequest("missing state parameter".to_string()))?;

    let entry = state
        .oauth_states
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!(provider = %provider, "Invalid or expired OAuth state");
            Error::BadRequest("invalid or expired state parameter".to_string())
        })?;

    if entry.provider != provider {
        warn!(expected = %entry.provider, actual = %provider, "OAuth state issued for another provider");
        return Err(Error::BadRequest("state does not match provider".to_string()));
    }

    state
        .vault
        .connect(&entry.uid, &provider, &code, &redirect_uri(&state, &provider))
        .await?;

    info!(provider = %provider, uid = %entry.uid, "Provider connected");

    Ok((StatusCode::FOUND, [(header::LOCATION, "/dashboard")]).into_response())
}

/// GET /oauth/connections
async fn list_connections(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
) -> Result<Json<ConnectionsResponse>> {
    let providers = state.vault.list_connections(&claims.uid).await?;

    Ok(Json(ConnectionsResponse {
        providers: providers.into_iter().collect(),
    }))
}

/// DELETE /oauth/:provider
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    CurrentUser(claims): CurrentUser,
) -> Result<Json<DisconnectResponse>> {
    let deleted = state.vault.delete(&claims.uid, &provider).await?;
    Ok(Json(DisconnectResponse { deleted }))
}
