// HTTP surface: sign-in, provider connections and the webhook receiver

mod auth;
mod extract;
mod oauth;
mod webhook;

pub use extract::CurrentUser;

use crate::credentials::CredentialVault;
use crate::oauth::{ProviderRegistry, StateManager};
use crate::session::SessionIssuer;
use crate::webhook::WebhookGateway;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionIssuer,
    pub vault: CredentialVault,
    pub webhooks: WebhookGateway,
    pub providers: Arc<ProviderRegistry>,
    pub oauth_states: StateManager,
    /// Public URL used for OAuth redirect URIs
    pub base_url: String,
    pub cookie_secure: bool,
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::routes())
        .merge(oauth::routes())
        .merge(webhook::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
