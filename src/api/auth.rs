use super::{AppState, CurrentUser};
use crate::error::{Error, Result};
use crate::session::{clear_session_cookie, session_cookie};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/magic/send", post(send_magic_link))
        .route("/auth/magic/callback", get(magic_callback))
        .route("/auth/logout", post(logout))
        .route("/dashboard", get(dashboard))
}

#[derive(Deserialize)]
struct SendLinkRequest {
    email: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Magic link query parameters
#[derive(Deserialize)]
struct MagicCallback {
    #[serde(alias = "oobCode")]
    code: Option<String>,
    email: Option<String>,
    mode: Option<String>,
}

#[derive(Serialize)]
struct DashboardResponse {
    uid: String,
    email: String,
}

/// POST /auth/magic/send
///
/// The link itself is never returned to the client.
async fn send_magic_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendLinkRequest>,
) -> Result<Json<MessageResponse>> {
    state.sessions.request_login(&request.email).await?;

    Ok(Json(MessageResponse {
        message: "Sign-in link sent",
    }))
}

/// GET /auth/magic/callback
///
/// Redeems the one-time code, sets the session cookie and sends the browser
/// to the dashboard.
async fn magic_callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<MagicCallback>,
) -> Result<Response> {
    if let Some(mode) = callback.mode.as_deref() {
        if mode != "signIn" {
            return Err(Error::BadRequest(format!("unsupported link mode '{}'", mode)));
        }
    }

    let code = callback
        .code
        .ok_or_else(|| Error::BadRequest("missing one-time code".to_string()))?;
    let email = callback
        .email
        .ok_or_else(|| Error::BadRequest("missing email".to_string()))?;

    debug!("Magic link callback received");

    let session = state.sessions.redeem(&code, &email).await?;
    let cookie = session_cookie(
        session.as_str(),
        state.sessions.session_ttl(),
        state.cookie_secure,
    );

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, "/dashboard".to_string()), (header::SET_COOKIE, cookie)],
    )
        .into_response())
}

/// POST /auth/logout
async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Session cleared");

    (
        [(header::SET_COOKIE, clear_session_cookie(state.cookie_secure))],
        Json(MessageResponse {
            message: "Signed out",
        }),
    )
}

/// GET /dashboard
async fn dashboard(CurrentUser(claims): CurrentUser) -> Json<DashboardResponse> {
    Json(DashboardResponse {
        uid: claims.uid,
        email: claims.email,
    })
}
