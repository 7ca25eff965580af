use super::AppState;
use crate::error::Error;
use crate::identity::Claims;
use crate::session::session_from_headers;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

/// Signed-in user, taken from a verified session cookie.
///
/// Rejects with 401 when the cookie is missing or fails verification.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_from_headers(&parts.headers)
            .ok_or_else(|| Error::Authentication("not signed in".to_string()))?;

        state.sessions.verify(&token).await.map(CurrentUser)
    }
}
