use super::AppState;
use crate::error::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

pub(super) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/webhooks", post(receive_webhook))
}

#[derive(Serialize)]
struct WebhookResponse {
    message_id: String,
}

/// POST /api/v1/webhooks
///
/// 200 only once the event is on the queue; every failure is an error status
/// so the sender retries.
async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let message_id = state.webhooks.receive(&body, &headers).await?;
    Ok(Json(WebhookResponse { message_id }))
}
