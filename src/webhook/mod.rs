//! Inbound webhook verification and relay.
//!
//! A request is authenticated before its body is parsed: the timestamp must be
//! within tolerance and the HMAC signature must match. Accepted events are
//! published to the event queue and acknowledged only once the queue has
//! accepted them, so a failed publish makes the sender retry.

mod event;
mod signature;

pub use event::WebhookEvent;
pub use signature::{compute_signature, verify_signature};

use crate::error::{Error, Result};
use crate::queue::{EventQueue, QueueMessage};
use axum::http::HeaderMap;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

/// Authenticated event with the timestamp it was signed at.
#[derive(Clone, Debug)]
pub struct VerifiedEvent {
    pub event: WebhookEvent,
    pub timestamp: i64,
    /// Hex SHA-256 of the raw signed body
    pub body_digest: String,
}

impl VerifiedEvent {
    /// Identical for redeliveries of the same signed request, distinct for
    /// different events even when they share type, resource and second.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.event.event_type, self.event.resource_id, self.timestamp, self.body_digest
        )
    }
}

#[derive(Clone)]
pub struct WebhookGateway {
    secret: Arc<Vec<u8>>,
    tolerance_seconds: i64,
    queue: Arc<dyn EventQueue>,
    publish_timeout: Duration,
}

impl WebhookGateway {
    pub fn new(
        secret: &[u8],
        tolerance_seconds: i64,
        queue: Arc<dyn EventQueue>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            secret: Arc::new(secret.to_vec()),
            tolerance_seconds,
            queue,
            publish_timeout,
        }
    }

    /// Authenticates a request, then parses its body.
    pub fn verify(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<VerifiedEvent> {
        self.verify_at(raw_body, headers, Utc::now().timestamp())
    }

    fn verify_at(&self, raw_body: &[u8], headers: &HeaderMap, now: i64) -> Result<VerifiedEvent> {
        let timestamp = header(headers, TIMESTAMP_HEADER)?
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidSignature("timestamp header is not an integer".to_string()))?;
        let signature = header(headers, SIGNATURE_HEADER)?;

        if now.abs_diff(timestamp) > self.tolerance_seconds.unsigned_abs() {
            let skew = now.saturating_sub(timestamp);
            warn!(skew_seconds = skew, "Webhook timestamp outside tolerance window");
            return Err(Error::StaleTimestamp { skew_seconds: skew });
        }

        verify_signature(&self.secret, timestamp, raw_body, signature.trim()).map_err(|e| {
            warn!("Invalid webhook signature");
            e
        })?;

        let event = WebhookEvent::parse(raw_body)?;

        Ok(VerifiedEvent {
            event,
            timestamp,
            body_digest: hex::encode(Sha256::digest(raw_body)),
        })
    }

    /// Publishes the event and waits for the queue to accept it.
    pub async fn forward(&self, verified: &VerifiedEvent) -> Result<String> {
        let event = &verified.event;

        let data = serde_json::to_vec(&event.body)
            .map_err(|e| Error::QueuePublish(format!("failed to serialize event: {}", e)))?;

        let attributes = BTreeMap::from([
            ("event_type".to_string(), event.event_type.clone()),
            ("resource_type".to_string(), event.resource_type.clone()),
            ("resource_id".to_string(), event.resource_id.clone()),
            ("timestamp".to_string(), verified.timestamp.to_string()),
            ("idempotency_key".to_string(), verified.idempotency_key()),
        ]);

        let published = tokio::time::timeout(
            self.publish_timeout,
            self.queue.publish(QueueMessage { data, attributes }),
        )
        .await;

        let message_id = match published {
            Ok(Ok(id)) if !id.is_empty() => id,
            Ok(Ok(_)) => {
                return Err(Error::QueuePublish("queue returned an empty message id".to_string()))
            }
            Ok(Err(e)) => {
                warn!(event_type = %event.event_type, error = %e, "Failed to publish webhook event");
                return Err(Error::QueuePublish(format!("{:#}", e)));
            }
            Err(_) => {
                warn!(event_type = %event.event_type, "Publishing webhook event timed out");
                return Err(Error::QueuePublish(format!(
                    "queue did not acknowledge within {:?}",
                    self.publish_timeout
                )));
            }
        };

        info!(
            event_type = %event.event_type,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            account_id = %event.account_id,
            project_id = %event.project_id,
            message_id = %message_id,
            "Webhook event forwarded"
        );

        Ok(message_id)
    }

    /// Verifies and forwards a request.
    pub async fn receive(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<String> {
        let verified = self.verify(raw_body, headers)?;
        self.forward(&verified).await
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| Error::InvalidSignature(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Error::InvalidSignature(format!("unreadable {} header", name)))
}
