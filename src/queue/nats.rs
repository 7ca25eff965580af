use super::{EventQueue, QueueMessage};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Header JetStream uses for duplicate detection.
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    /// Subject webhook events are published on
    pub subject: String,
    pub max_age_days: u64,
    /// Window in which JetStream drops messages with a repeated `Nats-Msg-Id`
    pub duplicate_window_seconds: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "KEYWAY_WEBHOOKS".to_string(),
            subject: "keyway.webhooks.events".to_string(),
            max_age_days: 7,
            duplicate_window_seconds: 120,
        }
    }
}

/// Event queue on a NATS JetStream stream.
#[derive(Clone)]
pub struct NatsQueue {
    jetstream: jetstream::Context,
    subject: String,
}

impl NatsQueue {
    /// Connect to NATS and make sure the stream exists.
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client);
        ensure_stream(&jetstream, config).await?;

        Ok(Self {
            jetstream,
            subject: config.subject.clone(),
        })
    }
}

/// Ensure JetStream stream exists with proper configuration
async fn ensure_stream(jetstream: &jetstream::Context, config: &NatsConfig) -> Result<()> {
    if jetstream.get_stream(&config.stream_name).await.is_ok() {
        info!("Stream '{}' already exists", config.stream_name);
        return Ok(());
    }

    info!("Stream '{}' does not exist, creating...", config.stream_name);

    let stream_config = stream::Config {
        name: config.stream_name.clone(),
        subjects: vec![config.subject.clone()],
        max_age: Duration::from_secs(config.max_age_days * 86400),
        duplicate_window: Duration::from_secs(config.duplicate_window_seconds),
        storage: stream::StorageType::File,
        retention: stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    jetstream
        .create_stream(stream_config)
        .await
        .context("Failed to create JetStream stream")?;

    info!("Created JetStream stream '{}'", config.stream_name);
    Ok(())
}

#[async_trait]
impl EventQueue for NatsQueue {
    /// Attributes become message headers; `idempotency_key` also becomes the
    /// `Nats-Msg-Id` header. The id is `{stream}:{sequence}` from the ack.
    async fn publish(&self, message: QueueMessage) -> Result<String> {
        let mut headers = async_nats::HeaderMap::new();
        for (key, value) in &message.attributes {
            headers.insert(key.as_str(), value.as_str());
        }
        if let Some(key) = message.attributes.get("idempotency_key") {
            headers.insert(MSG_ID_HEADER, key.as_str());
        }

        let ack = self
            .jetstream
            .publish_with_headers(self.subject.clone(), headers, message.data.into())
            .await
            .context(format!("Failed to publish event to subject '{}'", self.subject))?
            .await
            .context("Failed to await publish ack")?;

        debug!(
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Event acknowledged by JetStream"
        );

        Ok(format!("{}:{}", ack.stream, ack.sequence))
    }
}
