//! Outbound event queue.
//!
//! Verified webhook events are relayed through [`EventQueue`]. The NATS
//! JetStream adapter is used in production; [`InMemoryQueue`] backs
//! development and tests.

mod nats;

pub use nats::{NatsConfig, NatsQueue};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Message payload plus string attributes (sent as headers where supported).
#[derive(Clone, Debug, PartialEq)]
pub struct QueueMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Publishes and waits for the queue's acknowledgement.
    ///
    /// Returns the queue-assigned message id.
    async fn publish(&self, message: QueueMessage) -> Result<String>;
}

/// Queue that keeps published messages in memory.
#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<QueueMessage>>,
    failing: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<QueueMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    async fn publish(&self, message: QueueMessage) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("queue unavailable"));
        }

        let mut messages = self
            .messages
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?;
        messages.push(message);

        Ok(format!("memory:{}", messages.len()))
    }
}
