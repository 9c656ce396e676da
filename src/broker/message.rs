//! Message definitions shared by every broker backend
//!
//! `Message` is what a producer hands to the broker; `Delivery` is the same
//! message as seen by a consumer, tagged with the handle used to resolve it.
//!
//! Notes on fields:
//! - `payload`: opaque bytes, producers and consumers agree on the format
//! - `persistent`: survive a broker restart when routed to a durable queue
//! - `routing_key`: filled in by the publisher from its target
//! - `message_id`: UUID assigned at construction
//! - `timestamp`: milliseconds since UNIX epoch, assigned at construction
//! - `expiration`: per-message TTL in milliseconds, enforced by the broker

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub payload: Vec<u8>,
    pub persistent: bool,
    pub routing_key: String,
    pub message_id: String,
    pub timestamp: i64,
    pub expiration: Option<u64>,
}

impl Message {
    /// Create a transient message with a fresh id and the current timestamp.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            persistent: false,
            routing_key: String::new(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            expiration: None,
        }
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Drop the message if it is still queued after `ttl`.
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Whether the TTL has elapsed for a message enqueued at `enqueued_at` (ms).
    pub fn is_expired(&self, enqueued_at: i64, now: i64) -> bool {
        match self.expiration {
            Some(ttl) => now.saturating_sub(enqueued_at).max(0) as u64 >= ttl,
            None => false,
        }
    }
}

/// Broker-assigned handle for one delivery, valid on the session that received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer. Must be acked or nacked exactly once.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message: Message,
    /// Set when the broker has handed this message out before.
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn text(&self) -> Cow<'_, str> {
        self.message.text()
    }
}
