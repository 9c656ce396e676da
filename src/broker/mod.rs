//! Broker client abstraction
//!
//! [`BrokerClient`] is the seam between the delivery protocol and whatever
//! broker carries the traffic. One value of an implementing type is one
//! session (an AMQP channel): it is owned by a single component at a time and
//! passed explicitly to the topology manager, publisher and dispatcher.
//!
//! Implementations:
//! - [`AmqpSession`]: RabbitMQ via `lapin`
//! - [`MemorySession`]: in-process broker with the same routing, prefetch
//!   and redelivery rules, used by tests and local demos

pub mod amqp;
pub mod memory;
pub mod message;

use std::fmt;
use std::num::NonZeroU16;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub use amqp::AmqpSession;
pub use memory::{MemoryBroker, MemorySession};
pub use message::{Delivery, DeliveryTag, Message};

/// Lazy, non-restartable sequence of deliveries for one consumer.
///
/// The stream ending means the session is gone.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Copy every message to every bound queue, ignoring the routing key.
    Fanout,
    /// Route to queues bound with exactly the message's routing key.
    Direct,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Fanout => f.write_str("fanout"),
            ExchangeKind::Direct => f.write_str("direct"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Fail the publish instead of dropping the message when nothing routes it.
    pub mandatory: bool,
}

/// Upper bound on unacknowledged deliveries held by one consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Prefetch {
    #[default]
    Unbounded,
    Limit(NonZeroU16),
}

impl Prefetch {
    /// `0` means unbounded, as in AMQP `basic.qos`.
    pub fn from_count(count: u16) -> Self {
        NonZeroU16::new(count).map_or(Prefetch::Unbounded, Prefetch::Limit)
    }

    pub fn count(&self) -> u16 {
        match self {
            Prefetch::Unbounded => 0,
            Prefetch::Limit(n) => n.get(),
        }
    }

    /// Whether `outstanding` deliveries leave room for another one.
    pub fn has_room(&self, outstanding: usize) -> bool {
        match self {
            Prefetch::Unbounded => true,
            Prefetch::Limit(n) => outstanding < n.get() as usize,
        }
    }
}

impl fmt::Display for Prefetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefetch::Unbounded => f.write_str("unbounded"),
            Prefetch::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Operations the delivery protocol needs from a broker session.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Declare an exchange. Identical re-declaration is a no-op.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()>;

    /// Declare a queue and return its actual name. An empty `name` asks the
    /// broker to generate one.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Hand a message to the broker. Returns once the broker accepted the
    /// write; consumer acknowledgment is never awaited.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        options: PublishOptions,
    ) -> Result<()>;

    async fn set_prefetch(&self, prefetch: Prefetch) -> Result<()>;

    /// Start consuming `queue` with manual acknowledgment.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Stop handing new deliveries to `consumer_tag`. Deliveries already
    /// received stay outstanding until resolved or the session closes.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()>;

    /// Number of ready (not yet delivered) messages in `queue`.
    async fn queue_depth(&self, queue: &str) -> Result<u32>;

    /// Close the session. Unresolved deliveries go back to their queues.
    async fn close(&self) -> Result<()>;
}
