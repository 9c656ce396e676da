//! Topology setup
//!
//! A [`TopologyDescriptor`] describes which exchange, queue and binding a
//! participant relies on. [`TopologyManager`] declares them on a session before
//! anything is published or consumed. Producers and consumers declare
//! independently; declaration is idempotent, so whichever side starts first
//! creates the entities and the other side finds them in place.
//!
//! The two shapes used by this crate:
//!
//! | pattern   | exchange          | queue                                   | binding   |
//! |-----------|-------------------|-----------------------------------------|-----------|
//! | broadcast | `logs` (fanout)   | broker-named, exclusive, auto-delete    | empty key |
//! | work queue| default (`""`)    | `work_queues`, durable                  | implicit  |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::{BrokerClient, ExchangeKind, ExchangeOptions, QueueOptions};
use crate::utils::error::{BrokerError, Result};

pub const DEFAULT_FANOUT_EXCHANGE: &str = "logs";
pub const DEFAULT_WORK_QUEUE: &str = "work_queues";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueName {
    Named(String),
    /// Let the broker pick a unique name at declaration time.
    BrokerGenerated,
}

impl QueueName {
    /// Name passed to `queue.declare`; empty asks the broker for a fresh one.
    pub fn as_declared(&self) -> &str {
        match self {
            QueueName::Named(name) => name,
            QueueName::BrokerGenerated => "",
        }
    }
}

/// Which distribution pattern a topology implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Every subscriber gets its own copy.
    Broadcast,
    /// Competing consumers share one queue.
    WorkQueue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    /// Empty means the broker's default exchange.
    pub exchange: String,
    pub kind: ExchangeKind,
    pub queue: QueueName,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub binding_key: String,
}

impl TopologyDescriptor {
    /// Broadcast over the fanout exchange `exchange`. Each subscriber gets a
    /// private queue that disappears with its session.
    pub fn fanout(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            kind: ExchangeKind::Fanout,
            queue: QueueName::BrokerGenerated,
            durable: false,
            exclusive: true,
            auto_delete: true,
            binding_key: String::new(),
        }
    }

    /// Durable work queue `queue`, reached through the default exchange.
    pub fn work_queue(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            exchange: String::new(),
            kind: ExchangeKind::Direct,
            binding_key: queue.clone(),
            queue: QueueName::Named(queue),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    pub fn pattern(&self) -> Pattern {
        if self.exchange.is_empty() {
            Pattern::WorkQueue
        } else {
            Pattern::Broadcast
        }
    }

    fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
        }
    }

    /// A work queue on the default exchange is addressed by name, so it
    /// cannot be broker-named.
    pub fn validate(&self) -> Result<()> {
        if self.pattern() == Pattern::WorkQueue && self.queue == QueueName::BrokerGenerated {
            return Err(BrokerError::TopologyConflict(
                "a work queue on the default exchange needs an explicit name".to_string(),
            ));
        }
        Ok(())
    }

    /// Where and how a producer publishes for this topology.
    pub fn publish_target(&self) -> Result<PublishTarget> {
        self.validate()?;
        match self.pattern() {
            Pattern::Broadcast => Ok(PublishTarget {
                exchange: self.exchange.clone(),
                routing_key: self.binding_key.clone(),
                persistent: false,
                mandatory: false,
            }),
            Pattern::WorkQueue => Ok(PublishTarget {
                exchange: String::new(),
                routing_key: self.queue.as_declared().to_string(),
                persistent: true,
                mandatory: true,
            }),
        }
    }
}

/// A declared queue a dispatcher can consume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    /// Actual name, as returned by the broker.
    pub name: String,
    pub pattern: Pattern,
}

/// Publish parameters derived from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub exchange: String,
    pub routing_key: String,
    pub persistent: bool,
    pub mandatory: bool,
}

/// Declares topology on one session.
pub struct TopologyManager<S: BrokerClient + ?Sized> {
    session: Arc<S>,
}

impl<S: BrokerClient + ?Sized> TopologyManager<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    /// Declare everything a consumer needs and return the queue to read from.
    pub async fn declare(&self, descriptor: &TopologyDescriptor) -> Result<QueueHandle> {
        descriptor.validate()?;
        let pattern = descriptor.pattern();

        if pattern == Pattern::Broadcast {
            self.declare_exchange(descriptor).await?;
        }

        let name = self
            .session
            .declare_queue(descriptor.queue.as_declared(), descriptor.queue_options())
            .await?;

        if pattern == Pattern::Broadcast {
            self.session
                .bind_queue(&name, &descriptor.exchange, &descriptor.binding_key)
                .await?;
        }

        info!(queue = %name, exchange = %descriptor.exchange, ?pattern, "Topology declared");
        Ok(QueueHandle { name, pattern })
    }

    /// Declare only what a producer needs: the exchange for a broadcast, the
    /// queue for a work queue.
    pub async fn prepare_publisher(&self, descriptor: &TopologyDescriptor) -> Result<PublishTarget> {
        let target = descriptor.publish_target()?;
        match descriptor.pattern() {
            Pattern::Broadcast => self.declare_exchange(descriptor).await?,
            Pattern::WorkQueue => {
                self.session
                    .declare_queue(descriptor.queue.as_declared(), descriptor.queue_options())
                    .await?;
            }
        }
        Ok(target)
    }

    async fn declare_exchange(&self, descriptor: &TopologyDescriptor) -> Result<()> {
        self.session
            .declare_exchange(
                &descriptor.exchange,
                descriptor.kind,
                ExchangeOptions::default(),
            )
            .await
    }
}

#[cfg(test)]
mod tests;
