//! Publishing
//!
//! [`Publisher`] hands messages to the broker according to a [`PublishTarget`].
//! A publish returns once the broker accepted the write; it never waits for
//! consumers.

use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::{BrokerClient, Message, PublishOptions};
use crate::topology::PublishTarget;
use crate::utils::error::Result;

pub struct Publisher<S: BrokerClient + ?Sized> {
    session: Arc<S>,
}

impl<S: BrokerClient + ?Sized> Publisher<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    /// Wrap `payload` in a fresh message and publish it to `target`.
    pub async fn publish(&self, payload: impl Into<Vec<u8>>, target: &PublishTarget) -> Result<()> {
        let message = Message::new(payload)
            .persistent(target.persistent)
            .with_routing_key(target.routing_key.as_str());
        self.send(&message, target).await
    }

    /// Publish a prepared message. Its own persistence flag and expiration are kept.
    pub async fn send(&self, message: &Message, target: &PublishTarget) -> Result<()> {
        let options = PublishOptions {
            mandatory: target.mandatory,
        };
        match self
            .session
            .publish(&target.exchange, &target.routing_key, message, options)
            .await
        {
            Ok(()) => {
                info!(
                    exchange = %target.exchange,
                    routing_key = %target.routing_key,
                    message_id = %message.message_id,
                    persistent = message.persistent,
                    "Sent {}",
                    message.text()
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    exchange = %target.exchange,
                    routing_key = %target.routing_key,
                    "Publish failed: {}",
                    e
                );
                Err(e)
            }
        }
    }
}
