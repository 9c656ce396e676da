use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::engine::{Broker, SessionId};
use crate::broker::{
    BrokerClient, DeliveryStream, DeliveryTag, ExchangeKind, ExchangeOptions, Message, Prefetch,
    PublishOptions, QueueOptions,
};
use crate::utils::error::{BrokerError, Result};

/// One channel on a [`MemoryBroker`](super::MemoryBroker).
///
/// Dropping the session has the same effect as a dropped connection: its
/// consumers go away and every unresolved delivery is requeued.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    broker: Arc<Mutex<Broker>>,
}

impl MemorySession {
    pub(super) fn open(broker: Arc<Mutex<Broker>>) -> Result<Self> {
        let id = lock(&broker)?.open_session();
        Ok(Self { id, broker })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        self.state().map(|b| b.is_open(&self.id)).unwrap_or(false)
    }

    fn state(&self) -> Result<MutexGuard<'_, Broker>> {
        lock(&self.broker)
    }
}

fn lock(broker: &Mutex<Broker>) -> Result<MutexGuard<'_, Broker>> {
    broker
        .lock()
        .map_err(|_| BrokerError::Connection("memory broker state poisoned".to_string()))
}

#[async_trait]
impl BrokerClient for MemorySession {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()> {
        self.state()?.declare_exchange(&self.id, name, kind, options)
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String> {
        self.state()?.declare_queue(&self.id, name, options)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.state()?
            .bind_queue(&self.id, queue, exchange, routing_key)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        options: PublishOptions,
    ) -> Result<()> {
        self.state()?
            .publish(&self.id, exchange, routing_key, message, options.mandatory)
    }

    async fn set_prefetch(&self, prefetch: Prefetch) -> Result<()> {
        self.state()?.set_prefetch(&self.id, prefetch)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let rx = self.state()?.consume(&self.id, queue, consumer_tag)?;
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.state()?.cancel(&self.id, consumer_tag)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        self.state()?.ack(&self.id, tag)
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.state()?.nack(&self.id, tag, requeue)
    }

    async fn queue_depth(&self, queue: &str) -> Result<u32> {
        self.state()?.queue_depth(&self.id, queue)
    }

    async fn close(&self) -> Result<()> {
        self.state()?.close_session(&self.id);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Ok(mut broker) = self.broker.lock() {
            broker.close_session(&self.id);
        }
    }
}
