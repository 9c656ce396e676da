//! In-process broker
//!
//! `MemoryBroker` keeps exchanges, queues and per-session delivery state
//! behind one lock and follows the AMQP rules the delivery protocol relies on:
//! default/fanout/direct routing, broker-named exclusive queues, auto-delete,
//! mandatory publishes, per-consumer prefetch and requeue on nack or session
//! loss. Every [`MemorySession`] opened from it behaves like one channel.

pub mod consumer;
pub mod engine;
pub mod exchange;
pub mod queue;
pub mod session;

use std::sync::{Arc, Mutex};

pub use engine::Broker;
pub use session::MemorySession;

use crate::persistence::Persistence;
use crate::utils::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Broker>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistent messages on durable queues are written to `persistence`
    /// and restored when the queue is declared again.
    pub fn with_persistence(persistence: Persistence) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Broker::new_with_persistence(persistence))),
        }
    }

    pub fn session(&self) -> Result<MemorySession> {
        MemorySession::open(Arc::clone(&self.inner))
    }

    /// Ready messages in `queue`, or `None` if it does not exist.
    pub fn ready_count(&self, queue: &str) -> Option<usize> {
        self.inner.lock().ok()?.ready_count(queue)
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|broker| broker.unacked_count(queue))
            .unwrap_or(0)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.ready_count(queue).is_some()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .map(|broker| broker.queues.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
