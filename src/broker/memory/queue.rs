//! Queue state for the in-memory broker
//!
//! A `Queue` holds ready messages in delivery order plus the consumers that
//! compete for them. Consumers are served round-robin through `cursor`.

use std::collections::VecDeque;

use super::consumer::ConsumerId;
use crate::broker::{Message, QueueOptions};

/// A message sitting in a queue, waiting for a consumer.
#[derive(Debug, Clone)]
pub struct Enqueued {
    /// Broker-wide publish sequence, also the persistence key.
    pub seq: u64,
    pub message: Message,
    pub exchange: String,
    pub redelivered: bool,
    pub enqueued_at: i64,
}

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub options: QueueOptions,
    /// Session that declared an exclusive queue.
    pub owner: Option<String>,
    pub ready: VecDeque<Enqueued>,
    pub consumers: Vec<ConsumerId>,
    pub cursor: usize,
    had_consumers: bool,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions, owner: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            options,
            owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
            had_consumers: false,
        }
    }

    pub fn attach(&mut self, consumer: ConsumerId) {
        self.consumers.push(consumer);
        self.had_consumers = true;
    }

    pub fn detach(&mut self, consumer: &ConsumerId) {
        self.consumers.retain(|c| c != consumer);
        if self.cursor > self.consumers.len() {
            self.cursor = 0;
        }
    }

    /// Auto-delete queues go away once their last consumer leaves.
    pub fn should_auto_delete(&self) -> bool {
        self.options.auto_delete && self.had_consumers && self.consumers.is_empty()
    }

    pub fn is_owned_by_other(&self, session: &str) -> bool {
        self.owner.as_deref().is_some_and(|owner| owner != session)
    }

    /// Put a message back in publish order, ahead of anything published later.
    pub fn requeue(&mut self, entry: Enqueued) {
        let pos = self
            .ready
            .iter()
            .position(|queued| queued.seq > entry.seq)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, entry);
    }

    /// Remove and return every message whose TTL has elapsed.
    pub fn take_expired(&mut self, now: i64) -> Vec<Enqueued> {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.ready.len());
        for entry in self.ready.drain(..) {
            if entry.message.is_expired(entry.enqueued_at, now) {
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.ready = kept;
        expired
    }

    pub fn describe(&self) -> String {
        format!(
            "durable={}, exclusive={}, auto_delete={}",
            self.options.durable, self.options.exclusive, self.options.auto_delete
        )
    }
}
