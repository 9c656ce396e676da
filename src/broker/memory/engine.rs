//! Broker engine
//!
//! This module contains the in-memory broker state responsible for:
//! - declaring exchanges and queues, rejecting conflicting re-declarations
//! - routing published messages through the default, fanout and direct exchanges
//! - handing ready messages to consumers within their session's prefetch window
//! - tracking unacknowledged deliveries per session and requeueing them on
//!   nack or session close
//! - persisting persistent messages on durable queues via `Persistence`
//!
//! Concurrency and usage notes:
//! - The API here is synchronous and designed to be held behind a lock
//!   (`Arc<Mutex<Broker>>`) by `MemorySession`. Deliveries leave through
//!   unbounded channels, so no operation blocks while the lock is held.
//! - Any protocol violation closes the offending session, as an AMQP broker
//!   closes the channel.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::consumer::{Consumer, ConsumerId};
use super::exchange::Exchange;
use super::queue::{Enqueued, Queue};
use crate::broker::{
    Delivery, DeliveryTag, ExchangeKind, ExchangeOptions, Message, Prefetch, QueueOptions,
};
use crate::persistence::Persistence;
use crate::utils::error::{BrokerError, Result};

pub type SessionId = String;

#[derive(Debug)]
struct Unacked {
    queue: String,
    consumer: ConsumerId,
    entry: Enqueued,
}

#[derive(Debug, Default)]
struct SessionState {
    prefetch: Prefetch,
    next_tag: u64,
    unacked: BTreeMap<DeliveryTag, Unacked>,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub exchanges: HashMap<String, Exchange>,
    pub queues: HashMap<String, Queue>,
    pub consumers: HashMap<ConsumerId, Consumer>,
    sessions: HashMap<SessionId, SessionState>,
    next_seq: u64,
    persistence: Option<Persistence>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn no_queue(name: &str) -> BrokerError {
    BrokerError::TopologyConflict(format!("no queue '{name}'"))
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_persistence(persistence: Persistence) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::default()
        }
    }

    pub fn open_session(&mut self) -> SessionId {
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), SessionState::default());
        debug!(session = %id, "Session opened");
        id
    }

    pub fn is_open(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }

    fn ensure_open(&self, session: &str) -> Result<()> {
        if self.is_open(session) {
            Ok(())
        } else {
            Err(BrokerError::ProtocolViolation(format!(
                "session {session} is closed"
            )))
        }
    }

    pub fn declare_exchange(
        &mut self,
        session: &str,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()> {
        self.ensure_open(session)?;
        if name.is_empty() {
            return Err(BrokerError::ProtocolViolation(
                "the default exchange cannot be declared".to_string(),
            ));
        }

        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.options != options => {
                let wanted = Exchange::new(name, kind, options);
                Err(BrokerError::TopologyConflict(format!(
                    "exchange '{name}' exists as {}, declared as {}",
                    existing.describe(),
                    wanted.describe()
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.exchanges
                    .insert(name.to_string(), Exchange::new(name, kind, options));
                info!(exchange = %name, kind = %kind, "Exchange declared");
                Ok(())
            }
        }
    }

    pub fn declare_queue(
        &mut self,
        session: &str,
        name: &str,
        options: QueueOptions,
    ) -> Result<String> {
        self.ensure_open(session)?;
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if existing.options != options {
                let wanted = Queue::new(&name, options, None);
                return Err(BrokerError::TopologyConflict(format!(
                    "queue '{name}' exists with {}, declared with {}",
                    existing.describe(),
                    wanted.describe()
                )));
            }
            if existing.is_owned_by_other(session) {
                return Err(BrokerError::TopologyConflict(format!(
                    "queue '{name}' is exclusive to another session"
                )));
            }
            return Ok(name);
        }

        let owner = options.exclusive.then(|| session.to_string());
        let mut queue = Queue::new(&name, options, owner);
        if options.durable {
            self.restore(&mut queue)?;
        }
        info!(queue = %name, restored = queue.ready.len(), "Queue declared");
        self.queues.insert(name.clone(), queue);
        Ok(name)
    }

    /// Reload persisted messages for a durable queue being (re)created.
    fn restore(&mut self, queue: &mut Queue) -> Result<()> {
        let stored = match &self.persistence {
            Some(store) => store.load_messages(&queue.name)?,
            None => return Ok(()),
        };

        let now = now_ms();
        for (seq, message) in stored {
            self.next_seq = self.next_seq.max(seq + 1);
            queue.ready.push_back(Enqueued {
                seq,
                message,
                exchange: String::new(),
                redelivered: false,
                enqueued_at: now,
            });
        }
        Ok(())
    }

    pub fn bind_queue(
        &mut self,
        session: &str,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<()> {
        self.ensure_open(session)?;
        if !self.queues.contains_key(queue) {
            return Err(no_queue(queue));
        }
        let target = self.exchanges.get_mut(exchange).ok_or_else(|| {
            BrokerError::TopologyConflict(format!("no exchange '{exchange}'"))
        })?;
        target.bind(queue, routing_key);
        debug!(queue = %queue, exchange = %exchange, routing_key = %routing_key, "Queue bound");
        Ok(())
    }

    pub fn publish(
        &mut self,
        session: &str,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        mandatory: bool,
    ) -> Result<()> {
        self.ensure_open(session)?;
        let targets = self.route(exchange, routing_key)?;

        if targets.is_empty() {
            if mandatory {
                return Err(BrokerError::PublishRejected {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                });
            }
            debug!(exchange = %exchange, routing_key = %routing_key, "No queue bound, message dropped");
            return Ok(());
        }

        let now = now_ms();
        for name in &targets {
            let seq = self.next_seq;
            self.next_seq += 1;

            let mut copy = message.clone();
            copy.routing_key = routing_key.to_string();

            let durable = self.queues.get(name).is_some_and(|q| q.options.durable);
            if durable && copy.persistent {
                if let Some(store) = &self.persistence {
                    store.store_message(name, seq, &copy)?;
                }
            }

            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(Enqueued {
                    seq,
                    message: copy,
                    exchange: exchange.to_string(),
                    redelivered: false,
                    enqueued_at: now,
                });
            }
        }

        for name in &targets {
            self.dispatch(name);
        }
        Ok(())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect());
        }

        let source = self.exchanges.get(exchange).ok_or_else(|| {
            BrokerError::TopologyConflict(format!("no exchange '{exchange}'"))
        })?;
        Ok(source
            .route(routing_key)
            .into_iter()
            .filter(|queue| self.queues.contains_key(queue))
            .collect())
    }

    pub fn set_prefetch(&mut self, session: &str, prefetch: Prefetch) -> Result<()> {
        let state = self.session_mut(session)?;
        state.prefetch = prefetch;
        Ok(())
    }

    pub fn consume(
        &mut self,
        session: &str,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<UnboundedReceiver<Delivery>> {
        self.ensure_open(session)?;
        let id = ConsumerId::new(session, consumer_tag);
        if self.consumers.contains_key(&id) {
            return Err(BrokerError::ProtocolViolation(format!(
                "consumer tag '{consumer_tag}' already in use"
            )));
        }

        let target = self.queues.get_mut(queue).ok_or_else(|| no_queue(queue))?;
        if target.is_owned_by_other(session) {
            return Err(BrokerError::TopologyConflict(format!(
                "queue '{queue}' is exclusive to another session"
            )));
        }
        target.attach(id.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers
            .insert(id.clone(), Consumer::new(id, queue, tx));
        info!(queue = %queue, consumer = %consumer_tag, "Consumer attached");

        self.dispatch(queue);
        Ok(rx)
    }

    pub fn cancel(&mut self, session: &str, consumer_tag: &str) -> Result<()> {
        self.ensure_open(session)?;
        let id = ConsumerId::new(session, consumer_tag);
        if let Some(consumer) = self.consumers.remove(&id) {
            self.detach(&consumer.queue, &id);
            info!(queue = %consumer.queue, consumer = %consumer_tag, "Consumer cancelled");
        }
        Ok(())
    }

    pub fn ack(&mut self, session: &str, tag: DeliveryTag) -> Result<()> {
        let unacked = self.take_unacked(session, tag)?;
        self.forget(&unacked.queue, &unacked.entry);
        self.dispatch(&unacked.queue);
        Ok(())
    }

    pub fn nack(&mut self, session: &str, tag: DeliveryTag, requeue: bool) -> Result<()> {
        let unacked = self.take_unacked(session, tag)?;
        let queue = unacked.queue.clone();
        if requeue {
            self.requeue(unacked);
        } else {
            self.forget(&unacked.queue, &unacked.entry);
        }
        self.dispatch(&queue);
        Ok(())
    }

    pub fn queue_depth(&mut self, session: &str, queue: &str) -> Result<u32> {
        self.ensure_open(session)?;
        self.purge_expired(queue);
        let target = self.queues.get(queue).ok_or_else(|| no_queue(queue))?;
        Ok(target.ready.len() as u32)
    }

    /// Close a session: drop its consumers, requeue whatever it left
    /// unresolved and delete the exclusive queues it owned.
    pub fn close_session(&mut self, session: &str) {
        let Some(state) = self.sessions.remove(session) else {
            return;
        };

        let mut touched = BTreeSet::new();

        let owned_consumers: Vec<ConsumerId> = self
            .consumers
            .keys()
            .filter(|id| id.session == session)
            .cloned()
            .collect();
        for id in owned_consumers {
            if let Some(consumer) = self.consumers.remove(&id) {
                self.detach(&consumer.queue, &id);
                touched.insert(consumer.queue);
            }
        }

        let outstanding = state.unacked.len();
        for (_, unacked) in state.unacked {
            touched.insert(unacked.queue.clone());
            self.requeue(unacked);
        }

        let exclusive: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.owner.as_deref() == Some(session))
            .map(|q| q.name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }

        for name in touched {
            self.dispatch(&name);
        }

        if let Some(store) = &self.persistence {
            if let Err(e) = store.flush() {
                warn!(session = %session, error = %e, "Failed to flush persisted messages");
            }
        }

        info!(session = %session, requeued = outstanding, "Session closed");
    }

    fn session_mut(&mut self, session: &str) -> Result<&mut SessionState> {
        self.sessions.get_mut(session).ok_or_else(|| {
            BrokerError::ProtocolViolation(format!("session {session} is closed"))
        })
    }

    fn take_unacked(&mut self, session: &str, tag: DeliveryTag) -> Result<Unacked> {
        let state = self.session_mut(session)?;
        match state.unacked.remove(&tag) {
            Some(unacked) => Ok(unacked),
            None => {
                warn!(session = %session, tag = %tag, "Unknown delivery tag, closing session");
                self.close_session(session);
                Err(BrokerError::ProtocolViolation(format!(
                    "unknown delivery tag {tag}"
                )))
            }
        }
    }

    fn requeue(&mut self, unacked: Unacked) {
        match self.queues.get_mut(&unacked.queue) {
            Some(queue) => {
                let mut entry = unacked.entry;
                entry.redelivered = true;
                queue.requeue(entry);
            }
            None => self.forget(&unacked.queue, &unacked.entry),
        }
    }

    /// Drop the persisted copy of a message that has left the broker for good.
    fn forget(&self, queue: &str, entry: &Enqueued) {
        if !entry.message.persistent {
            return;
        }
        if let Some(store) = &self.persistence {
            if let Err(e) = store.remove_message(queue, entry.seq) {
                warn!(queue = %queue, seq = entry.seq, error = %e, "Failed to remove persisted message");
            }
        }
    }

    fn detach(&mut self, queue: &str, id: &ConsumerId) {
        let auto_delete = match self.queues.get_mut(queue) {
            Some(target) => {
                target.detach(id);
                target.should_auto_delete()
            }
            None => false,
        };
        if auto_delete {
            self.delete_queue(queue);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        let Some(queue) = self.queues.remove(name) else {
            return;
        };
        for exchange in self.exchanges.values_mut() {
            exchange.unbind_queue(name);
        }
        self.consumers.retain(|_, consumer| consumer.queue != name);
        for entry in &queue.ready {
            self.forget(name, entry);
        }
        info!(queue = %name, dropped = queue.ready.len(), "Queue deleted");
    }

    fn purge_expired(&mut self, queue: &str) {
        let now = now_ms();
        let expired = match self.queues.get_mut(queue) {
            Some(target) => target.take_expired(now),
            None => return,
        };
        for entry in &expired {
            debug!(queue = %queue, message_id = %entry.message.message_id, "Message expired");
            self.forget(queue, entry);
        }
    }

    /// Pick the next consumer of `queue`, round-robin, whose session still has
    /// room in its prefetch window.
    fn next_consumer_with_room(&mut self, queue: &str) -> Option<ConsumerId> {
        let target = self.queues.get(queue)?;
        let count = target.consumers.len();

        let chosen = (0..count).find_map(|step| {
            let idx = (target.cursor + step) % count;
            let id = &target.consumers[idx];
            let state = self.sessions.get(&id.session)?;
            let outstanding = state
                .unacked
                .values()
                .filter(|unacked| &unacked.consumer == id)
                .count();
            state
                .prefetch
                .has_room(outstanding)
                .then(|| (idx, id.clone()))
        });

        let (idx, id) = chosen?;
        // Left unreduced: a consumer attached later lands at `count`.
        if let Some(target) = self.queues.get_mut(queue) {
            target.cursor = idx + 1;
        }
        Some(id)
    }

    /// Hand ready messages to consumers until the queue is empty or every
    /// consumer's window is full.
    fn dispatch(&mut self, queue: &str) {
        self.purge_expired(queue);

        loop {
            let has_ready = self
                .queues
                .get(queue)
                .is_some_and(|target| !target.ready.is_empty());
            if !has_ready {
                return;
            }

            let Some(id) = self.next_consumer_with_room(queue) else {
                return;
            };
            let Some(entry) = self
                .queues
                .get_mut(queue)
                .and_then(|target| target.ready.pop_front())
            else {
                return;
            };
            let Some(state) = self.sessions.get_mut(&id.session) else {
                if let Some(target) = self.queues.get_mut(queue) {
                    target.requeue(entry);
                }
                return;
            };

            state.next_tag += 1;
            let tag = DeliveryTag(state.next_tag);
            let delivery = Delivery {
                tag,
                message: entry.message.clone(),
                redelivered: entry.redelivered,
                exchange: entry.exchange.clone(),
                routing_key: entry.message.routing_key.clone(),
            };

            let sent = self
                .consumers
                .get(&id)
                .is_some_and(|consumer| consumer.sender.send(delivery).is_ok());

            if sent {
                debug!(queue = %queue, consumer = %id.tag, tag = %tag, "Delivered");
                state.unacked.insert(
                    tag,
                    Unacked {
                        queue: queue.to_string(),
                        consumer: id,
                        entry,
                    },
                );
            } else {
                warn!(queue = %queue, consumer = %id.tag, "Consumer gone, detaching");
                if let Some(target) = self.queues.get_mut(queue) {
                    target.requeue(entry);
                }
                self.consumers.remove(&id);
                self.detach(queue, &id);
            }
        }
    }

    pub fn ready_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.ready.len())
    }

    /// Unacknowledged deliveries from `queue`, across all sessions.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.sessions
            .values()
            .flat_map(|state| state.unacked.values())
            .filter(|unacked| unacked.queue == queue)
            .count()
    }
}
