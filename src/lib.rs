//! # fanwork
//!
//! `fanwork` implements two message-distribution patterns on top of an AMQP
//! broker:
//!
//! - **Fan-out broadcast**: every connected subscriber receives every message
//!   published to a fanout exchange. Subscribers that join later miss earlier
//!   messages.
//! - **Durable work queue**: competing workers share one durable queue; each
//!   message goes to exactly one worker at a time, limited by a prefetch
//!   window, and is requeued if the worker fails or disappears.
//!
//! ## Core Modules
//!
//! - `broker`: the [`BrokerClient`](broker::BrokerClient) seam, the RabbitMQ
//!   session and an in-process broker with the same delivery rules.
//! - `topology`: declares exchanges, queues and bindings for both patterns.
//! - `publisher`: hands messages to the broker.
//! - `dispatcher`: consumes a queue, runs handlers and acks or nacks each delivery.
//! - `handler`: the handler trait and the stock handlers.
//! - `config`: layered configuration (defaults, file, environment).
//! - `persistence`: sled-backed store for the in-process broker's durable queues.
//! - `utils`: errors, logging and shutdown signals.

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod persistence;
pub mod publisher;
pub mod topology;
pub mod utils;
