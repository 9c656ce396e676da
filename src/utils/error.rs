//! The `error` module defines the error types shared by every layer of `fanwork`.
//!
//! Handler failures are deliberately absent: a handler reports
//! [`Outcome::Failure`](crate::handler::Outcome::Failure) and the dispatcher
//! recovers from it locally. Everything here is surfaced to the caller.

use thiserror::Error;

/// Result type for broker, topology, publish and dispatch operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised while talking to the broker or driving the delivery protocol.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker is unreachable or the session dropped mid-run.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A declaration disagrees with the topology the broker already holds.
    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    /// A mandatory publish found no queue to route to.
    #[error("publish rejected: no route from exchange '{exchange}' with key '{routing_key}'")]
    PublishRejected {
        exchange: String,
        routing_key: String,
    },

    /// Double resolution of a delivery tag, or use of a closed session.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The durable message store failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl BrokerError {
    /// Whether the error must abort the process rather than be retried by a
    /// supervisor. Only a dropped connection is worth restarting for.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BrokerError::Connection(_))
    }
}

impl From<sled::Error> for BrokerError {
    fn from(err: sled::Error) -> Self {
        BrokerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Persistence(err.to_string())
    }
}
