//! Consumer representation
//!
//! `Consumer` models one `consume` call on a session and holds the sending
//! side of the channel the broker pushes deliveries into.

use tokio::sync::mpsc::UnboundedSender;

use crate::broker::Delivery;

/// Consumer tags are only unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId {
    pub session: String,
    pub tag: String,
}

impl ConsumerId {
    pub fn new(session: &str, tag: &str) -> Self {
        Self {
            session: session.to_string(),
            tag: tag.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Consumer {
    pub id: ConsumerId,
    pub queue: String,
    pub sender: UnboundedSender<Delivery>,
}

impl Consumer {
    pub fn new(id: ConsumerId, queue: &str, sender: UnboundedSender<Delivery>) -> Self {
        Self {
            id,
            queue: queue.to_string(),
            sender,
        }
    }
}
