use std::collections::BTreeSet;

use crate::broker::{DeliveryTag, Prefetch};
use crate::utils::error::{BrokerError, Result};

/// Consumer-side view of the prefetch window.
///
/// The broker withholds deliveries once the limit is reached; this mirrors
/// that bound and catches any tag that is admitted or released twice.
#[derive(Debug, Default)]
pub struct PrefetchWindow {
    limit: Prefetch,
    outstanding: BTreeSet<DeliveryTag>,
}

impl PrefetchWindow {
    pub fn new(limit: Prefetch) -> Self {
        Self {
            limit,
            outstanding: BTreeSet::new(),
        }
    }

    pub fn limit(&self) -> Prefetch {
        self.limit
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn contains(&self, tag: DeliveryTag) -> bool {
        self.outstanding.contains(&tag)
    }

    /// Record a newly received delivery.
    pub fn admit(&mut self, tag: DeliveryTag) -> Result<()> {
        if self.outstanding.contains(&tag) {
            return Err(BrokerError::ProtocolViolation(format!(
                "delivery tag {tag} received while still outstanding"
            )));
        }
        if !self.limit.has_room(self.outstanding.len()) {
            return Err(BrokerError::ProtocolViolation(format!(
                "broker exceeded prefetch window of {}",
                self.limit
            )));
        }
        self.outstanding.insert(tag);
        Ok(())
    }

    /// Record that `tag` was acked or nacked.
    pub fn release(&mut self, tag: DeliveryTag) -> Result<()> {
        if !self.outstanding.remove(&tag) {
            return Err(BrokerError::ProtocolViolation(format!(
                "delivery tag {tag} is not outstanding"
            )));
        }
        Ok(())
    }
}
