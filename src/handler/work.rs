use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Handler, Outcome};
use crate::broker::Delivery;

pub const DEFAULT_MARKER: char = '.';
pub const DEFAULT_UNIT: Duration = Duration::from_secs(1);

/// Stands in for real work: sleeps one `unit` per `marker` in the payload.
///
/// `"a.b.c"` takes two units.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    marker: char,
    unit: Duration,
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            unit: DEFAULT_UNIT,
        }
    }
}

impl SimulatedWork {
    pub fn new(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    pub fn duration_for(&self, text: &str) -> Duration {
        let units = text.chars().filter(|c| *c == self.marker).count();
        self.unit.saturating_mul(units as u32)
    }
}

#[async_trait]
impl Handler for SimulatedWork {
    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let text = delivery.text();
        info!(tag = %delivery.tag, redelivered = delivery.redelivered, "Received {}", text);

        tokio::time::sleep(self.duration_for(&text)).await;

        info!(tag = %delivery.tag, "Done");
        Outcome::Success
    }
}
