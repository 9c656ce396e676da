use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::info;

use super::{Handler, Outcome};
use crate::broker::Delivery;

/// Random delay applied before a broadcast is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    #[default]
    None,
    /// Uniform delay in `[min, max]`.
    Uniform { min: Duration, max: Duration },
}

impl Jitter {
    /// 1 to 4 seconds, enough to make subscribers visibly interleave.
    pub fn demo() -> Self {
        Jitter::Uniform {
            min: Duration::from_secs(1),
            max: Duration::from_secs(4),
        }
    }

    pub fn sample(&self) -> Duration {
        match *self {
            Jitter::None => Duration::ZERO,
            Jitter::Uniform { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;
                if max_ms <= min_ms {
                    return min;
                }
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(min_ms..=max_ms))
            }
        }
    }
}

/// Logs the text of every broadcast it receives.
#[derive(Debug, Clone, Default)]
pub struct LogLine {
    jitter: Jitter,
}

impl LogLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }
}

#[async_trait]
impl Handler for LogLine {
    async fn handle(&self, delivery: &Delivery) -> Outcome {
        let delay = self.jitter.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        info!(exchange = %delivery.exchange, "Received {}", delivery.text());
        Outcome::Success
    }
}
