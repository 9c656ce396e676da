//! Message handlers
//!
//! A [`Handler`] processes one delivery and reports an [`Outcome`]; it never
//! acknowledges anything itself. The dispatcher turns the outcome into an ack
//! or nack. Delivery is at-least-once, so a handler may see the same message
//! more than once.

pub mod broadcast;
pub mod work;

use std::future::Future;

use async_trait::async_trait;

use crate::broker::Delivery;

pub use broadcast::{Jitter, LogLine};
pub use work::SimulatedWork;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Processing failed; the reason is logged by the dispatcher.
    Failure(String),
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Outcome;
}

/// Closure-backed handler.
///
/// The closure receives an owned copy of the delivery and builds a fresh
/// future per invocation.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Outcome {
        (self.f)(delivery.clone()).await
    }
}
