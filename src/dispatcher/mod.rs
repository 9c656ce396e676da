//! # Delivery dispatcher
//!
//! [`DeliveryDispatcher`] consumes one queue on one session, runs a
//! [`Handler`] per delivery and resolves every delivery exactly once.
//!
//! ## Flow
//! ```text
//! set_prefetch ─► consume ─► loop {
//!     cancelled?      ─► graceful shutdown
//!     handler done    ─► ack | nack(requeue) | ack-and-log
//!     next delivery   ─► window.admit ─► spawn handler
//! }
//! ```
//!
//! Handlers run in a `JoinSet`, so a slow one never blocks the loop; only the
//! loop talks to the session. How many run at once is bounded by the prefetch
//! limit the broker enforces.
//!
//! ## Shutdown
//! On cancellation the consumer is cancelled, in-flight handlers get
//! [`DeliveryDispatcher::with_grace`] to finish and be resolved, the rest are
//! aborted and left to the broker for redelivery. The session is closed last.

mod window;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerClient, DeliveryTag, Prefetch};
use crate::handler::{Handler, Outcome};
use crate::topology::{Pattern, QueueHandle};
use crate::utils::error::{BrokerError, Result};

pub use window::PrefetchWindow;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What to do with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Nack with requeue so another consumer retries it.
    Requeue,
    /// Log and ack. Broadcast copies are not worth retrying.
    LogAndAck,
}

impl From<Pattern> for FailurePolicy {
    fn from(pattern: Pattern) -> Self {
        match pattern {
            Pattern::WorkQueue => FailurePolicy::Requeue,
            Pattern::Broadcast => FailurePolicy::LogAndAck,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Every in-flight delivery was resolved within the grace period.
    #[default]
    Clean,
    /// The grace period ran out; unresolved deliveries were abandoned.
    Forced,
}

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub acked: usize,
    pub requeued: usize,
    /// Handler failures, whatever the policy did with them.
    pub failed: usize,
    /// Deliveries left unresolved for the broker to redeliver.
    pub abandoned: usize,
    pub shutdown: ShutdownKind,
}

type Completed = std::result::Result<(DeliveryTag, Outcome), JoinError>;

enum Stop {
    Cancelled,
    Failed(BrokerError),
}

pub struct DeliveryDispatcher<S: BrokerClient + ?Sized> {
    session: Arc<S>,
    shutdown: CancellationToken,
    grace: Duration,
    consumer_tag: String,
}

impl<S: BrokerClient + ?Sized> DeliveryDispatcher<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            shutdown: CancellationToken::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
            consumer_tag: format!("fanwork-{}", Uuid::new_v4()),
        }
    }

    /// Stop when `token` is cancelled instead of an internal one.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Consume `queue` until shutdown is requested or the session drops.
    ///
    /// Returns the run's counters on shutdown. A dropped session or a
    /// protocol violation ends the run with an error after in-flight handlers
    /// are aborted.
    pub async fn run<H>(
        &self,
        queue: &QueueHandle,
        prefetch: Prefetch,
        handler: Arc<H>,
    ) -> Result<DispatchReport>
    where
        H: Handler + ?Sized,
    {
        let policy = FailurePolicy::from(queue.pattern);
        let mut window = PrefetchWindow::new(prefetch);
        let mut tasks: JoinSet<(DeliveryTag, Outcome)> = JoinSet::new();
        let mut report = DispatchReport::default();

        self.session.set_prefetch(prefetch).await?;
        let mut deliveries = self.session.consume(&queue.name, &self.consumer_tag).await?;
        info!(queue = %queue.name, %prefetch, ?policy, "Consumer ready");

        let stop = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break Stop::Cancelled,

                Some(completed) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = self.complete(completed, policy, &mut window, &mut report).await {
                        break Stop::Failed(e);
                    }
                }

                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = window.admit(delivery.tag) {
                            break Stop::Failed(e);
                        }
                        report.delivered += 1;
                        debug!(tag = %delivery.tag, redelivered = delivery.redelivered, "Dispatching delivery");

                        let handler = Arc::clone(&handler);
                        tasks.spawn(async move {
                            let outcome = AssertUnwindSafe(handler.handle(&delivery))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| Outcome::failure("handler panicked"));
                            (delivery.tag, outcome)
                        });
                    }
                    Some(Err(e)) => break Stop::Failed(e),
                    None => {
                        break Stop::Failed(BrokerError::Connection(
                            "delivery stream ended, session dropped".to_string(),
                        ))
                    }
                },
            }
        };

        match stop {
            Stop::Cancelled => {
                self.shutdown_gracefully(tasks, policy, &mut window, &mut report)
                    .await?;
                info!(?report, "Dispatcher stopped");
                Ok(report)
            }
            Stop::Failed(e) => {
                report.abandoned += tasks.len();
                tasks.abort_all();
                error!(error = %e, abandoned = report.abandoned, "Dispatcher failed");
                self.close_after_failure().await;
                Err(e)
            }
        }
    }

    /// Turn a finished handler into an ack or nack.
    async fn complete(
        &self,
        completed: Completed,
        policy: FailurePolicy,
        window: &mut PrefetchWindow,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let (tag, outcome) = match completed {
            Ok(done) => done,
            Err(e) => {
                // Only reachable for aborted tasks; the delivery stays unacked.
                warn!(error = %e, "Handler task did not complete");
                report.abandoned += 1;
                return Ok(());
            }
        };

        window.release(tag)?;
        match (outcome, policy) {
            (Outcome::Success, _) => {
                self.session.ack(tag).await?;
                report.acked += 1;
            }
            (Outcome::Failure(reason), FailurePolicy::Requeue) => {
                warn!(%tag, %reason, "Handler failed, requeueing");
                self.session.nack(tag, true).await?;
                report.failed += 1;
                report.requeued += 1;
            }
            (Outcome::Failure(reason), FailurePolicy::LogAndAck) => {
                warn!(%tag, %reason, "Handler failed, dropping broadcast copy");
                self.session.ack(tag).await?;
                report.failed += 1;
                report.acked += 1;
            }
        }
        Ok(())
    }

    async fn shutdown_gracefully(
        &self,
        mut tasks: JoinSet<(DeliveryTag, Outcome)>,
        policy: FailurePolicy,
        window: &mut PrefetchWindow,
        report: &mut DispatchReport,
    ) -> Result<()> {
        info!(in_flight = tasks.len(), grace = ?self.grace, "Shutdown requested");

        if let Err(e) = self.session.cancel(&self.consumer_tag).await {
            warn!(error = %e, "Failed to cancel consumer");
        }

        let deadline = tokio::time::sleep(self.grace);
        tokio::pin!(deadline);

        let mut failure = None;
        report.shutdown = loop {
            if tasks.is_empty() {
                break ShutdownKind::Clean;
            }
            tokio::select! {
                _ = &mut deadline => break ShutdownKind::Forced,
                Some(completed) = tasks.join_next() => {
                    if let Err(e) = self.complete(completed, policy, window, report).await {
                        failure = Some(e);
                        break ShutdownKind::Forced;
                    }
                }
            }
        };

        if report.shutdown == ShutdownKind::Forced {
            report.abandoned += tasks.len();
            warn!(abandoned = tasks.len(), "Aborting remaining handlers");
            tasks.abort_all();
        }

        match failure {
            Some(e) => {
                error!(error = %e, "Failed to resolve a delivery during shutdown");
                self.close_after_failure().await;
                Err(e)
            }
            None => self.session.close().await,
        }
    }

    /// Close the session without masking the error that ended the run.
    async fn close_after_failure(&self) {
        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Failed to close session");
        }
    }
}
