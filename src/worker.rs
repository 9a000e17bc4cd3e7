//! Per-source polling worker.
//!
//! ```text
//! STARTING ──► POLLING ──► SLEEPING ──► POLLING ...
//!    ▲            │ poll error             │
//!    └── sleep ◄──┘                        ▼
//!                          STOPPED (closed | cancelled | no consumers)
//! ```
//!
//! STARTING opens a fresh reader from the factory. POLLING checks the stop
//! signal and the consumer set, polls once and publishes the batch. A failed
//! poll sleeps one interval and goes back to STARTING; there is no failure
//! budget. Every suspension point (poll, publish, sleep) is raced against the
//! worker's cancellation token.

use crate::aggregator::Timings;
use crate::model::{Feed, Message};
use crate::queue::HandOffQueue;
use crate::reader::SourceReaderFactory;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The feed's consumer set was observed empty
    NoConsumers,
    /// The aggregator was closed
    Closed,
    /// This worker alone was cancelled
    Cancelled,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerExit::NoConsumers => "no_consumers",
            WorkerExit::Closed => "closed",
            WorkerExit::Cancelled => "cancelled",
        })
    }
}

pub(crate) struct PollWorker {
    feed: Feed,
    factory: Arc<dyn SourceReaderFactory>,
    queue: Arc<dyn HandOffQueue>,
    timings: Timings,
    /// Aggregator-wide close signal
    closed: CancellationToken,
    /// Child of `closed`; cancelled on close or by `cancel_source`
    cancel: CancellationToken,
}

impl PollWorker {
    pub(crate) fn new(
        feed: Feed,
        factory: Arc<dyn SourceReaderFactory>,
        queue: Arc<dyn HandOffQueue>,
        timings: Timings,
        closed: CancellationToken,
    ) -> Self {
        let cancel = closed.child_token();
        Self {
            feed,
            factory,
            queue,
            timings,
            closed,
            cancel,
        }
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn run(self) -> WorkerExit {
        tracing::info!(feed = %self.feed, "Starting to read feed");
        let exit = self.run_loop().await;
        tracing::info!(feed = %self.feed, reason = %exit, "Feed worker stopped");
        exit
    }

    async fn run_loop(&self) -> WorkerExit {
        let mut failures: u64 = 0;

        loop {
            if let Some(exit) = self.stop_requested() {
                return exit;
            }
            let mut reader = self.factory.open(&self.feed);

            loop {
                if let Some(exit) = self.stop_requested() {
                    return exit;
                }
                if !self.feed.has_consumers() {
                    tracing::info!(feed = %self.feed, "No consumers for feed");
                    return WorkerExit::NoConsumers;
                }

                tracing::debug!(feed = %self.feed, "Checking feed");
                let polled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return self.exit_reason(),
                    polled = reader.poll() => polled,
                };

                match polled {
                    Ok(batch) => {
                        if let Err(exit) = self.publish(batch).await {
                            return exit;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            feed = %self.feed,
                            error = %e,
                            failures = failures,
                            "Feed poll failed, reconnecting after poll interval"
                        );
                        if let Some(exit) = self.pause().await {
                            return exit;
                        }
                        break;
                    }
                }

                if let Some(exit) = self.pause().await {
                    return exit;
                }
            }
        }
    }

    /// Publishes `batch` in order, retrying each timed offer until it lands or
    /// the worker is stopped. Whatever is left of the batch is then dropped.
    async fn publish(&self, batch: Vec<Message>) -> Result<(), WorkerExit> {
        let total = batch.len();

        for (published, message) in batch.into_iter().enumerate() {
            let mut pending = message;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(self.abandon(total - published));
                }

                let offered = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    offered = self.queue.offer(pending, self.timings.offer_interval) => Some(offered),
                };
                match offered {
                    Some(Ok(())) => break,
                    Some(Err(back)) => pending = back,
                    None => return Err(self.abandon(total - published)),
                }
            }
        }

        if total > 0 {
            tracing::debug!(feed = %self.feed, count = total, "Published messages");
        }
        Ok(())
    }

    fn abandon(&self, dropped: usize) -> WorkerExit {
        tracing::debug!(
            feed = %self.feed,
            dropped = dropped,
            "Dropping unpublished messages on stop"
        );
        self.exit_reason()
    }

    /// Sleeps one poll interval unless stopped first.
    async fn pause(&self) -> Option<WorkerExit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(self.exit_reason()),
            _ = tokio::time::sleep(self.timings.poll_interval) => self.stop_requested(),
        }
    }

    fn stop_requested(&self) -> Option<WorkerExit> {
        self.cancel.is_cancelled().then(|| self.exit_reason())
    }

    fn exit_reason(&self) -> WorkerExit {
        if self.closed.is_cancelled() {
            WorkerExit::Closed
        } else {
            WorkerExit::Cancelled
        }
    }
}
