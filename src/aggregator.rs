//! # MultiFeedReader - one polling task per source, one shared queue.
//!
//! ```text
//! register(feed) ──► PollWorker (tokio task) ──offer──► HandOffQueue ──► drain()
//!                        ▲ child token
//! shutdown() ── cancel ──┘ root token, then bounded wait on live handles
//! ```
//!
//! ## Rules
//! - The aggregator owns every worker handle (JoinHandle + CancellationToken)
//! - Closing is a one-way latch on the root token
//! - Finished handles are reaped lazily on register / list
//! - No worker error ever reaches the caller

use crate::model::{Feed, Message};
use crate::queue::HandOffQueue;
use crate::reader::SourceReaderFactory;
use crate::worker::{PollWorker, WorkerExit};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Durations the aggregator and its workers run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Pause between two polls of the same source, and before a reconnect
    pub poll_interval: Duration,
    /// Bounded wait of a single publish attempt
    pub offer_interval: Duration,
    /// How long `shutdown` waits for workers to exit
    pub shutdown_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            offer_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Outcome of [`MultiFeedReader::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// URLs of workers still running when the grace period ran out
    pub stuck: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.stuck.is_empty()
    }
}

struct WorkerHandle {
    url: Arc<str>,
    cancel: CancellationToken,
    join: JoinHandle<WorkerExit>,
}

/// Concurrent feed aggregator.
///
/// All methods take `&self`; share it behind an `Arc` to drain from one task
/// while registering from another. Dropping it closes it without waiting.
pub struct MultiFeedReader {
    timings: Timings,
    factory: Arc<dyn SourceReaderFactory>,
    queue: Arc<dyn HandOffQueue>,
    closed: CancellationToken,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl MultiFeedReader {
    pub fn new(
        timings: Timings,
        factory: Arc<dyn SourceReaderFactory>,
        queue: Arc<dyn HandOffQueue>,
    ) -> Self {
        Self {
            timings,
            factory,
            queue,
            closed: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Creates the aggregator and registers `feeds` right away.
    ///
    /// # Panics
    ///
    /// Same as [`register`](Self::register).
    pub fn with_feeds(
        timings: Timings,
        factory: Arc<dyn SourceReaderFactory>,
        queue: Arc<dyn HandOffQueue>,
        feeds: impl IntoIterator<Item = Feed>,
    ) -> Self {
        let reader = Self::new(timings, factory, queue);
        for feed in feeds {
            reader.register(feed);
        }
        reader
    }

    /// Starts one polling worker for `feed`.
    ///
    /// Fire-and-forget: source errors only ever show up in the logs. After
    /// [`shutdown`](Self::shutdown) this does nothing.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, feed: Feed) {
        if self.closed.is_cancelled() {
            tracing::debug!(feed = %feed, "Aggregator closed, ignoring registration");
            return;
        }

        let url = feed.url_arc();
        let worker = PollWorker::new(
            feed,
            Arc::clone(&self.factory),
            Arc::clone(&self.queue),
            self.timings,
            self.closed.clone(),
        );
        let cancel = worker.cancel_token();
        let join = tokio::spawn(worker.run());

        let mut workers = self.workers();
        workers.retain(|h| !h.join.is_finished());
        workers.push(WorkerHandle { url, cancel, join });
    }

    /// Asks a throwaway reader whether `url` is a usable source.
    ///
    /// Never registers a worker.
    pub async fn validate_url(&self, url: &str) -> bool {
        let reader = self.factory.open(&Feed::unsubscribed(url));
        reader.probe().await
    }

    /// Removes and returns everything queued so far, oldest first.
    ///
    /// Still allowed after shutdown; returns whatever was left behind.
    pub fn drain(&self) -> Vec<Message> {
        self.queue.drain()
    }

    /// Number of messages waiting to be drained.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Cancels the running worker(s) polling `url`.
    ///
    /// Returns `false` if no live worker polls that URL.
    pub fn cancel_source(&self, url: &str) -> bool {
        let workers = self.workers();
        let mut found = false;
        for handle in workers
            .iter()
            .filter(|h| &*h.url == url && !h.join.is_finished())
        {
            handle.cancel.cancel();
            found = true;
        }
        if found {
            tracing::info!(feed = %url, "Cancelled feed worker");
        }
        found
    }

    /// URLs of workers that have not exited yet, sorted.
    pub fn active_sources(&self) -> Vec<String> {
        let mut workers = self.workers();
        workers.retain(|h| !h.join.is_finished());
        let mut urls: Vec<String> = workers.iter().map(|h| h.url.to_string()).collect();
        urls.sort_unstable();
        urls
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Closes the aggregator and waits up to the grace period for workers to
    /// exit.
    ///
    /// Idempotent; a second call only waits again on stragglers. Workers still
    /// running when the grace period ends are left to finish on their own and
    /// named in the report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if !self.closed.is_cancelled() {
            tracing::info!("Closing feed aggregator");
            self.closed.cancel();
        }

        let mut handles = std::mem::take(&mut *self.workers());
        let grace = self.timings.shutdown_grace;
        let joins = futures::future::join_all(handles.iter_mut().map(|h| &mut h.join));

        let outcome = tokio::time::timeout(grace, joins).await;
        match outcome {
            Ok(results) => {
                for (handle, result) in handles.iter().zip(results) {
                    if let Err(e) = result {
                        tracing::error!(feed = %handle.url, error = %e, "Feed worker panicked");
                    }
                }
                handles.clear();
            }
            Err(_) => handles.retain(|h| !h.join.is_finished()),
        }

        let stuck: Vec<String> = handles.iter().map(|h| h.url.to_string()).collect();
        if !stuck.is_empty() {
            tracing::warn!(
                grace_secs = grace.as_secs_f64(),
                stuck = ?stuck,
                "Feed workers did not stop within grace period"
            );
            self.workers().extend(handles);
        }

        ShutdownReport { stuck }
    }

    fn workers(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MultiFeedReader {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
