//! The source-reader seam between workers and the network.
//!
//! A worker owns exactly one [`SourceReader`] at a time and gets a fresh one
//! from the shared [`SourceReaderFactory`] every time it (re)connects.
//!
//! [`HttpReaderFactory`] / [`HttpSourceReader`] are the production
//! implementation; tests substitute scripted readers. The HTTP factory keeps
//! the reported-guid state per source URL, so a reader opened after a
//! transient failure picks up exactly where the previous one stopped.

use crate::feed::{
    discover_feed, fetch_feed, parse_feed, redirect_policy, FetchError, FetchSettings,
    ParsedArticle,
};
use crate::model::{Feed, Message};
use crate::util::UrlPolicy;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Reads one source.
#[async_trait]
pub trait SourceReader: Send {
    /// Returns the messages that became available since the previous call,
    /// in the order they should be delivered.
    ///
    /// Never reports an item that this reader, or an earlier reader opened
    /// for the same source by the same factory, already reported.
    async fn poll(&mut self) -> Result<Vec<Message>, FetchError>;

    /// Whether the source URL is reachable and parses as a feed.
    ///
    /// Transport and parse errors are swallowed and reported as `false`.
    async fn probe(&self) -> bool;
}

/// Creates a private reader bound to one feed.
pub trait SourceReaderFactory: Send + Sync + 'static {
    fn open(&self, feed: &Feed) -> Box<dyn SourceReader>;
}

/// Settings for HTTP-backed readers.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub fetch: FetchSettings,
    pub url_policy: UrlPolicy,
    /// Report entries already present on a source's first successful poll
    pub deliver_backlog: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("multifeed/", env!("CARGO_PKG_VERSION")).to_string(),
            fetch: FetchSettings::default(),
            url_policy: UrlPolicy::default(),
            deliver_backlog: false,
        }
    }
}

/// Guids remembered per source before the least recently seen are evicted.
/// Grows to twice the size of the largest document seen for that source.
const SEEN_CAPACITY: usize = 4096;

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

/// Reported-guid memory of one source.
struct SeenGuids {
    primed: bool,
    guids: LruCache<String, ()>,
}

impl SeenGuids {
    fn new() -> Self {
        Self {
            primed: false,
            guids: LruCache::new(capacity(SEEN_CAPACITY)),
        }
    }

    /// Keeps a whole document of `entries` guids from evicting itself.
    fn reserve(&mut self, entries: usize) {
        let needed = entries.saturating_mul(2);
        if needed > self.guids.cap().get() {
            self.guids.resize(capacity(needed));
        }
    }

    /// Records `guid`; true when it was not known yet.
    fn insert(&mut self, guid: &str) -> bool {
        self.guids.put(guid.to_string(), ()).is_none()
    }
}

type SeenBySource = Arc<Mutex<HashMap<Arc<str>, SeenGuids>>>;

/// Builds [`HttpSourceReader`]s that share one connection pool and one
/// per-source record of reported guids.
#[derive(Clone)]
pub struct HttpReaderFactory {
    client: reqwest::Client,
    settings: Arc<HttpSettings>,
    seen: SeenBySource,
}

impl HttpReaderFactory {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (e.g. TLS backend init).
    pub fn new(settings: HttpSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .redirect(redirect_policy(settings.url_policy))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(settings.fetch.timeout)
            .build()?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
            seen: SeenBySource::default(),
        })
    }
}

impl SourceReaderFactory for HttpReaderFactory {
    fn open(&self, feed: &Feed) -> Box<dyn SourceReader> {
        Box::new(HttpSourceReader {
            client: self.client.clone(),
            feed: feed.clone(),
            settings: Arc::clone(&self.settings),
            seen: Arc::clone(&self.seen),
        })
    }
}

/// Polls one RSS/Atom URL and reports entries it has not seen before.
///
/// Reported guids are kept in a bounded LRU per source URL, so an entry that
/// drops out of the document and comes back later is not reported again. On
/// the source's first successful poll, unless `deliver_backlog` is set,
/// everything already in the document is only recorded, not reported.
pub struct HttpSourceReader {
    client: reqwest::Client,
    feed: Feed,
    settings: Arc<HttpSettings>,
    seen: SeenBySource,
}

impl HttpSourceReader {
    fn record(&self, articles: Vec<ParsedArticle>) -> Vec<Message> {
        let consumers = self.feed.consumers();
        let total = articles.len();

        let mut sources = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = sources
            .entry(self.feed.url_arc())
            .or_insert_with(SeenGuids::new);
        seen.reserve(total);
        let report = seen.primed || self.settings.deliver_backlog;

        // Feeds list newest first; deliver oldest first.
        let mut fresh = Vec::new();
        for article in articles.into_iter().rev() {
            if seen.insert(&article.guid) && report {
                fresh.push(Message {
                    feed_url: self.feed.url_arc(),
                    consumers: consumers.clone(),
                    guid: article.guid,
                    title: article.title,
                    link: article.link,
                    published: article.published,
                    summary: article.summary,
                });
            }
        }

        if !seen.primed {
            tracing::debug!(
                feed = %self.feed,
                entries = total,
                backlog = fresh.len(),
                "Source primed"
            );
            seen.primed = true;
        }
        fresh
    }
}

#[async_trait]
impl SourceReader for HttpSourceReader {
    async fn poll(&mut self) -> Result<Vec<Message>, FetchError> {
        let url = self.settings.url_policy.validate(self.feed.url())?;
        let bytes = fetch_feed(&self.client, url.as_str(), &self.settings.fetch).await?;
        let parsed = parse_feed(&bytes).map_err(|e| FetchError::Parse(format!("{e:#}")))?;

        if parsed.dropped_links > 0 {
            tracing::debug!(
                feed = %self.feed,
                dropped = parsed.dropped_links,
                "Entries with unparseable links kept without link"
            );
        }

        Ok(self.record(parsed.articles))
    }

    async fn probe(&self) -> bool {
        match discover_feed(
            &self.client,
            self.feed.url(),
            self.settings.url_policy,
            &self.settings.fetch,
        )
        .await
        {
            Ok(found) => {
                tracing::debug!(
                    url = %self.feed,
                    feed_url = %found.feed_url,
                    title = %found.title,
                    "Probe found feed"
                );
                true
            }
            Err(e) => {
                tracing::debug!(url = %self.feed, error = %e, "Probe failed");
                false
            }
        }
    }
}
