//! Core data types shared by readers, workers, and the aggregator.
//!
//! A [`Feed`] is identified by its URL and carries a consumer set that can be
//! mutated from outside while a worker polls it. Workers only ever take
//! snapshots of that set; no lock is held across a poll cycle.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Identifier of a downstream consumer (a chat, a subscriber, ...).
pub type ConsumerId = i64;

/// A registered source: immutable URL plus a shared, mutable consumer set.
///
/// Cloning a `Feed` is cheap and the clones share the same consumer set, so
/// the handle given to the aggregator observes later subscribe/unsubscribe
/// calls made through any other clone.
#[derive(Clone)]
pub struct Feed {
    url: Arc<str>,
    consumers: Arc<RwLock<HashSet<ConsumerId>>>,
}

impl Feed {
    pub fn new(url: impl Into<Arc<str>>, consumers: impl IntoIterator<Item = ConsumerId>) -> Self {
        Self {
            url: url.into(),
            consumers: Arc::new(RwLock::new(consumers.into_iter().collect())),
        }
    }

    /// A feed nobody is interested in. Used for throwaway probes.
    pub fn unsubscribed(url: impl Into<Arc<str>>) -> Self {
        Self::new(url, [])
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn url_arc(&self) -> Arc<str> {
        Arc::clone(&self.url)
    }

    /// Adds a consumer. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, consumer: ConsumerId) -> bool {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer)
    }

    /// Removes a consumer. Returns `false` if it was not subscribed.
    ///
    /// Removing the last consumer makes the feed's worker stop on its next check.
    pub fn unsubscribe(&self, consumer: ConsumerId) -> bool {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&consumer)
    }

    pub fn has_consumers(&self) -> bool {
        !self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Sorted snapshot of the current consumers.
    pub fn consumers(&self) -> Vec<ConsumerId> {
        let mut ids: Vec<ConsumerId> = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("url", &self.url)
            .field("consumers", &self.consumers())
            .finish()
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// One newly discovered item, tagged with the consumers it should reach.
///
/// Immutable once produced by a [`SourceReader`](crate::reader::SourceReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// URL of the feed this item came from
    pub feed_url: Arc<str>,
    /// Consumers subscribed to the feed when the item was discovered
    pub consumers: Vec<ConsumerId>,
    /// Stable per-feed identifier of the item
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

impl Message {
    /// Creates a message for `feed` with the feed's current consumers.
    pub fn for_feed(feed: &Feed, guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            feed_url: feed.url_arc(),
            consumers: feed.consumers(),
            guid: guid.into(),
            title: title.into(),
            link: None,
            published: None,
            summary: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}
