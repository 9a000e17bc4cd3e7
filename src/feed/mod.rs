//! Fetching, parsing and discovery of a single RSS/Atom source.
//!
//! - [`parser`] - feed-rs parsing into cleaned [`ParsedArticle`]s
//! - [`fetcher`] - HTTP retrieval with size limits and in-request retries
//! - [`discovery`] - probing a URL for a feed, directly or via HTML links
//!
//! These are the building blocks of [`HttpSourceReader`](crate::reader::HttpSourceReader);
//! nothing here knows about workers or the hand-off queue.

mod discovery;
mod fetcher;
mod parser;

pub use discovery::{discover_feed, DiscoveredFeed, DiscoveryError};
pub use fetcher::{fetch_feed, FetchError, FetchSettings, RedirectRefused};
pub(crate) use fetcher::redirect_policy;
#[cfg(test)]
pub(crate) use fetcher::tests::stalled_body_server;
pub use parser::{parse_feed, ParseResult, ParsedArticle};
