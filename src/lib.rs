//! Concurrent feed-polling aggregator.
//!
//! Register any number of [`Feed`]s with a [`MultiFeedReader`]; each one gets
//! its own polling task, and everything they discover lands in a single
//! queue the caller drains whenever it likes.
//!
//! ```no_run
//! use multifeed::{Feed, HttpReaderFactory, HttpSettings, MessageQueue, MultiFeedReader, Timings};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), multifeed::feed::FetchError> {
//! let factory = HttpReaderFactory::new(HttpSettings::default())?;
//! let reader = MultiFeedReader::new(
//!     Timings::default(),
//!     Arc::new(factory),
//!     Arc::new(MessageQueue::unbounded()),
//! );
//! reader.register(Feed::new("https://blog.rust-lang.org/feed.xml", [42]));
//!
//! for message in reader.drain() {
//!     println!("{:?} {}", message.consumers, message.title);
//! }
//! reader.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod model;
pub mod queue;
pub mod reader;
pub mod util;
pub mod worker;

pub use aggregator::{MultiFeedReader, ShutdownReport, Timings};
pub use config::{Config, ConfigError, FeedConfig};
pub use model::{ConsumerId, Feed, Message};
pub use queue::{HandOffQueue, MessageQueue};
pub use reader::{HttpReaderFactory, HttpSettings, SourceReader, SourceReaderFactory};
pub use worker::WorkerExit;
