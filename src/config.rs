//! Configuration file parser for the `multifeed` binary.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted by serde but logged as a
//! warning, since they are usually typos.
use crate::aggregator::Timings;
use crate::feed::FetchSettings;
use crate::model::{ConsumerId, Feed};
use crate::queue::MessageQueue;
use crate::reader::HttpSettings;
use crate::util::UrlPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between two polls of the same feed.
    pub poll_interval_secs: u64,

    /// Milliseconds a worker waits on one publish attempt.
    pub offer_interval_ms: u64,

    /// Seconds shutdown waits for workers before giving up on them.
    pub shutdown_grace_secs: u64,

    /// Maximum queued messages; absent means unbounded.
    pub queue_capacity: Option<usize>,

    pub request_timeout_secs: u64,
    pub max_feed_bytes: usize,
    pub user_agent: String,

    /// Report entries already present when a feed is first read.
    pub deliver_backlog: bool,

    /// Allow localhost and private-network feed hosts.
    pub allow_private_hosts: bool,

    pub feeds: Vec<FeedConfig>,
}

/// One `[[feeds]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default)]
    pub consumers: Vec<ConsumerId>,
}

impl Default for Config {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            poll_interval_secs: 300,
            offer_interval_ms: 100,
            shutdown_grace_secs: 10,
            queue_capacity: None,
            request_timeout_secs: http.fetch.timeout.as_secs(),
            max_feed_bytes: http.fetch.max_bytes,
            user_agent: http.user_agent,
            deliver_backlog: false,
            allow_private_hosts: false,
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "poll_interval_secs",
        "offer_interval_ms",
        "shutdown_grace_secs",
        "queue_capacity",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "deliver_backlog",
        "allow_private_hosts",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            poll_interval_secs = config.poll_interval_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be greater than 0"));
        }
        if self.offer_interval_ms == 0 {
            return Err(invalid("offer_interval_ms", "must be greater than 0"));
        }
        if self.queue_capacity == Some(0) {
            return Err(invalid("queue_capacity", "must be greater than 0 when set"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than 0"));
        }
        if let Some(feed) = self.feeds.iter().find(|f| f.url.trim().is_empty()) {
            return Err(invalid(
                "feeds",
                format!("empty url (consumers {:?})", feed.consumers),
            ));
        }
        Ok(())
    }

    pub fn timings(&self) -> Timings {
        Timings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            offer_interval: Duration::from_millis(self.offer_interval_ms),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn http(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent.clone(),
            fetch: FetchSettings {
                timeout: Duration::from_secs(self.request_timeout_secs),
                max_bytes: self.max_feed_bytes,
                ..FetchSettings::default()
            },
            url_policy: UrlPolicy::from_allow_private(self.allow_private_hosts),
            deliver_backlog: self.deliver_backlog,
        }
    }

    /// The hand-off queue described by `queue_capacity`.
    pub fn queue(&self) -> MessageQueue {
        self.queue_capacity
            .map_or_else(MessageQueue::unbounded, MessageQueue::bounded)
    }

    /// Configured sources as fresh [`Feed`]s.
    pub fn feeds(&self) -> Vec<Feed> {
        self.feeds
            .iter()
            .map(|f| Feed::new(f.url.trim(), f.consumers.iter().copied()))
            .collect()
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.offer_interval_ms, 100);
        assert_eq!(config.shutdown_grace_secs, 10);
        assert!(config.queue_capacity.is_none());
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert!(config.user_agent.starts_with("multifeed/"));
        assert!(!config.deliver_backlog);
        assert!(config.feeds.is_empty());
        assert_eq!(config.timings(), Timings::default());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/multifeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.poll_interval_secs, 300);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = std::env::temp_dir().join("multifeed_config_test_whitespace");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.feeds.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("multifeed_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
poll_interval_secs = 60
offer_interval_ms = 250
shutdown_grace_secs = 3
queue_capacity = 500
request_timeout_secs = 5
max_feed_bytes = 1024
user_agent = "test-agent"
deliver_backlog = true
allow_private_hosts = true

[[feeds]]
url = " https://example.com/rss "
consumers = [1, 2]

[[feeds]]
url = "https://example.org/atom.xml"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.timings(),
            Timings {
                poll_interval: Duration::from_secs(60),
                offer_interval: Duration::from_millis(250),
                shutdown_grace: Duration::from_secs(3),
            }
        );

        let http = config.http();
        assert_eq!(http.user_agent, "test-agent");
        assert_eq!(http.fetch.timeout, Duration::from_secs(5));
        assert_eq!(http.fetch.max_bytes, 1024);
        assert_eq!(http.url_policy, UrlPolicy::AllowPrivate);
        assert!(http.deliver_backlog);

        let feeds = config.feeds();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].url(), "https://example.com/rss");
        assert_eq!(feeds[0].consumers(), vec![1, 2]);
        assert!(!feeds[1].has_consumers());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(matches!(
            Config::parse("poll_interval_secs = \"soon\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        for (content, key) in [
            ("poll_interval_secs = 0", "poll_interval_secs"),
            ("offer_interval_ms = 0", "offer_interval_ms"),
            ("queue_capacity = 0", "queue_capacity"),
            ("request_timeout_secs = 0", "request_timeout_secs"),
        ] {
            match Config::parse(content) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("expected invalid {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_zero_grace_allowed() {
        let config = Config::parse("shutdown_grace_secs = 0").unwrap();
        assert_eq!(config.timings().shutdown_grace, Duration::ZERO);
    }

    #[test]
    fn test_empty_feed_url_rejected() {
        let err = Config::parse("[[feeds]]\nurl = \"  \"\nconsumers = [1]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "feeds", .. }));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("poll_interval_secs = 5\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_queue_follows_capacity() {
        let mut config = Config::default();
        assert_eq!(config.queue().capacity(), None);

        config.queue_capacity = Some(3);
        assert_eq!(config.queue().capacity(), Some(3));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("multifeed_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
