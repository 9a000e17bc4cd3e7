use super::fetcher::{read_limited_bytes, FetchError, FetchSettings};
use crate::util::{single_line, UrlPolicy};
use thiserror::Error;

/// A feed found at (or linked from) a probed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFeed {
    /// Feed title, "Untitled Feed" when the document has none
    pub title: String,
    /// URL of the RSS/Atom document itself
    pub feed_url: String,
    /// Number of entries currently in the document
    pub entries: usize,
}

/// Errors that can occur during feed discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The URL failed the URL policy (scheme, SSRF, unparseable)
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Neither the body nor any `<link rel="alternate">` is a feed
    #[error("not a feed: no RSS/Atom content found")]
    NotAFeed,
    /// The request itself failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Discovers an RSS/Atom feed from a URL.
///
/// Accepts either a direct feed URL or an HTML page URL. XML content types
/// are parsed as a feed, HTML is scanned for `<link rel="alternate">` feed
/// links, and anything ambiguous tries the feed parser first.
///
/// # Errors
///
/// Returns [`DiscoveryError`] on validation failure, fetch failure, or if no
/// feed could be found at the URL.
pub async fn discover_feed(
    client: &reqwest::Client,
    url: &str,
    policy: UrlPolicy,
    settings: &FetchSettings,
) -> Result<DiscoveredFeed, DiscoveryError> {
    let validated = policy
        .validate(url)
        .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
    let url_str = validated.as_str();

    let (content_type, bytes) = fetch_with_type(client, url_str, settings).await?;

    let is_xml = content_type.contains("application/rss+xml")
        || content_type.contains("application/atom+xml")
        || content_type.contains("application/xml")
        || content_type.contains("text/xml");
    let is_html = content_type.contains("text/html") || content_type.contains("application/xhtml");

    if is_xml {
        return parse_feed_bytes(&bytes, url_str);
    }
    if !is_html {
        if let Ok(feed) = parse_feed_bytes(&bytes, url_str) {
            return Ok(feed);
        }
    }

    let html = String::from_utf8_lossy(&bytes);
    let feed_href = find_feed_link_in_html(&html, &validated).ok_or(DiscoveryError::NotAFeed)?;
    policy
        .validate(&feed_href)
        .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;

    let (_, bytes) = fetch_with_type(client, &feed_href, settings).await?;
    parse_feed_bytes(&bytes, &feed_href)
}

async fn fetch_with_type(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<(String, Vec<u8>), FetchError> {
    tokio::time::timeout(settings.timeout, request_with_type(client, url, settings.max_bytes))
        .await
        .map_err(|_| FetchError::Timeout)?
}

async fn request_with_type(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<(String, Vec<u8>), FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(FetchError::from_request)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let bytes = read_limited_bytes(response, max_bytes).await?;
    Ok((content_type, bytes))
}

fn parse_feed_bytes(bytes: &[u8], feed_url: &str) -> Result<DiscoveredFeed, DiscoveryError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|_| DiscoveryError::NotAFeed)?;

    let title = feed
        .title
        .map(|t| single_line(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Feed".to_owned());

    Ok(DiscoveredFeed {
        title,
        feed_url: feed_url.to_owned(),
        entries: feed.entries.len(),
    })
}

/// Returns the first `<link rel="alternate">` with an RSS/Atom type, resolved
/// against `base`.
///
/// Plain string scanning; attribute order and quote style may vary.
fn find_feed_link_in_html(html: &str, base: &url::Url) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(offset) = lower[search_from..].find("<link") {
        let start = search_from + offset;
        let end = start + lower[start..].find('>')?;
        let tag = &lower[start..=end];

        if has_attr(tag, "rel", "alternate")
            && (tag.contains("application/rss+xml") || tag.contains("application/atom+xml"))
        {
            // ASCII lowercasing keeps byte offsets, so the original slice lines up
            if let Some(href) = attr_value(&html[start..=end], "href") {
                if let Ok(resolved) = base.join(href.trim()) {
                    return Some(resolved.to_string());
                }
            }
        }

        search_from = end + 1;
    }

    None
}

fn has_attr(tag: &str, name: &str, value: &str) -> bool {
    tag.contains(&format!("{name}=\"{value}\"")) || tag.contains(&format!("{name}='{value}'"))
}

fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}=");
    let value_start = tag.to_ascii_lowercase().find(&prefix)? + prefix.len();
    let rest = &tag[value_start..];
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    inner.find(quote).map(|end| &inner[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example News</title>
  <item><guid>1</guid><title>One</title></item>
  <item><guid>2</guid><title>Two</title></item>
</channel></rss>"#;

    fn base() -> url::Url {
        url::Url::parse("https://example.com/blog/").unwrap()
    }

    #[test]
    fn test_find_link_resolves_relative_href() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <LINK TYPE="application/rss+xml" REL="alternate" HREF="feed.xml">
        </head></html>"#;
        assert_eq!(
            find_feed_link_in_html(html, &base()).as_deref(),
            Some("https://example.com/blog/feed.xml")
        );
    }

    #[test]
    fn test_find_link_single_quotes_and_atom() {
        let html = "<link rel='alternate' type='application/atom+xml' href='https://cdn.example.com/Atom.xml'>";
        assert_eq!(
            find_feed_link_in_html(html, &base()).as_deref(),
            Some("https://cdn.example.com/Atom.xml")
        );
    }

    #[test]
    fn test_find_link_none() {
        let html = r#"<link rel="alternate" type="text/html" href="/other">"#;
        assert!(find_feed_link_in_html(html, &base()).is_none());
        assert!(find_feed_link_in_html("<link rel=\"alternate\"", &base()).is_none());
    }

    #[test]
    fn test_parse_feed_bytes_metadata() {
        let feed = parse_feed_bytes(RSS.as_bytes(), "https://example.com/rss").unwrap();
        assert_eq!(feed.title, "Example News");
        assert_eq!(feed.entries, 2);
        assert!(matches!(
            parse_feed_bytes(b"<html></html>", "https://example.com"),
            Err(DiscoveryError::NotAFeed)
        ));
    }

    #[tokio::test]
    async fn test_discover_direct_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/rss+xml")
                    .set_body_string(RSS),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = discover_feed(
            &client,
            &format!("{}/rss", server.uri()),
            UrlPolicy::AllowPrivate,
            &FetchSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(feed.title, "Example News");
    }

    #[tokio::test]
    async fn test_discover_via_html_page() {
        let server = MockServer::start().await;
        let html = r#"<html><head><link rel="alternate" type="application/rss+xml" href="/rss"></head></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_string(html),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = discover_feed(
            &client,
            &format!("{}/", server.uri()),
            UrlPolicy::AllowPrivate,
            &FetchSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(feed.feed_url, format!("{}/rss", server.uri()));
        assert_eq!(feed.entries, 2);
    }

    #[tokio::test]
    async fn test_discover_rejects_private_host_by_default() {
        let client = reqwest::Client::new();
        let result = discover_feed(
            &client,
            "http://127.0.0.1:9/feed",
            UrlPolicy::PublicOnly,
            &FetchSettings::default(),
        )
        .await;
        assert!(matches!(result, Err(DiscoveryError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_discover_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = discover_feed(
            &client,
            &format!("{}/missing", server.uri()),
            UrlPolicy::AllowPrivate,
            &FetchSettings::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Fetch(FetchError::HttpStatus(404)))
        ));
    }

    #[tokio::test]
    async fn test_discover_times_out_on_stalled_body() {
        let addr = crate::feed::fetcher::tests::stalled_body_server().await;
        let client = reqwest::Client::new();
        let settings = FetchSettings {
            timeout: Duration::from_millis(300),
            ..FetchSettings::default()
        };

        let result = discover_feed(
            &client,
            &format!("http://{addr}/feed"),
            UrlPolicy::AllowPrivate,
            &settings,
        )
        .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Fetch(FetchError::Timeout))
        ));
    }
}
