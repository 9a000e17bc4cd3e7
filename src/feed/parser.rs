use crate::util::{single_line, strip_control_chars};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

/// One entry of a parsed RSS/Atom document, with text fields cleaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Articles in document order plus the number of links dropped as unparseable.
#[derive(Debug)]
pub struct ParseResult {
    pub articles: Vec<ParsedArticle>,
    pub dropped_links: usize,
}

/// Parses RSS 0.9x/1.0/2.0, Atom or JSON Feed bytes.
///
/// Entries keep their document order. An entry whose link is not an absolute
/// URL keeps its place but loses the link (counted in `dropped_links`).
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes).context("not a valid RSS/Atom document")?;
    let mut dropped_links = 0;

    let articles = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().and_then(|l| {
                let href = l.href.trim();
                if Url::parse(href).is_ok() {
                    Some(href.to_string())
                } else {
                    dropped_links += 1;
                    None
                }
            });
            let published = entry.published.or(entry.updated);
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|s| strip_control_chars(s.trim()).into_owned())
                .filter(|s| !s.is_empty());
            let title = entry
                .title
                .map(|t| single_line(&t.content))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let guid = generate_guid(&entry.id, link.as_deref(), &title, published);

            ParsedArticle {
                guid,
                title,
                link,
                published,
                summary,
            }
        })
        .collect();

    Ok(ParseResult {
        articles,
        dropped_links,
    })
}

/// Uses the feed's own id when present, else a hash of link, title and date.
fn generate_guid(
    existing: &str,
    link: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title>
  <item>
    <guid>a-1</guid>
    <title>First
      post</title>
    <link>https://example.com/1</link>
    <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
    <description>Hello</description>
  </item>
  <item>
    <guid>a-2</guid>
    <title>Second</title>
    <link>https://example.com/2</link>
  </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_in_document_order() {
        let result = parse_feed(RSS.as_bytes()).unwrap();
        let guids: Vec<&str> = result.articles.iter().map(|a| a.guid.as_str()).collect();
        assert_eq!(guids, vec!["a-1", "a-2"]);

        let first = &result.articles[0];
        assert_eq!(first.title, "First post");
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.summary.as_deref(), Some("Hello"));
        assert!(first.published.is_some());
        assert_eq!(result.dropped_links, 0);
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <id>urn:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <id>urn:entry:1</id>
    <title>Atom entry</title>
    <updated>2024-01-01T00:00:00Z</updated>
    <link href="https://example.com/atom/1"/>
  </entry>
</feed>"#;
        let result = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(result.articles.len(), 1);
        assert_eq!(result.articles[0].guid, "urn:entry:1");
        assert_eq!(result.articles[0].title, "Atom entry");
    }

    #[test]
    fn test_missing_title_and_bad_link() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><guid>x</guid><link>not a url</link></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.articles[0].title, "Untitled");
        assert!(result.articles[0].link.is_none());
        assert_eq!(result.dropped_links, 1);
    }

    #[test]
    fn test_invalid_document_is_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }

    #[test]
    fn test_generated_guid_is_stable() {
        let a = generate_guid("", Some("https://example.com/1"), "T", None);
        let b = generate_guid("  ", Some("https://example.com/1"), "T", None);
        let c = generate_guid("", Some("https://example.com/2"), "T", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(generate_guid(" id-1 ", None, "T", None), "id-1");
    }
}
