use crate::types::{ParsedEntry, ParsedFeed, PipelineError, Result};
use chrono::Utc;
use feed_rs::parser;
use std::collections::HashSet;
use tracing::debug;

pub struct FeedParser;

impl FeedParser {
    /// Parse an RSS or Atom document. Entries without a link are skipped and
    /// repeated links are kept once.
    pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let mut seen_urls = HashSet::new();
        let mut entries = Vec::new();

        for entry in feed.entries {
            let Some(url) = entry.links.first().map(|link| link.href.clone()) else {
                debug!("Skipping feed entry {} without a link", entry.id);
                continue;
            };
            if !seen_urls.insert(url.clone()) {
                debug!("Skipping duplicate entry with URL: {}", url);
                continue;
            }

            entries.push(ParsedEntry {
                url,
                title: entry.title.map(|t| t.content.trim().to_string()).filter(|t| !t.is_empty()),
                description: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                published_at: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc)),
            });
        }

        debug!("Parsed feed with {} entries", entries.len());
        Ok(ParsedFeed { title, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Tech</title>
    <link>https://example.com/</link>
    <description>Example feed</description>
    <item>
      <title>Chips get faster</title>
      <link>https://example.com/2024/chips</link>
      <description>Short teaser</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Chips get faster</title>
      <link>https://example.com/2024/chips</link>
    </item>
    <item>
      <title>No link here</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_and_drops_duplicates() -> Result<()> {
        let feed = FeedParser::parse_feed(RSS)?;
        assert_eq!(feed.title.as_deref(), Some("Example Tech"));
        assert_eq!(feed.entries.len(), 1);

        let entry = &feed.entries[0];
        assert_eq!(entry.url, "https://example.com/2024/chips");
        assert_eq!(entry.title.as_deref(), Some("Chips get faster"));
        assert!(entry.published_at.is_some());
        Ok(())
    }

    #[test]
    fn rejects_non_feed_content() {
        assert!(FeedParser::parse_feed("<html><body>nope</body></html>").is_err());
    }
}
