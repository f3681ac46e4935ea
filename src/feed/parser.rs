//! Feed document parsing.
//!
//! RSS, Atom and JSON Feed documents are parsed with `feed-rs`; entries come
//! back in canonical order (oldest first, undated entries first).

use feed_rs::parser;

use super::types::FeedEntry;
use crate::{FeedmailError, Result};

/// Parse feed bytes into entries sorted in canonical order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedmailError::internal_with("failed to parse feed", e))?;

    let mut entries: Vec<FeedEntry> = feed
        .entries
        .into_iter()
        .map(|entry| FeedEntry {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            description: entry.summary.map(|t| t.content).unwrap_or_default(),
            content: entry.content.and_then(|c| c.body).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            published: entry.published,
            updated: entry.updated,
            authors: entry.authors.into_iter().map(|a| a.name).collect(),
        })
        .collect();

    sort_entries(&mut entries);
    Ok(entries)
}

/// Sort entries ascending by effective time; undated entries first.
///
/// The sort is stable, so entries with equal times keep document order.
pub fn sort_entries(entries: &mut [FeedEntry]) {
    entries.sort_by_key(FeedEntry::effective_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_rss_sorted_oldest_first() {
        let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com</link>
    <description>A test feed</description>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <guid>guid-2</guid>
      <pubDate>Sat, 22 Jul 2023 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <guid>guid-1</guid>
      <description>first description</description>
      <author>foo@example.com (Foo)</author>
      <pubDate>Sat, 22 Jul 2023 07:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

        let entries = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "First");
        assert_eq!(entries[0].link, "https://example.com/1");
        assert_eq!(entries[0].description, "first description");
        assert_eq!(
            entries[0].published,
            Some(Utc.with_ymd_and_hms(2023, 7, 22, 7, 0, 0).unwrap())
        );
        assert_eq!(entries[1].title, "Second");
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link href="https://example.com"/>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link href="https://example.com/entry"/>
    <summary>Entry summary</summary>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
    <author><name>Author One</name></author>
    <author><name>Author Two</name></author>
    <published>2024-12-31T00:00:00Z</published>
    <updated>2025-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;

        let entries = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.title, "Atom Entry");
        assert_eq!(entry.description, "Entry summary");
        assert!(entry.content.contains("Body"));
        assert_eq!(entry.authors, vec!["Author One", "Author Two"]);
        assert_eq!(
            entry.effective_time(),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_minimal_item() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <item>
      <guid>1</guid>
    </item>
  </channel>
</rss>"#;

        let entries = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "");
        assert_eq!(entries[0].effective_time(), None);
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse_feed(b"This is not XML").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_sort_entries_undated_first_and_stable() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let entry = |title: &str, published| FeedEntry {
            title: title.to_string(),
            published,
            ..Default::default()
        };

        let mut entries = vec![
            entry("late", Some(t2)),
            entry("early-a", Some(t1)),
            entry("undated", None),
            entry("early-b", Some(t1)),
        ];
        sort_entries(&mut entries);

        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["undated", "early-a", "early-b", "late"]);
    }
}
