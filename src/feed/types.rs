//! Feed types for feedmail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A subscriber: who gets mailed, which sites are watched, and how often.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscriber {
    /// Display name, also used as the job name.
    pub name: String,
    /// Delivery address.
    pub email: String,
    /// Cron expression for the collection schedule.
    pub schedule: String,
    /// Watched sites, in collection order.
    #[serde(default)]
    pub sites: Vec<Site>,
}

/// A feed source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Site {
    /// Display name.
    pub name: String,
    /// Primary feed URL. Watermarks are keyed on this URL.
    pub url: String,
    /// Alternate URLs tried in order when the primary fetch fails.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Site {
    /// Create a site without alternate URLs.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            urls: Vec::new(),
        }
    }

    /// Add an alternate URL.
    pub fn with_alternate(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Primary URL followed by the alternates.
    pub fn candidate_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.urls.iter().map(String::as_str))
    }
}

/// Subscriber email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Email(String);

impl Email {
    /// Wrap an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Email {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A collected feed item, as persisted and delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Unique identifier, generated at collection time.
    pub id: String,
    /// Owning subscriber.
    pub email: Email,
    /// Primary URL of the source site.
    pub site_url: String,
    /// Name of the source site.
    pub site_name: String,
    /// Item title.
    pub title: String,
    /// Item summary.
    pub description: String,
    /// Item body.
    pub content: String,
    /// Item link.
    pub link: String,
    /// Feed-supplied update time, empty if absent.
    pub updated_at: String,
    /// Feed-supplied publish time, empty if absent.
    pub published_at: String,
    /// Comma-joined author names.
    pub author: String,
    /// Effective entry time (updated, else published); the watermark is
    /// built from this.
    pub entry_at: DateTime<Utc>,
    /// Collection time.
    pub fetch_at: DateTime<Utc>,
}

/// An entry parsed out of a feed document.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    /// Entry title.
    pub title: String,
    /// Entry summary.
    pub description: String,
    /// Entry body.
    pub content: String,
    /// First link of the entry.
    pub link: String,
    /// Publish time.
    pub published: Option<DateTime<Utc>>,
    /// Update time.
    pub updated: Option<DateTime<Utc>>,
    /// Author names.
    pub authors: Vec<String>,
}

impl FeedEntry {
    /// Update time if present, else publish time.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_candidate_urls_order() {
        let site = Site::new("foo", "https://foo.com/rss")
            .with_alternate("https://a.foo.com/rss")
            .with_alternate("https://b.foo.com/rss");
        let urls: Vec<&str> = site.candidate_urls().collect();
        assert_eq!(
            urls,
            vec![
                "https://foo.com/rss",
                "https://a.foo.com/rss",
                "https://b.foo.com/rss"
            ]
        );
    }

    #[test]
    fn test_site_as_map_key() {
        let mut map = std::collections::HashMap::new();
        map.insert(Site::new("foo", "https://foo.com/rss"), 1);
        assert_eq!(map.get(&Site::new("foo", "https://foo.com/rss")), Some(&1));
        assert_eq!(map.get(&Site::new("foo", "https://bar.com/rss")), None);
    }

    #[test]
    fn test_effective_time_prefers_updated() {
        let published = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let mut entry = FeedEntry {
            published: Some(published),
            ..Default::default()
        };
        assert_eq!(entry.effective_time(), Some(published));

        entry.updated = Some(updated);
        assert_eq!(entry.effective_time(), Some(updated));

        assert_eq!(FeedEntry::default().effective_time(), None);
    }

    #[test]
    fn test_email_display() {
        let email = Email::from("a@example.com");
        assert_eq!(email.to_string(), "a@example.com");
        assert_eq!(email.as_str(), "a@example.com");
    }
}
