//! In-memory batch of feeds collected during one pipeline run.

use std::collections::HashMap;
use std::fmt;

use super::types::{Email, Feed};

/// Grouping key for a site within one subscriber's batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteKey {
    /// Site name.
    pub name: String,
    /// Primary site URL.
    pub url: String,
}

impl SiteKey {
    fn of(feed: &Feed) -> Self {
        Self {
            name: feed.site_name.clone(),
            url: feed.site_url.clone(),
        }
    }
}

/// Per-email index of feeds by site, in first-seen order.
#[derive(Debug, Clone, Default)]
struct SiteIndex {
    sites: Vec<SiteKey>,
    positions: HashMap<SiteKey, Vec<usize>>,
}

/// Batch of collected feeds, grouped by email and by (email, site).
///
/// Built only through [`Feeds::append`]; nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct Feeds {
    list: Vec<Feed>,
    emails: Vec<Email>,
    by_email: HashMap<Email, SiteIndex>,
}

impl Feeds {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append feeds, updating both indexes.
    pub fn append(&mut self, feeds: impl IntoIterator<Item = Feed>) {
        for feed in feeds {
            let position = self.list.len();
            if !self.by_email.contains_key(&feed.email) {
                self.emails.push(feed.email.clone());
            }
            let index = self.by_email.entry(feed.email.clone()).or_default();

            let key = SiteKey::of(&feed);
            if !index.positions.contains_key(&key) {
                index.sites.push(key.clone());
            }
            index.positions.entry(key).or_default().push(position);

            self.list.push(feed);
        }
    }

    /// All feeds in insertion order.
    pub fn list(&self) -> &[Feed] {
        &self.list
    }

    /// Number of feeds.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Emails in first-seen order.
    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    /// Sites that have feeds for `email`, in first-seen order.
    pub fn sites(&self, email: &Email) -> &[SiteKey] {
        self.by_email
            .get(email)
            .map(|index| index.sites.as_slice())
            .unwrap_or_default()
    }

    /// Feeds for one (email, site) pair, in insertion order.
    pub fn site_feeds(&self, email: &Email, site: &SiteKey) -> Vec<&Feed> {
        self.by_email
            .get(email)
            .and_then(|index| index.positions.get(site))
            .map(|positions| positions.iter().map(|&i| &self.list[i]).collect())
            .unwrap_or_default()
    }

    /// Feeds for one email, grouped by site.
    pub fn email_feeds(&self, email: &Email) -> Vec<&Feed> {
        self.sites(email)
            .iter()
            .flat_map(|site| self.site_feeds(email, site))
            .collect()
    }
}

impl fmt::Display for Feeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Feeds: {}", self.list.len())?;
        writeln!(f, "Id | Email | SiteURL | Title")?;
        writeln!(f, "{}", "-".repeat(60))?;
        for feed in &self.list {
            writeln!(
                f,
                "{} | {} | {} | {}",
                feed.id, feed.email, feed.site_url, feed.title
            )?;
        }
        Ok(())
    }
}
