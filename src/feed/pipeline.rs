//! Per-subscriber feed pipeline: fetch, dedupe, persist, deliver, ack.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::feeds::Feeds;
use super::parser::parse_feed;
use super::source::{validate_url, FeedSource};
use super::types::{Email, Feed, Site, Subscriber};
use crate::datetime::truncate_to_seconds;
use crate::db::Storage;
use crate::mailbox::{Acknowledge, Mailbox};
use crate::scheduler::{Clock, Job, SystemClock};
use crate::{FeedmailError, Result};

/// The scheduled job for one subscriber.
pub struct FeedJob {
    subscriber: Subscriber,
    email: Email,
    storage: Storage,
    mailbox: Arc<dyn Mailbox>,
    source: Arc<dyn FeedSource>,
    clock: Arc<dyn Clock>,
}

impl FeedJob {
    /// Create the job for `subscriber`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name or email is empty, or any site URL
    /// (primary or alternate) is not an absolute http(s) URL.
    pub fn new(
        subscriber: Subscriber,
        storage: Storage,
        mailbox: Arc<dyn Mailbox>,
        source: Arc<dyn FeedSource>,
    ) -> Result<Self> {
        if subscriber.name.trim().is_empty() {
            return Err(FeedmailError::invalid_argument(
                "subscriber name is required",
            ));
        }
        if subscriber.email.trim().is_empty() {
            return Err(FeedmailError::invalid_argument(format!(
                "subscriber email is required for {}",
                subscriber.name
            )));
        }
        for site in &subscriber.sites {
            for url in site.candidate_urls() {
                validate_url(url).map_err(|e| {
                    FeedmailError::invalid_argument_with(
                        format!("found invalid site url in {}", subscriber.name),
                        e,
                    )
                })?;
            }
        }

        Ok(Self {
            email: Email::new(subscriber.email.trim()),
            subscriber,
            storage,
            mailbox,
            source,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for collection and acknowledgment times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The subscriber this job serves.
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Fetch every site and keep entries newer than their watermark.
    ///
    /// Fails on the first site whose every URL fails.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Feeds> {
        let mut feeds = Feeds::new();
        for site in &self.subscriber.sites {
            let collected = self.collect_site(site, cancel).await?;
            debug!(
                job = self.name(),
                site = %site.url,
                count = collected.len(),
                "Collected site"
            );
            feeds.append(collected);
        }
        Ok(feeds)
    }

    async fn collect_site(&self, site: &Site, cancel: &CancellationToken) -> Result<Vec<Feed>> {
        let body = self.fetch_site(site, cancel).await?;
        let entries = parse_feed(&body).map_err(|e| {
            FeedmailError::internal_with(format!("parse feeds at {} failed", site.url), e)
        })?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut ses = self.storage.new_auto_session();
        let watermark = ses.latest_watermark(&self.email, &site.url).await?;
        let fetch_at = truncate_to_seconds(self.clock.now());

        let mut feeds = Vec::new();
        for entry in entries {
            let Some(entry_at) = entry.effective_time() else {
                debug!(site = %site.url, title = %entry.title, "Skipping undated entry");
                continue;
            };
            let entry_at = truncate_to_seconds(entry_at);
            if watermark.is_some_and(|mark| entry_at <= mark) {
                continue;
            }

            feeds.push(Feed {
                id: Uuid::new_v4().to_string(),
                email: self.email.clone(),
                site_url: site.url.clone(),
                site_name: site.name.clone(),
                title: entry.title,
                description: entry.description,
                content: entry.content,
                link: entry.link,
                updated_at: entry.updated.map(|t| t.to_rfc3339()).unwrap_or_default(),
                published_at: entry.published.map(|t| t.to_rfc3339()).unwrap_or_default(),
                author: entry.authors.join(", "),
                entry_at,
                fetch_at,
            });
        }
        Ok(feeds)
    }

    /// Primary URL first, then the alternates; the first success wins.
    async fn fetch_site(&self, site: &Site, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut last_error = None;
        for url in site.candidate_urls() {
            match self.source.fetch(url, cancel).await {
                Ok(body) => return Ok(body),
                Err(FeedmailError::Canceled) => return Err(FeedmailError::Canceled),
                Err(e) => {
                    warn!(site = %site.name, url, "Fetch failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FeedmailError::internal(format!("no url to fetch for site {}", site.name))
        }))
    }

    async fn persist(&self, feeds: &Feeds) -> Result<()> {
        let mut ses = self.storage.new_session();
        ses.begin().await?;
        if let Err(e) = ses.save_feeds(feeds.list()).await {
            if let Err(rollback) = ses.rollback().await {
                warn!(job = self.name(), "Rollback failed: {}", rollback);
            }
            return Err(e);
        }
        ses.commit().await
    }
}

#[async_trait]
impl Job for FeedJob {
    fn name(&self) -> &str {
        &self.subscriber.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let feeds = self.collect(&cancel).await?;
        if feeds.is_empty() {
            info!(job = self.name(), "No new feeds");
            return Ok(());
        }
        debug!("{}", feeds);

        if cancel.is_cancelled() {
            return Err(FeedmailError::Canceled);
        }
        self.persist(&feeds).await?;
        info!(job = self.name(), count = feeds.len(), "Saved new feeds");

        let ack = StorageAck::new(self.storage.clone(), Arc::clone(&self.clock));
        self.mailbox.send_feeds(&feeds, &ack, &cancel).await
    }
}

/// Acknowledges delivered feeds in storage.
pub struct StorageAck {
    storage: Storage,
    clock: Arc<dyn Clock>,
}

impl StorageAck {
    /// Acknowledge into `storage`, stamping times from `clock`.
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

#[async_trait]
impl Acknowledge for StorageAck {
    async fn ack(&self, feeds: &[&Feed]) -> Result<()> {
        let ids: Vec<&str> = feeds.iter().map(|feed| feed.id.as_str()).collect();
        let mut ses = self.storage.new_session();
        ses.begin().await?;
        // An error here drops the open transaction, which rolls it back.
        ses.ack_feeds(self.clock.now(), &ids).await?;
        ses.commit().await
    }
}
