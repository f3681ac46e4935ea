//! Feed source: downloads feed documents.
//!
//! The pipeline only sees the [`FeedSource`] trait; [`HttpFeedSource`] is the
//! production implementation with timeouts, a redirect limit and a size cap.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FetchConfig;
use crate::{FeedmailError, Result};

/// Something that can fetch a feed document by URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the raw document at `url`.
    ///
    /// Must return [`FeedmailError::Canceled`] promptly once `cancel` fires.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

/// Validate that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| FeedmailError::invalid_argument_with(format!("invalid URL {url:?}"), e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedmailError::invalid_argument(format!(
                "unsupported URL scheme {scheme:?} in {url:?}"
            )));
        }
    }

    if parsed.host().is_none() {
        return Err(FeedmailError::invalid_argument(format!(
            "URL {url:?} has no host"
        )));
    }

    Ok(parsed)
}

/// HTTP feed source built on `reqwest`.
pub struct HttpFeedSource {
    client: Client,
    max_feed_size: u64,
}

impl HttpFeedSource {
    /// Create a source from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedmailError::internal_with("failed to create HTTP client", e))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedmailError::internal(format!(
                "invalid feed response from {url}: {status}"
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(self.too_large(url, content_length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_feed_size {
                return Err(self.too_large(url, body.len() as u64));
            }
        }

        Ok(body)
    }

    fn too_large(&self, url: &str, size: u64) -> FeedmailError {
        FeedmailError::internal(format!(
            "feed at {url} too large: {size} bytes (max {} bytes)",
            self.max_feed_size
        ))
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FeedmailError::Canceled),
            result = self.download(url) => result,
        }
    }
}

fn request_error(url: &str, e: reqwest::Error) -> FeedmailError {
    if e.is_timeout() {
        FeedmailError::DeadlineExceeded(format!("request feeds to {url} timed out"))
    } else {
        FeedmailError::internal_with(format!("request feeds to {url} failed"), e)
    }
}
