//! SMTP mailbox built on lettre's async transport.

use async_trait::async_trait;
use chrono_tz::Tz;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::render::{render_digest, DIGEST_SUBJECT};
use super::{Acknowledge, Mailbox};
use crate::config::MailSenderConfig;
use crate::feed::{Email, Feeds};
use crate::{FeedmailError, Result};

/// Port on which the server expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Mailbox delivering HTML digests over SMTP.
pub struct SmtpMailbox {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: lettre::message::Mailbox,
    timezone: Tz,
}

impl SmtpMailbox {
    /// Create a mailbox from the sender configuration.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the server is not `host:port`, or the sender
    /// address or password is empty or malformed.
    pub fn new(config: &MailSenderConfig, timezone: Tz) -> Result<Self> {
        let (host, port) = config.host_port()?;
        if config.sender_addr.is_empty() || config.password.is_empty() {
            return Err(FeedmailError::invalid_argument(
                "invalid sender mail config",
            ));
        }
        let sender = config.sender_addr.parse().map_err(|e| {
            FeedmailError::invalid_argument_with(
                format!("invalid sender address {:?}", config.sender_addr),
                e,
            )
        })?;

        let builder = if port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .map_err(|e| FeedmailError::invalid_argument_with(format!("invalid smtp host {host:?}"), e))?;

        let transport = builder
            .port(port)
            .credentials(Credentials::new(
                config.sender_addr.clone(),
                config.password.clone(),
            ))
            .build();

        debug!("SMTP mailbox configured for {}:{}", host, port);
        Ok(Self {
            transport,
            sender,
            timezone,
        })
    }

    #[cfg(test)]
    fn with_transport(
        transport: AsyncSmtpTransport<Tokio1Executor>,
        sender: lettre::message::Mailbox,
        timezone: Tz,
    ) -> Self {
        Self {
            transport,
            sender,
            timezone,
        }
    }

    fn build_message(&self, feeds: &Feeds, email: &Email) -> Result<Message> {
        let to = email.as_str().parse().map_err(|e| {
            FeedmailError::invalid_argument_with(format!("invalid recipient address {email}"), e)
        })?;
        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(DIGEST_SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(render_digest(feeds, email, self.timezone))
            .map_err(|e| FeedmailError::internal_with("build mail message failed", e))
    }

    async fn deliver(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FeedmailError::Canceled),
            sent = self.transport.send(message) => sent,
        };
        // Errors from the QUIT after an accepted DATA never reach us: the
        // transport drops them. Anything returned here means no delivery.
        sent.map(|_| ())
            .map_err(|e| FeedmailError::internal_with("send feeds failed", e))
    }
}

#[async_trait]
impl Mailbox for SmtpMailbox {
    async fn send_feeds(
        &self,
        feeds: &Feeds,
        ack: &dyn Acknowledge,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for email in feeds.emails() {
            let delivered = feeds.email_feeds(email);
            let message = self.build_message(feeds, email)?;

            info!(email = %email, count = delivered.len(), "Send RSS feeds notification");
            self.deliver(message, cancel).await?;

            if let Err(e) = ack.ack(&delivered).await {
                warn!(email = %email, "Failed to acknowledge delivered feeds: {}", e);
            }
        }
        Ok(())
    }
}
