//! Mail delivery for feedmail.
//!
//! A [`Mailbox`] delivers one digest per subscriber email and reports each
//! successful delivery through [`Acknowledge`].

mod render;
mod smtp;

pub use render::{render_digest, DIGEST_SUBJECT};
pub use smtp::SmtpMailbox;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::feed::{Feed, Feeds};
use crate::Result;

/// Receives the items of each successfully delivered digest.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Mark `feeds` as delivered.
    async fn ack(&self, feeds: &[&Feed]) -> Result<()>;
}

/// Delivers collected feeds.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Send one digest per email in `feeds`, calling `ack` after each
    /// successful send with exactly the items of that digest.
    ///
    /// A failed acknowledgment is logged and does not fail the call.
    async fn send_feeds(
        &self,
        feeds: &Feeds,
        ack: &dyn Acknowledge,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
