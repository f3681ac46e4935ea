//! feedmail - Feed-to-mail notifier
//!
//! Polls syndication feeds on per-subscriber cron schedules, stores new
//! items, mails them to the subscriber and acknowledges what was delivered.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;
pub mod mailbox;
pub mod scheduler;

pub use config::Config;
pub use db::{Session, Storage};
pub use error::{code_of, ErrorCode, FeedmailError, Result};
pub use feed::{Email, Feed, FeedJob, Feeds, HttpFeedSource, Site, Subscriber};
pub use mailbox::{Acknowledge, Mailbox, SmtpMailbox};
pub use scheduler::{Job, Scheduler, SchedulerState};
