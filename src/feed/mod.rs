//! Feed collection for feedmail.
//!
//! This module fetches subscribed sites, filters out already-delivered items
//! and hands new items to the mailbox.

mod feeds;
pub mod parser;
pub mod pipeline;
pub mod source;
mod types;

pub use feeds::{Feeds, SiteKey};
pub use parser::{parse_feed, sort_entries};
pub use pipeline::{FeedJob, StorageAck};
pub use source::{validate_url, FeedSource, HttpFeedSource};
pub use types::{Email, Feed, FeedEntry, Site, Subscriber};
