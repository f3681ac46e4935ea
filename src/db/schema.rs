//! Database schema and migrations for feedmail.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded. Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text in UTC.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: collected feed items
    r#"
CREATE TABLE feed (
    id           TEXT PRIMARY KEY NOT NULL,
    email        TEXT NOT NULL,
    site         TEXT NOT NULL,           -- primary site URL
    site_name    TEXT NOT NULL,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL,
    content      TEXT NOT NULL,
    link         TEXT NOT NULL,
    updated_at   TEXT,
    published_at TEXT NOT NULL,
    author       TEXT NOT NULL,
    entry_at     TEXT NOT NULL,           -- updated, else published
    fetch_at     TEXT NOT NULL,
    ack          INTEGER NOT NULL DEFAULT 0,
    ack_at       TEXT
);

CREATE INDEX idx_feed_email_site ON feed(email, site);
"#,
    // v2: watermark lookups only read acknowledged rows
    r#"
CREATE INDEX idx_feed_watermark ON feed(email, site, ack, entry_at);
"#,
];
