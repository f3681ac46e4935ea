//! Storage sessions and the feed persistence operations.
//!
//! A session either auto-commits each statement or runs statements inside an
//! explicit transaction opened with [`Session::begin`]. Transactions do not
//! nest.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::debug;

use super::DbPool;
use crate::datetime::{from_storage_time, to_storage_time};
use crate::feed::{Email, Feed};
use crate::{FeedmailError, Result};

/// Rows per multi-row statement; 13 binds per row stays under SQLite's
/// historical 999 variable limit.
const INSERT_CHUNK: usize = 70;

/// Ids per `IN (...)` list.
const ACK_CHUNK: usize = 500;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Unit of work against storage.
pub struct Session {
    pool: DbPool,
    auto_commit: bool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl Session {
    pub(super) fn new(pool: DbPool, auto_commit: bool) -> Self {
        Self {
            pool,
            auto_commit,
            tx: None,
        }
    }

    /// Whether statements commit individually.
    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Open a transaction. No-op on auto-commit sessions.
    ///
    /// # Errors
    ///
    /// `Unimplemented` if a transaction is already open.
    pub async fn begin(&mut self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        if self.tx.is_some() {
            return Err(FeedmailError::unimplemented("unsupported nested transaction"));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| FeedmailError::internal_with("begin transaction failed", e))?;
        self.tx = Some(tx);
        Ok(())
    }

    /// Commit the open transaction. No-op on auto-commit sessions.
    pub async fn commit(&mut self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        match self.tx.take() {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| FeedmailError::internal_with("commit transaction failed", e)),
            None => Err(FeedmailError::internal("commit without transaction")),
        }
    }

    /// Roll back the open transaction, if any.
    pub async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| FeedmailError::internal_with("rollback transaction failed", e)),
            None => Ok(()),
        }
    }

    /// Insert collected feeds. Every feed is persisted unacknowledged.
    ///
    /// A duplicate id fails the whole call; inside a transaction the caller
    /// rolls back.
    pub async fn save_feeds(&mut self, feeds: &[Feed]) -> Result<()> {
        for chunk in feeds.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT INTO feed (id, email, site, site_name, title, description, content, \
                 link, updated_at, published_at, author, entry_at, fetch_at) ",
            );
            builder.push_values(chunk, |mut row, feed| {
                row.push_bind(feed.id.as_str())
                    .push_bind(feed.email.as_str())
                    .push_bind(feed.site_url.as_str())
                    .push_bind(feed.site_name.as_str())
                    .push_bind(feed.title.as_str())
                    .push_bind(feed.description.as_str())
                    .push_bind(feed.content.as_str())
                    .push_bind(feed.link.as_str())
                    .push_bind((!feed.updated_at.is_empty()).then_some(feed.updated_at.as_str()))
                    .push_bind(feed.published_at.as_str())
                    .push_bind(feed.author.as_str())
                    .push_bind(to_storage_time(&feed.entry_at))
                    .push_bind(to_storage_time(&feed.fetch_at));
            });
            self.execute(builder.build())
                .await
                .map_err(|e| FeedmailError::internal_with("save feeds failed", e))?;
        }
        debug!("Saved {} feeds", feeds.len());
        Ok(())
    }

    /// Mark feeds acknowledged at `ack_at`, by id.
    ///
    /// Unknown ids are ignored; acknowledging twice keeps the flag set.
    pub async fn ack_feeds(&mut self, ack_at: DateTime<Utc>, ids: &[&str]) -> Result<()> {
        let ack_at = to_storage_time(&ack_at);
        for chunk in ids.chunks(ACK_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("UPDATE feed SET ack = 1, ack_at = ");
            builder.push_bind(ack_at.as_str());
            builder.push(" WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            self.execute(builder.build())
                .await
                .map_err(|e| FeedmailError::internal_with("ack feeds failed", e))?;
        }
        debug!("Acknowledged {} feeds", ids.len());
        Ok(())
    }

    /// Latest entry time among acknowledged feeds for (email, site), or
    /// `None` if nothing was ever acknowledged.
    ///
    /// Unacknowledged rows never count, so an undelivered entry stays above
    /// the watermark and is collected again.
    pub async fn latest_watermark(
        &mut self,
        email: &Email,
        site_url: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let query = sqlx::query_scalar::<_, Option<String>>(
            "SELECT MAX(entry_at) FROM feed WHERE email = ? AND site = ? AND ack = 1",
        )
        .bind(email.as_str())
        .bind(site_url);

        let latest = match self.tx.as_mut() {
            Some(tx) => query.fetch_one(&mut **tx).await,
            None => query.fetch_one(&self.pool).await,
        }
        .map_err(|e| FeedmailError::internal_with("query latest watermark failed", e))?;

        latest.as_deref().map(from_storage_time).transpose()
    }

    async fn execute(&mut self, query: SqliteQuery<'_>) -> sqlx::Result<u64> {
        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }
}
