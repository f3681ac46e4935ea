//! Database module for feedmail.
//!
//! This module provides storage connectivity, migration management and
//! session-scoped transactional access. The backend is chosen by the scheme
//! of the connection string; SQLite is the only one implemented.

mod schema;
mod session;

pub use schema::MIGRATIONS;
pub use session::Session;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, info};
use url::Url;

use crate::{FeedmailError, Result};

/// Connection pool type.
pub type DbPool = sqlx::SqlitePool;

/// Maximum pooled connections for file databases.
const MAX_CONNECTIONS: u32 = 5;

/// Busy timeout for contended writes.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Feed storage backed by a connection pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct Storage {
    pool: DbPool,
}

impl Storage {
    /// Connect using a connection string such as `sqlite:data/feedmail.db`,
    /// `sqlite:///var/lib/feedmail.db` or `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the string is empty, malformed or has no path
    /// - `Unimplemented` if the scheme names an unsupported backend
    pub async fn connect(dsn: &str) -> Result<Self> {
        if dsn.trim().is_empty() {
            return Err(FeedmailError::invalid_argument("missing dsn"));
        }
        let url = Url::parse(dsn)
            .map_err(|e| FeedmailError::invalid_argument_with(format!("invalid dsn: {dsn}"), e))?;

        match url.scheme() {
            "sqlite" | "sqlite3" => {
                let path = sqlite_path(&url)?;
                if path == ":memory:" {
                    Self::open_in_memory().await
                } else {
                    Self::open(path).await
                }
            }
            scheme => Err(FeedmailError::unimplemented(format!(
                "unsupported db: {scheme}"
            ))),
        }
    }

    /// Open a SQLite database file, creating it if needed.
    ///
    /// Migrations are automatically applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                FeedmailError::internal_with(format!("open sqlite db {} failed", path.display()), e)
            })?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// Open an in-memory database.
    ///
    /// The pool holds a single connection that is never recycled, so every
    /// session sees the same database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| FeedmailError::internal_with("open in-memory sqlite db failed", e))?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Session for transactional work; call [`Session::begin`] before writing.
    pub fn new_session(&self) -> Session {
        Session::new(self.pool.clone(), false)
    }

    /// Auto-commit session for single idempotent statements.
    pub fn new_auto_session(&self) -> Session {
        Session::new(self.pool.clone(), true)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;
        Ok(version)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;

        if current_version as usize >= MIGRATIONS.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            MIGRATIONS.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    FeedmailError::internal_with(format!("migration v{version} failed"), e)
                })?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!("Migration v{} applied successfully", version);
        }

        info!(
            "Database migration complete (now at version {})",
            MIGRATIONS.len()
        );
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish()
    }
}

/// Database path from a `sqlite:` URL.
fn sqlite_path(url: &Url) -> Result<String> {
    if url.host_str().is_some_and(|host| !host.is_empty()) {
        return Err(FeedmailError::invalid_argument(format!(
            "invalid dsn: {url}: use sqlite:relative/path or sqlite:///absolute/path"
        )));
    }
    let path = url.path();
    if path.is_empty() {
        return Err(FeedmailError::invalid_argument(format!(
            "invalid dsn: {url}: missing database path"
        )));
    }
    Ok(path.to_string())
}
