use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with operator-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock past the busy timeout
    #[error("Database is locked by another process. Is another refresh running?")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, folding SQLite lock errors into [`DatabaseError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::Locked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6)
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A feed row. Shared across every subscriber.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    /// Canonical source link (the URL that gets fetched)
    pub link: String,
    pub site_url: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub generator: Option<String>,
    pub published_at: Option<i64>,
    /// Only ever written by the refresh pipeline
    pub last_fetched_at: Option<i64>,
    /// Unix milliseconds of the latest refresh attempt, successful or not.
    /// Strictly increasing across feeds, so it doubles as the rotation order.
    pub last_attempted_at: Option<i64>,
    pub last_error: Option<String>,
    /// Number of consecutive refresh failures (circuit breaker)
    pub consecutive_failures: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Feed-level metadata captured from a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FeedMetadata {
    pub title: String,
    pub site_url: String,
    pub icon: String,
    pub description: String,
    pub language: String,
    pub generator: String,
    pub published_at: Option<i64>,
}

/// An entry ready for insertion, after the writer has resolved timestamps,
/// author and thumbnail caption.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub guid: Option<String>,
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub content: Option<String>,
    pub published_at: i64,
    pub thumbnail_url: Option<String>,
    pub thumbnail_caption: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub content: Option<String>,
    pub published_at: i64,
    pub thumbnail_url: Option<String>,
    pub thumbnail_caption: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Read status of an entry for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Unread,
    Read,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Unread => "unread",
            EntryStatus::Read => "read",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(EntryStatus::Unread),
            "read" => Ok(EntryStatus::Read),
            other => Err(format!("unknown entry status: {other}")),
        }
    }
}

/// One row of the per-user projection, joined with its shared entry.
#[derive(Debug, Clone)]
pub struct UserEntry {
    pub entry_id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: i64,
    pub status: EntryStatus,
    pub starred: bool,
}

/// Internal row type for [`UserEntry`] queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserEntryRow {
    pub entry_id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: i64,
    pub status: String,
    pub starred: bool,
}

impl UserEntryRow {
    pub(crate) fn into_user_entry(self) -> UserEntry {
        UserEntry {
            entry_id: self.entry_id,
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            published_at: self.published_at,
            // CHECK constraint on the column keeps this total
            status: self.status.parse().unwrap_or(EntryStatus::Unread),
            starred: self.starred,
        }
    }
}

/// Filters applied when listing feeds for a scheduled refresh.
#[derive(Debug, Clone)]
pub struct FeedListing<'a> {
    /// Explicit subset. When set, paging is not applied.
    pub feed_ids: Option<&'a [i64]>,
    /// Page size for the default listing
    pub limit: i64,
    /// Exclude feeds fetched after this unix timestamp
    pub fetched_before: Option<i64>,
    /// Exclude feeds with at least this many consecutive failures
    pub max_failures: Option<i64>,
}
