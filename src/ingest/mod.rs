//! Refresh pipeline: deduplicate parsed entries, persist them, fan them out
//! to subscribers, and drive whole refresh runs.
//!
//! - [`dedup`] - title-based filtering against stored entries
//! - [`writer`] - entry persistence and chunked user state fan-out
//! - [`orchestrator`] - feed listing and bounded-concurrency runs

mod dedup;
mod orchestrator;
mod writer;

use thiserror::Error;

use crate::feed::{FetchError, ParseError};
use crate::storage::DatabaseError;

pub use dedup::{dedup_entries, filter_new};
pub use orchestrator::{
    FeedOutcome, FeedReport, RefreshOptions, RefreshRequest, Refresher, RunReport, Schedule,
};
pub use writer::{
    parse_timestamp, to_new_entry, write_entries, WriteError, WriteSummary,
    DEFAULT_FAN_OUT_CHUNK, MAX_FAN_OUT_CHUNK,
};

/// Why a single feed failed to ingest. Each variant fails only its own feed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Write failed: {0}")]
    Write(#[from] WriteError),
    #[error("Storage error: {0}")]
    Store(#[from] DatabaseError),
}
