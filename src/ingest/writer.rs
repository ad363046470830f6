use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::feed::ParsedEntry;
use crate::storage::{Database, DatabaseError, NewEntry};

/// Default number of user entry states per INSERT
pub const DEFAULT_FAN_OUT_CHUNK: usize = 1000;

/// Upper bound on the fan-out chunk: 6 bound columns per row must stay under
/// SQLite's 32766 host parameter limit.
pub const MAX_FAN_OUT_CHUNK: usize = 5000;

/// Errors raised while persisting entries or fanning them out.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The entry insert failed; nothing was written for this feed
    #[error("Entry insert failed: {0}")]
    EntryInsert(#[source] DatabaseError),

    /// A fan-out chunk failed. Entries and earlier chunks stay written.
    #[error("Fan-out chunk {chunk} failed after {written} states were written: {source}")]
    FanOut {
        chunk: usize,
        written: u64,
        #[source]
        source: DatabaseError,
    },
}

/// Rows written for one feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub entries: usize,
    pub states: u64,
}

/// Parse an upstream date in any of the formats feeds commonly use.
///
/// RFC 2822 (RSS), RFC 3339 (Atom, JSON Feed), and bare `YYYY-MM-DD[ HH:MM:SS]`
/// taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Map a normalized entry onto a storage row.
///
/// Missing or unparseable `published` becomes `now`; a missing author
/// becomes the empty string; the thumbnail caption falls back to the title.
pub fn to_new_entry(entry: &ParsedEntry, now: i64) -> NewEntry {
    let published_at = entry
        .published
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let (thumbnail_url, thumbnail_caption) = match &entry.thumbnail {
        Some(thumb) => (
            Some(thumb.url.clone()),
            Some(thumb.text.clone().unwrap_or_else(|| entry.title.clone())),
        ),
        None => (None, None),
    };

    NewEntry {
        guid: entry.id.clone(),
        title: entry.title.clone(),
        link: entry.link.clone(),
        description: entry.description.clone(),
        author: entry.author.clone().unwrap_or_default(),
        content: entry.content.clone(),
        published_at,
        thumbnail_url,
        thumbnail_caption,
    }
}

/// Persist new entries for a feed and create one unread state per
/// (subscriber, inserted entry).
///
/// With no subscribers nothing is written. States are submitted in sequential
/// chunks of `chunk_size` rows; a failing chunk stops the remaining ones.
pub async fn write_entries(
    db: &Database,
    feed_id: i64,
    entries: &[ParsedEntry],
    subscribers: &[i64],
    chunk_size: usize,
) -> Result<WriteSummary, WriteError> {
    if subscribers.is_empty() || entries.is_empty() {
        return Ok(WriteSummary::default());
    }

    let now = chrono::Utc::now().timestamp();
    let rows: Vec<NewEntry> = entries.iter().map(|e| to_new_entry(e, now)).collect();
    let entry_ids = db
        .insert_entries(feed_id, &rows)
        .await
        .map_err(WriteError::EntryInsert)?;

    let states = fan_out(db, &entry_ids, subscribers, chunk_size).await?;

    Ok(WriteSummary {
        entries: entry_ids.len(),
        states,
    })
}

async fn fan_out(
    db: &Database,
    entry_ids: &[i64],
    subscribers: &[i64],
    chunk_size: usize,
) -> Result<u64, WriteError> {
    let chunk_size = chunk_size.clamp(1, MAX_FAN_OUT_CHUNK);
    let mut pairs: Vec<(i64, i64)> = Vec::with_capacity(chunk_size);
    let mut written: u64 = 0;
    let mut chunk = 0;

    for &entry_id in entry_ids {
        for &user_id in subscribers {
            pairs.push((user_id, entry_id));
            if pairs.len() == chunk_size {
                written += flush(db, &pairs, chunk, written).await?;
                pairs.clear();
                chunk += 1;
            }
        }
    }
    if !pairs.is_empty() {
        written += flush(db, &pairs, chunk, written).await?;
    }

    Ok(written)
}

async fn flush(
    db: &Database,
    pairs: &[(i64, i64)],
    chunk: usize,
    written: u64,
) -> Result<u64, WriteError> {
    db.insert_user_entry_states(pairs)
        .await
        .map_err(|source| WriteError::FanOut {
            chunk,
            written,
            source,
        })
}
