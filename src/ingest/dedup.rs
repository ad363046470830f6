use std::collections::HashSet;

use crate::feed::ParsedEntry;
use crate::storage::{Database, DatabaseError};

/// Drop entries whose title is already known for the feed.
///
/// Matching is exact: an upstream title edit yields a new entry, and two
/// upstream items sharing a title collapse into the first one.
pub fn filter_new(mut known: HashSet<String>, entries: Vec<ParsedEntry>) -> Vec<ParsedEntry> {
    entries
        .into_iter()
        .filter(|entry| known.insert(entry.title.clone()))
        .collect()
}

/// Load the feed's stored titles once and filter `entries` against them.
pub async fn dedup_entries(
    db: &Database,
    feed_id: i64,
    entries: Vec<ParsedEntry>,
) -> Result<Vec<ParsedEntry>, DatabaseError> {
    if entries.is_empty() {
        return Ok(entries);
    }
    let known = db.existing_titles(feed_id).await?;
    Ok(filter_new(known, entries))
}
