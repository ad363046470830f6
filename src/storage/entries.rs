use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{DatabaseError, Entry, EntryStatus, NewEntry, UserEntry, UserEntryRow};

/// Entries per INSERT statement. 11 bound columns keeps each statement well
/// under SQLite's host parameter limit.
const ENTRY_BATCH_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Titles of every stored entry of a feed
    pub async fn existing_titles(&self, feed_id: i64) -> Result<HashSet<String>, DatabaseError> {
        let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(titles.into_iter().collect())
    }

    /// Bulk-insert entries for a feed and return the ids assigned to them.
    ///
    /// All chunks run in one transaction. A row whose `(feed_id, title)` already
    /// exists is skipped and gets no id, so the result can be shorter than the
    /// input when a concurrent writer got there first.
    pub async fn insert_entries(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<Vec<i64>, DatabaseError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(entries.len());
        let mut tx = self.pool.begin().await?;

        for chunk in entries.chunks(ENTRY_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO entries (feed_id, guid, title, link, description, author, content, \
                 published_at, thumbnail_url, thumbnail_caption, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(feed_id)
                    .push_bind(&entry.guid)
                    .push_bind(&entry.title)
                    .push_bind(&entry.link)
                    .push_bind(&entry.description)
                    .push_bind(&entry.author)
                    .push_bind(&entry.content)
                    .push_bind(entry.published_at)
                    .push_bind(&entry.thumbnail_url)
                    .push_bind(&entry.thumbnail_caption)
                    .push_bind(now)
                    .push_bind(now);
            });

            builder.push(" ON CONFLICT(feed_id, title) DO NOTHING RETURNING id");

            let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&mut *tx).await?;
            ids.extend(rows.into_iter().map(|(id,)| id));
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// All entries of a feed, newest first
    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, feed_id, guid, title, link, description, author, content,
                   published_at, thumbnail_url, thumbnail_caption, created_at, updated_at
            FROM entries
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // ========================================================================
    // User Entry State Operations
    // ========================================================================

    /// Insert one `unread`, unstarred state per (user, entry) pair in a single
    /// statement. Callers bound the pair count; see the batch writer.
    ///
    /// Returns the number of rows inserted. Pairs that already exist are left alone.
    pub async fn insert_user_entry_states(
        &self,
        pairs: &[(i64, i64)],
    ) -> Result<u64, DatabaseError> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO user_entry_states (user_id, entry_id, status, starred, created_at, updated_at) ",
        );
        builder.push_values(pairs, |mut b, (user_id, entry_id)| {
            b.push_bind(*user_id)
                .push_bind(*entry_id)
                .push_bind(EntryStatus::Unread.as_str())
                .push_bind(false)
                .push_bind(now)
                .push_bind(now);
        });
        builder.push(" ON CONFLICT(user_id, entry_id) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// A user's entries across every feed, newest first
    pub async fn user_entries(&self, user_id: i64) -> Result<Vec<UserEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserEntryRow>(
            r#"
            SELECT s.entry_id, e.feed_id, e.title, e.link, e.published_at, s.status, s.starred
            FROM user_entry_states s
            JOIN entries e ON e.id = s.entry_id
            WHERE s.user_id = ?
            ORDER BY e.published_at DESC, e.id DESC
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserEntryRow::into_user_entry).collect())
    }

    /// Number of user entry states attached to a feed's entries
    pub async fn count_states_for_feed(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_entry_states s JOIN entries e ON e.id = s.entry_id
             WHERE e.feed_id = ?",
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Mark an entry read or unread for one user. Returns `false` if the user has no state for it.
    pub async fn set_entry_status(
        &self,
        user_id: i64,
        entry_id: i64,
        status: EntryStatus,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE user_entry_states SET status = ?, updated_at = ? WHERE user_id = ? AND entry_id = ?",
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Star or unstar an entry for one user. Returns `false` if the user has no state for it.
    pub async fn set_entry_starred(
        &self,
        user_id: i64,
        entry_id: i64,
        starred: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE user_entry_states SET starred = ?, updated_at = ? WHERE user_id = ? AND entry_id = ?",
        )
        .bind(starred)
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
