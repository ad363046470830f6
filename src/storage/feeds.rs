use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedListing, FeedMetadata};

const FEED_COLUMNS: &str = "id, title, link, site_url, icon, description, language, generator, \
     published_at, last_fetched_at, last_attempted_at, last_error, consecutive_failures, \
     created_at, updated_at";

/// Next attempt mark: the current time in milliseconds, bumped past the latest
/// mark so feeds attempted within the same millisecond still rotate.
const NEXT_ATTEMPT: &str =
    "MAX(?, COALESCE((SELECT MAX(last_attempted_at) FROM feeds), 0) + 1)";

/// Empty upstream strings are stored as NULL
fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Get a single feed by id
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// List feeds for a refresh run.
    ///
    /// With an explicit id subset every matching feed is returned. Otherwise the
    /// listing is paged by `limit`, least recently attempted first (never-attempted
    /// feeds lead), so feeds beyond the page are picked up by the next run and a
    /// feed that keeps failing moves to the back like any other.
    pub async fn list_feeds_for_refresh(
        &self,
        listing: &FeedListing<'_>,
    ) -> Result<Vec<Feed>, DatabaseError> {
        if matches!(listing.feed_ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {FEED_COLUMNS} FROM feeds WHERE 1 = 1"));

        if let Some(ids) = listing.feed_ids {
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }

        if let Some(before) = listing.fetched_before {
            builder.push(" AND (last_fetched_at IS NULL OR last_fetched_at <= ");
            builder.push_bind(before);
            builder.push(")");
        }

        if let Some(max_failures) = listing.max_failures {
            builder.push(" AND consecutive_failures < ");
            builder.push_bind(max_failures);
        }

        builder.push(" ORDER BY last_attempted_at IS NOT NULL, last_attempted_at ASC, id ASC");

        if listing.feed_ids.is_none() {
            builder.push(" LIMIT ");
            builder.push_bind(listing.limit);
        }

        let feeds = builder
            .build_query_as::<Feed>()
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Record a successful ingestion: refresh metadata, advance `last_fetched_at`,
    /// clear the error and reset the circuit breaker.
    ///
    /// An empty upstream title keeps the stored title.
    pub async fn record_feed_fetched(
        &self,
        feed_id: i64,
        meta: &FeedMetadata,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now();
        sqlx::query(&format!(
            r#"
            UPDATE feeds SET
                title = CASE WHEN ? = '' THEN title ELSE ? END,
                site_url = ?,
                icon = ?,
                description = ?,
                language = ?,
                generator = ?,
                published_at = ?,
                last_fetched_at = ?,
                last_attempted_at = {NEXT_ATTEMPT},
                last_error = NULL,
                consecutive_failures = 0,
                updated_at = ?
            WHERE id = ?
        "#
        ))
        .bind(&meta.title)
        .bind(&meta.title)
        .bind(non_empty(&meta.site_url))
        .bind(non_empty(&meta.icon))
        .bind(non_empty(&meta.description))
        .bind(non_empty(&meta.language))
        .bind(non_empty(&meta.generator))
        .bind(meta.published_at)
        .bind(now.timestamp())
        .bind(now.timestamp_millis())
        .bind(now.timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store the failure message and increment the consecutive failure count.
    ///
    /// Returns the new failure count. The attempt mark advances, but
    /// `last_fetched_at` is left untouched so a failed feed keeps showing its
    /// last successful refresh.
    pub async fn record_feed_failure(
        &self,
        feed_id: i64,
        error: &str,
    ) -> Result<i64, DatabaseError> {
        let result: (i64,) = sqlx::query_as(&format!(
            "UPDATE feeds SET last_error = ?, consecutive_failures = consecutive_failures + 1,
                 last_attempted_at = {NEXT_ATTEMPT}
             WHERE id = ? RETURNING consecutive_failures"
        ))
        .bind(error)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }
}
