use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe a user to the feed at `link`, creating the feed on first
    /// subscription. Returns the feed id.
    ///
    /// Subscribing twice is a no-op. An explicit `title` replaces the stored
    /// title; otherwise the first refresh fills it in from upstream.
    pub async fn subscribe(
        &self,
        user_id: i64,
        link: &str,
        title: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let (feed_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (title, link, created_at, updated_at)
            VALUES (COALESCE(?, ''), ?, ?, ?)
            ON CONFLICT(link) DO UPDATE SET
                title = COALESCE(?, feeds.title),
                updated_at = feeds.updated_at
            RETURNING id
        "#,
        )
        .bind(title)
        .bind(link)
        .bind(now)
        .bind(now)
        .bind(title)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO subscriptions (user_id, feed_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id, feed_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(feed_id)
    }

    /// Remove a subscription. Existing per-user entry states are kept.
    ///
    /// Returns `true` if a subscription was removed.
    pub async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of every user currently subscribed to a feed
    pub async fn subscriber_ids(&self, feed_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM subscriptions WHERE feed_id = ? ORDER BY user_id",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_creates_feed_once() {
        let db = test_db().await;

        let a = db.subscribe(1, "https://example.com/rss", None).await.unwrap();
        let b = db.subscribe(2, "https://example.com/rss", None).await.unwrap();
        assert_eq!(a, b, "second subscriber reuses the shared feed");

        assert_eq!(db.subscriber_ids(a).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_idempotent() {
        let db = test_db().await;

        let a = db.subscribe(1, "https://example.com/rss", None).await.unwrap();
        let b = db.subscribe(1, "https://example.com/rss", None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(db.subscriber_ids(a).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_subscribe_with_title() {
        let db = test_db().await;

        let id = db
            .subscribe(1, "https://example.com/rss", Some("My Feed"))
            .await
            .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "My Feed");
        assert_eq!(feed.link, "https://example.com/rss");
        assert!(feed.last_fetched_at.is_none());

        // A later subscriber without a title does not clear it
        db.subscribe(2, "https://example.com/rss", None).await.unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "My Feed");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let db = test_db().await;
        let id = db.subscribe(1, "https://example.com/rss", None).await.unwrap();

        assert!(db.unsubscribe(1, id).await.unwrap());
        assert!(!db.unsubscribe(1, id).await.unwrap());
        assert!(db.subscriber_ids(id).await.unwrap().is_empty());

        // The shared feed survives without subscribers
        assert!(db.get_feed(id).await.unwrap().is_some());
    }
}
