use futures::{future, stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

use super::dedup::dedup_entries;
use super::writer::{parse_timestamp, write_entries, DEFAULT_FAN_OUT_CHUNK};
use super::IngestError;
use crate::feed::{parse_feed, FeedSource, ParsedFeed};
use crate::storage::{Database, DatabaseError, Feed, FeedListing, FeedMetadata};

/// How concurrent feed tasks are scheduled within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// A new feed starts as soon as any in-flight feed finishes
    #[default]
    Pooled,
    /// Feeds run in fixed windows; the next window starts once the previous
    /// one has fully drained
    Windowed,
}

/// Tunables for a refresh run.
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Maximum feeds in flight at once
    pub concurrency: usize,
    pub schedule: Schedule,
    /// Page size when no explicit feed subset is requested
    pub feeds_per_run: usize,
    /// User entry states per fan-out INSERT
    pub fan_out_chunk_size: usize,
    /// Skip feeds fetched more recently than this (unless forced)
    pub min_refresh_interval: Option<Duration>,
    /// Skip feeds with this many consecutive failures (unless forced)
    pub failure_threshold: Option<u32>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            schedule: Schedule::Pooled,
            feeds_per_run: 50,
            fan_out_chunk_size: DEFAULT_FAN_OUT_CHUNK,
            min_refresh_interval: None,
            failure_threshold: Some(5),
        }
    }
}

/// Which feeds a run covers.
#[derive(Debug, Clone, Default)]
pub struct RefreshRequest {
    /// Explicit subset; `None` means the next page of stalest feeds
    pub feed_ids: Option<Vec<i64>>,
    /// Bypass the freshness window and the circuit breaker
    pub force: bool,
}

impl RefreshRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn feeds(ids: Vec<i64>) -> Self {
        Self {
            feed_ids: Some(ids),
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Terminal state of one feed within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Entries (possibly zero) were written and fanned out
    Ingested { entries: usize, states: u64 },
    /// Fetched and parsed, but nobody subscribes so nothing was written
    NoSubscribers,
    /// The feed failed at some stage; the message is the error chain
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FeedReport {
    pub feed_id: i64,
    pub link: String,
    pub outcome: FeedOutcome,
}

/// Summary of a refresh run. Per-feed reports are in completion order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub listed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_entries: usize,
    pub new_states: u64,
    pub feeds: Vec<FeedReport>,
}

impl RunReport {
    fn from_reports(listed: usize, feeds: Vec<FeedReport>) -> Self {
        let mut report = RunReport {
            listed,
            ..RunReport::default()
        };
        for feed in &feeds {
            match feed.outcome {
                FeedOutcome::Ingested { entries, states } => {
                    report.succeeded += 1;
                    report.new_entries += entries;
                    report.new_states += states;
                }
                FeedOutcome::NoSubscribers => report.succeeded += 1,
                FeedOutcome::Failed(_) => report.failed += 1,
            }
        }
        report.feeds = feeds;
        report
    }

    /// Every listed feed reached a terminal outcome
    pub fn is_complete(&self) -> bool {
        self.succeeded + self.failed == self.listed
    }
}

/// Drives refresh runs: list feeds, ingest each one with bounded concurrency,
/// and report.
pub struct Refresher<S> {
    db: Database,
    source: S,
    options: RefreshOptions,
}

impl<S: FeedSource> Refresher<S> {
    pub fn new(db: Database, source: S, options: RefreshOptions) -> Self {
        Self {
            db,
            source,
            options,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run one refresh cycle.
    ///
    /// Only a failure to list feeds aborts the run. Every per-feed failure is
    /// recorded on the feed, logged, and counted in the report.
    pub async fn run(&self, request: &RefreshRequest) -> Result<RunReport, DatabaseError> {
        let feeds = self.list(request).await?;
        let total = feeds.len();
        if total == 0 {
            tracing::info!("No feeds due for refresh");
            return Ok(RunReport::default());
        }

        let concurrency = self.options.concurrency.max(1);
        tracing::info!(
            feeds = total,
            concurrency,
            schedule = ?self.options.schedule,
            force = request.force,
            "Starting refresh run"
        );

        let reports = match self.options.schedule {
            Schedule::Pooled => {
                stream::iter(feeds.iter().enumerate())
                    .map(|(index, feed)| self.process(index, total, feed))
                    .buffer_unordered(concurrency)
                    .collect::<Vec<_>>()
                    .await
            }
            Schedule::Windowed => {
                let mut reports = Vec::with_capacity(total);
                for (window, chunk) in feeds.chunks(concurrency).enumerate() {
                    let offset = window * concurrency;
                    let done = future::join_all(
                        chunk
                            .iter()
                            .enumerate()
                            .map(|(i, feed)| self.process(offset + i, total, feed)),
                    )
                    .await;
                    reports.extend(done);
                }
                reports
            }
        };

        let report = RunReport::from_reports(total, reports);
        tracing::info!(
            listed = report.listed,
            succeeded = report.succeeded,
            failed = report.failed,
            new_entries = report.new_entries,
            new_states = report.new_states,
            "Refresh run complete"
        );
        Ok(report)
    }

    async fn list(&self, request: &RefreshRequest) -> Result<Vec<Feed>, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let fetched_before = match self.options.min_refresh_interval {
            Some(interval) if !request.force && !interval.is_zero() => {
                let secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
                Some(now.saturating_sub(secs))
            }
            _ => None,
        };
        let max_failures = match self.options.failure_threshold {
            Some(threshold) if !request.force && threshold > 0 => Some(i64::from(threshold)),
            _ => None,
        };

        let listing = FeedListing {
            feed_ids: request.feed_ids.as_deref(),
            limit: self.options.feeds_per_run.max(1) as i64,
            fetched_before,
            max_failures,
        };
        self.db.list_feeds_for_refresh(&listing).await
    }

    /// Ingest one feed and turn the result into a report, recording failures.
    async fn process(&self, index: usize, total: usize, feed: &Feed) -> FeedReport {
        let outcome = match self.ingest(feed).await {
            Ok(outcome) => {
                match &outcome {
                    FeedOutcome::Ingested { entries, states } => tracing::info!(
                        index = index + 1,
                        total,
                        feed_id = feed.id,
                        title = %feed.title,
                        link = %feed.link,
                        entries,
                        states,
                        "Feed refreshed"
                    ),
                    _ => tracing::info!(
                        index = index + 1,
                        total,
                        feed_id = feed.id,
                        title = %feed.title,
                        link = %feed.link,
                        "Feed has no subscribers, nothing written"
                    ),
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    index = index + 1,
                    total,
                    feed_id = feed.id,
                    link = %feed.link,
                    error = %e,
                    "Feed refresh failed"
                );
                self.record_failure(feed, &e).await;
                FeedOutcome::Failed(e.to_string())
            }
        };

        FeedReport {
            feed_id: feed.id,
            link: feed.link.clone(),
            outcome,
        }
    }

    /// Fetch, normalize, dedup, write, fan out. `last_fetched_at` advances only
    /// once everything downstream has succeeded.
    pub async fn ingest(&self, feed: &Feed) -> Result<FeedOutcome, IngestError> {
        let bytes = self.source.fetch(&feed.link).await?;
        let parsed = parse_feed(&bytes)?;
        let metadata = feed_metadata(&parsed);

        let subscribers = self.db.subscriber_ids(feed.id).await?;
        if subscribers.is_empty() {
            self.db.record_feed_fetched(feed.id, &metadata).await?;
            return Ok(FeedOutcome::NoSubscribers);
        }

        let fresh = dedup_entries(&self.db, feed.id, parsed.entries).await?;
        tracing::debug!(feed_id = feed.id, new = fresh.len(), "Deduplicated entries");

        let summary = write_entries(
            &self.db,
            feed.id,
            &fresh,
            &subscribers,
            self.options.fan_out_chunk_size,
        )
        .await?;

        self.db.record_feed_fetched(feed.id, &metadata).await?;
        Ok(FeedOutcome::Ingested {
            entries: summary.entries,
            states: summary.states,
        })
    }

    async fn record_failure(&self, feed: &Feed, error: &IngestError) {
        match self.db.record_feed_failure(feed.id, &error.to_string()).await {
            Ok(failures) => {
                if let Some(threshold) = self.options.failure_threshold {
                    if threshold > 0 && failures >= i64::from(threshold) {
                        tracing::info!(
                            feed_id = feed.id,
                            title = %feed.title,
                            failures,
                            "Feed circuit breaker tripped - skipped until a forced refresh"
                        );
                    }
                }
            }
            Err(db_err) => {
                tracing::warn!(
                    feed_id = feed.id,
                    error = %db_err,
                    "Failed to record feed failure"
                );
            }
        }
    }
}

fn feed_metadata(feed: &ParsedFeed) -> FeedMetadata {
    FeedMetadata {
        title: feed.title.clone(),
        site_url: feed.link.clone(),
        icon: feed.icon.clone(),
        description: feed.description.clone(),
        language: feed.language.clone(),
        generator: feed.generator.clone(),
        published_at: feed.published.as_deref().and_then(parse_timestamp),
    }
}
