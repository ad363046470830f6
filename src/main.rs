use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use feedfan::config::Config;
use feedfan::feed::HttpFetcher;
use feedfan::ingest::{RefreshRequest, Refresher, RunReport};
use feedfan::storage::Database;
use feedfan::util::validate_feed_url;

/// Get the config directory path (~/.config/feedfan/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedfan"))
}

/// Create the config directory if needed, user-only on Unix
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedfan", version, about = "Feed ingestion with per-user fan-out")]
struct Args {
    /// Config file (default: ~/.config/feedfan/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config file
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one refresh cycle
    Refresh {
        /// Refresh only these feeds (repeatable)
        #[arg(long = "feed", value_name = "ID")]
        feeds: Vec<i64>,

        /// Ignore the freshness window and the failure circuit breaker
        #[arg(long)]
        force: bool,
    },
    /// Subscribe a user to a feed URL, creating the feed if needed
    Subscribe {
        #[arg(long, value_name = "ID")]
        user: i64,

        url: String,

        /// Initial title, replaced by the feed's own title on first refresh
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove a user's subscription
    Unsubscribe {
        #[arg(long, value_name = "ID")]
        user: i64,

        #[arg(long, value_name = "ID")]
        feed: i64,
    },
    /// Refresh on a fixed interval until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feedfan.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let db = Database::open(db_path_str)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    match args.command {
        Command::Refresh { feeds, force } => {
            let mut request = if feeds.is_empty() {
                RefreshRequest::all()
            } else {
                RefreshRequest::feeds(feeds)
            };
            request.force = force;

            let refresher = build_refresher(db, &config)?;
            let report = refresher.run(&request).await.context("Refresh run failed")?;
            print_report(&report);
        }
        Command::Subscribe { user, url, title } => {
            let url = validate_feed_url(&url).context("Invalid feed URL")?;
            let feed_id = db
                .subscribe(user, url.as_str(), title.as_deref())
                .await
                .context("Failed to subscribe")?;
            println!("User {user} subscribed to feed {feed_id} ({url})");
        }
        Command::Unsubscribe { user, feed } => {
            if db
                .unsubscribe(user, feed)
                .await
                .context("Failed to unsubscribe")?
            {
                println!("User {user} unsubscribed from feed {feed}");
            } else {
                println!("User {user} was not subscribed to feed {feed}");
            }
        }
        Command::Daemon => {
            let period = config
                .refresh_interval()
                .context("refresh_interval_minutes must be greater than 0 for daemon mode")?;
            let refresher = build_refresher(db, &config)?;
            run_daemon(&refresher, period).await;
        }
    }

    Ok(())
}

fn build_refresher(db: Database, config: &Config) -> Result<Refresher<HttpFetcher>> {
    let fetcher = HttpFetcher::new(config.fetch_timeout(), config.max_feed_bytes)
        .context("Failed to build HTTP client")?;
    Ok(Refresher::new(db, fetcher, config.refresh_options()))
}

/// Runs are strictly sequential: the next tick is awaited only after the
/// current run has returned.
async fn run_daemon(refresher: &Refresher<HttpFetcher>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    tracing::info!(period_secs = period.as_secs(), "Daemon started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = refresher.run(&RefreshRequest::all()).await {
                    tracing::warn!(error = %e, "Refresh run failed, retrying next tick");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }
        }
    }
}

fn print_report(report: &RunReport) {
    println!(
        "Refreshed {} feeds: {} succeeded, {} failed, {} new entries, {} user states",
        report.listed, report.succeeded, report.failed, report.new_entries, report.new_states
    );
    for feed in &report.feeds {
        if let feedfan::ingest::FeedOutcome::Failed(error) = &feed.outcome {
            println!("  feed {} ({}): {}", feed.feed_id, feed.link, error);
        }
    }
}
