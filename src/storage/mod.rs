//! SQLite store shared by every subscriber.
//!
//! Feeds and entries are owned by the refresh pipeline; `user_entry_states`
//! is the only per-user projection.

mod entries;
mod feeds;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Entry, EntryStatus, Feed, FeedListing, FeedMetadata, NewEntry, UserEntry,
};
