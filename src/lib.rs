//! Feed ingestion and per-user fan-out.
//!
//! A refresh run lists subscribed feeds, fetches and normalizes each document,
//! keeps entries whose titles are new, and creates one unread state per
//! subscriber for every stored entry.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
