//! Feed retrieval and normalization.
//!
//! - [`fetcher`] - HTTP retrieval with a per-fetch timeout and size cap
//! - [`tree`] - generic XML to value-tree conversion
//! - [`document`] - RSS / RDF / Atom / JSON Feed structural extraction
//! - [`normalize`] - polymorphic field rules and whole-feed validation
//!
//! # Example
//!
//! ```ignore
//! use feedfan::feed::{parse_feed, FeedSource, HttpFetcher};
//!
//! let fetcher = HttpFetcher::new(Duration::from_secs(30), MAX_FEED_SIZE)?;
//! let bytes = fetcher.fetch("https://example.com/feed.xml").await?;
//! let feed = parse_feed(&bytes)?;
//! ```

mod document;
mod fetcher;
mod normalize;
mod tree;

pub use document::{parse_document, FeedFormat, RawFeed, RawItem};
pub use fetcher::{FeedSource, FetchError, HttpFetcher, MAX_FEED_SIZE};
pub use normalize::{normalize, parse_feed, ParseError, ParsedEntry, ParsedFeed, ParsedThumbnail};
