//! Input validation shared by the CLI and library callers.

mod url_validator;

pub use url_validator::{validate_feed_url, FeedUrlError, MAX_FEED_URL_LENGTH};
