use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Longest feed URL accepted for a subscription
pub const MAX_FEED_URL_LENGTH: usize = 2048;

/// Reasons a URL cannot be used as a feed link.
///
/// Besides malformed input, this rejects targets on the local machine or
/// private network, since the refresh job fetches them unattended.
#[derive(Error, Debug)]
pub enum FeedUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("URL is longer than {MAX_FEED_URL_LENGTH} characters")]
    TooLong,
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("URL must not embed credentials")]
    Credentials,
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validate and canonicalize a feed URL before it is stored.
///
/// The returned URL has its fragment removed, so `…/rss#top` and `…/rss`
/// subscribe to the same feed.
///
/// ```
/// use feedfan::util::validate_feed_url;
///
/// let url = validate_feed_url("https://Example.com/rss#latest").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/rss");
///
/// assert!(validate_feed_url("http://localhost/feed").is_err());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(raw: &str) -> Result<Url, FeedUrlError> {
    let raw = raw.trim();
    if raw.len() > MAX_FEED_URL_LENGTH {
        return Err(FeedUrlError::TooLong);
    }

    let mut url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(FeedUrlError::Credentials);
    }

    let host = url.host_str().ok_or(FeedUrlError::MissingHost)?;
    if host == "localhost" || host.ends_with(".localhost") {
        return Err(FeedUrlError::Localhost);
    }

    // IPv6 hosts come back bracketed
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(FeedUrlError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(FeedUrlError::PrivateIp(ip.to_string()));
        }
    }

    url.set_fragment(None);
    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_unspecified() {
                return true;
            }
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return mapped.is_loopback() || is_private_ip(&IpAddr::V4(mapped));
            }
            let segments = ipv6.segments();
            // fc00::/7
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // fe80::/10
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
