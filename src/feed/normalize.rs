//! Normalization of structurally inconsistent feed fields.
//!
//! Every polymorphic field is described by an untagged enum whose variants are
//! listed in priority order; deserializing a raw value tries each variant in
//! turn and the first structural match wins. A value no variant accepts fails
//! the whole feed, as does a missing required field.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::document::{parse_document, RawFeed, RawItem};

/// Errors produced while turning a raw document into a [`ParsedFeed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML body is malformed
    #[error("Malformed XML: {0}")]
    Xml(String),
    /// The JSON body is malformed
    #[error("Malformed JSON: {0}")]
    Json(String),
    /// The document parsed but is not RSS, Atom or JSON Feed
    #[error("Unrecognized feed format: {0}")]
    UnrecognizedFormat(String),
    /// A required field is absent
    #[error("Missing required field: {0}")]
    MissingField(String),
    /// A field matched none of its recognized shapes
    #[error("Unrecognized shape for {field}: {value}")]
    Shape { field: String, value: String },
}

// ============================================================================
// Canonical Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub link: String,
    pub published: Option<String>,
    pub icon: String,
    pub generator: String,
    pub language: String,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedEntry {
    /// Upstream guid/id. Informational only; deduplication uses the title.
    pub id: Option<String>,
    pub title: String,
    pub link: String,
    pub published: Option<String>,
    pub description: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub thumbnail: Option<ParsedThumbnail>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedThumbnail {
    pub url: String,
    pub text: Option<String>,
}

// ============================================================================
// Field Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

/// Recognized author shapes, in priority order
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthorShape {
    /// `"Name (detail)"` or a plain string
    Text(String),
    Number(serde_json::Number),
    Named(Named),
    Names(Vec<String>),
    NamedList(Vec<Named>),
}

impl AuthorShape {
    fn into_author(self) -> String {
        match self {
            AuthorShape::Text(text) => match parenthesized(&text) {
                Some(inner) => inner.trim().to_string(),
                None => text.trim().to_string(),
            },
            AuthorShape::Number(n) => n.to_string(),
            AuthorShape::Named(named) => named.name,
            AuthorShape::Names(names) => names.join(", "),
            AuthorShape::NamedList(list) => list
                .into_iter()
                .map(|n| n.name)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Segment between the first `(` and the `)` that follows it
fn parenthesized(text: &str) -> Option<&str> {
    let open = text.find('(')?;
    let close = text[open + 1..].find(')')? + open + 1;
    Some(&text[open + 1..close])
}

#[derive(Debug, Deserialize)]
struct WrappedText {
    #[serde(rename = "#text")]
    text: String,
}

/// Recognized content shapes, in priority order
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentShape {
    Text(String),
    Wrapped(WrappedText),
}

impl ContentShape {
    fn into_content(self) -> String {
        match self {
            ContentShape::Text(text) => text,
            ContentShape::Wrapped(wrapped) => wrapped.text.trim().to_string(),
        }
    }
}

/// `<media:text>` is either plain or carries a `type` attribute
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MediaText {
    Text(String),
    Wrapped(WrappedText),
}

impl MediaText {
    fn into_text(self) -> String {
        match self {
            MediaText::Text(text) => text,
            MediaText::Wrapped(wrapped) => wrapped.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MediaUrl {
    #[serde(rename = "@_url")]
    url: String,
}

/// Recognized thumbnail shapes, in priority order
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThumbnailShape {
    Url(String),
    Object {
        url: String,
    },
    Media {
        #[serde(rename = "@_url")]
        url: String,
        #[serde(rename = "media:text")]
        text: Option<MediaText>,
    },
    Nested {
        #[serde(rename = "media:thumbnail")]
        thumbnail: MediaUrl,
    },
}

impl ThumbnailShape {
    fn into_thumbnail(self) -> ParsedThumbnail {
        match self {
            ThumbnailShape::Url(url) | ThumbnailShape::Object { url } => {
                ParsedThumbnail { url, text: None }
            }
            ThumbnailShape::Media { url, text } => ParsedThumbnail {
                url,
                text: text.map(MediaText::into_text),
            },
            ThumbnailShape::Nested { thumbnail } => ParsedThumbnail {
                url: thumbnail.url,
                text: None,
            },
        }
    }
}

/// Recognized icon shapes, in priority order
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IconShape {
    Url(String),
    Object { url: String },
}

impl IconShape {
    fn into_icon(self) -> String {
        match self {
            IconShape::Url(url) | IconShape::Object { url } => url,
        }
    }
}

/// Match `value` against the shapes of `T`, naming `field` on failure
fn match_shape<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> Result<T, ParseError> {
    let shown = value.to_string();
    serde_json::from_value(value).map_err(|_| ParseError::Shape {
        field: field.to_string(),
        value: truncate(shown, 120),
    })
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

// ============================================================================
// Rules
// ============================================================================

/// Feed-level `image`, else `icon`, else empty
fn normalize_icon(image: Option<Value>, icon: Option<Value>) -> Result<String, ParseError> {
    if let Some(image) = image {
        return match_shape::<IconShape>("image", image).map(IconShape::into_icon);
    }
    if let Some(icon) = icon {
        return match_shape::<IconShape>("icon", icon).map(IconShape::into_icon);
    }
    Ok(String::new())
}

/// Creator-specific field first, else the generic author field
fn normalize_author(
    path: &str,
    creator: Option<Value>,
    author: Option<Value>,
) -> Result<Option<String>, ParseError> {
    let Some(value) = creator.or(author) else {
        return Ok(None);
    };
    match_shape::<AuthorShape>(&format!("{path}.author"), value)
        .map(|shape| Some(shape.into_author()))
}

/// `content` first, else the encoded-content field
fn normalize_content(
    path: &str,
    content: Option<Value>,
    encoded: Option<Value>,
) -> Result<Option<String>, ParseError> {
    let Some(value) = content.or(encoded) else {
        return Ok(None);
    };
    match_shape::<ContentShape>(&format!("{path}.content"), value)
        .map(|shape| Some(shape.into_content()))
}

fn normalize_thumbnail(
    path: &str,
    media: Option<Value>,
) -> Result<Option<ParsedThumbnail>, ParseError> {
    let Some(value) = media else {
        return Ok(None);
    };
    match_shape::<ThumbnailShape>(&format!("{path}.thumbnail"), value)
        .map(|shape| Some(shape.into_thumbnail()))
}

fn required(path: String, value: Option<String>) -> Result<String, ParseError> {
    value.ok_or(ParseError::MissingField(path))
}

fn normalize_entry(index: usize, item: RawItem) -> Result<ParsedEntry, ParseError> {
    let path = format!("entries[{index}]");
    Ok(ParsedEntry {
        author: normalize_author(&path, item.creator, item.author)?,
        content: normalize_content(&path, item.content, item.encoded_content)?,
        thumbnail: normalize_thumbnail(&path, item.media)?,
        title: required(format!("{path}.title"), item.title)?,
        link: required(format!("{path}.link"), item.link)?,
        id: item.id,
        published: item.published,
        description: item.description.unwrap_or_default(),
    })
}

/// Reshape a raw document into the canonical schema.
///
/// The feed is validated whole: the first entry that fails aborts the feed.
///
/// # Errors
///
/// [`ParseError::MissingField`] when the feed title or an entry's title or
/// link is absent; [`ParseError::Shape`] when a polymorphic field matches no
/// recognized shape.
pub fn normalize(raw: RawFeed) -> Result<ParsedFeed, ParseError> {
    let icon = normalize_icon(raw.image, raw.icon)?;
    let title = required("title".to_string(), raw.title)?;

    let entries = raw
        .items
        .into_iter()
        .enumerate()
        .map(|(i, item)| normalize_entry(i, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedFeed {
        title,
        description: raw.description.unwrap_or_default(),
        link: raw.link.unwrap_or_default(),
        published: raw.published,
        icon,
        generator: raw.generator.unwrap_or_default(),
        language: raw.language.unwrap_or_default(),
        entries,
    })
}

/// Parse and normalize a raw feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let (format, raw) = parse_document(bytes)?;
    tracing::trace!(?format, items = raw.items.len(), "parsed feed document");
    normalize(raw)
}
