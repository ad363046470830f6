//! Structural extraction for RSS 2.0, RSS 1.0 (RDF), Atom and JSON Feed.
//!
//! Each format's native names are mapped onto one raw layout. Plain text
//! fields are resolved here; fields whose upstream shape varies (author,
//! content, thumbnail, icon) are passed through untouched for the normalizer.

use serde_json::{Map, Value};

use super::normalize::ParseError;
use super::tree::parse_xml;

/// Feed formats the parser recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Rdf,
    Atom,
    JsonFeed,
}

/// Feed document with text fields resolved and polymorphic fields left raw
#[derive(Debug, Clone, Default)]
pub struct RawFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub image: Option<Value>,
    pub icon: Option<Value>,
    pub generator: Option<String>,
    pub language: Option<String>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub description: Option<String>,
    /// Creator-specific field (`dc:creator`)
    pub creator: Option<Value>,
    /// Generic author field (`author`, JSON Feed `authors`)
    pub author: Option<Value>,
    pub content: Option<Value>,
    /// `content:encoded`
    pub encoded_content: Option<Value>,
    pub media: Option<Value>,
}

/// Parse a raw feed document of any supported format.
///
/// # Errors
///
/// - [`ParseError::Json`] / [`ParseError::Xml`] for malformed documents
/// - [`ParseError::UnrecognizedFormat`] when the root is not a known feed type
pub fn parse_document(bytes: &[u8]) -> Result<(FeedFormat, RawFeed), ParseError> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace()).copied();
    // UTF-8 BOM ahead of a JSON body
    let looks_like_json = first == Some(b'{') || bytes.starts_with(&[0xEF, 0xBB, 0xBF, b'{']);

    if looks_like_json {
        let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ParseError::Json(e.to_string()))?;
        return json_feed(&value).map(|feed| (FeedFormat::JsonFeed, feed));
    }

    let tree = parse_xml(bytes)?;
    let Some((root_name, root)) = tree.as_object().and_then(|m| m.iter().next()) else {
        return Err(ParseError::UnrecognizedFormat("empty document".to_string()));
    };

    match root_name.as_str() {
        "rss" => {
            let channel = root
                .get("channel")
                .map(first_of)
                .ok_or_else(|| ParseError::MissingField("channel".to_string()))?;
            Ok((FeedFormat::Rss, rss_feed(channel, channel.get("item"))))
        }
        "rdf:RDF" | "RDF" => {
            let channel = root.get("channel").map(first_of).unwrap_or(&Value::Null);
            // RSS 1.0 items are siblings of the channel
            let items = root.get("item").or_else(|| channel.get("item"));
            Ok((FeedFormat::Rdf, rss_feed(channel, items)))
        }
        "feed" => Ok((FeedFormat::Atom, atom_feed(root))),
        other => Err(ParseError::UnrecognizedFormat(format!(
            "unknown root element <{other}>"
        ))),
    }
}

// ============================================================================
// Formats
// ============================================================================

fn rss_feed(channel: &Value, items: Option<&Value>) -> RawFeed {
    RawFeed {
        title: text_field(channel, &["title"]),
        description: text_field(channel, &["description"]),
        link: text_field(channel, &["link"]),
        published: text_field(channel, &["pubDate", "lastBuildDate", "dc:date"]),
        image: field(channel, &["image"]),
        icon: field(channel, &["icon"]),
        generator: text_field(channel, &["generator"]),
        language: text_field(channel, &["language", "dc:language"]),
        items: list(items).iter().map(rss_item).collect(),
    }
}

fn rss_item(item: &Value) -> RawItem {
    RawItem {
        id: text_field(item, &["guid"]),
        title: text_field(item, &["title"]),
        link: text_field(item, &["link"]),
        published: text_field(item, &["pubDate", "dc:date"]),
        description: text_field(item, &["description"]),
        creator: field(item, &["dc:creator"]),
        author: field(item, &["author"]),
        content: field(item, &["content"]),
        encoded_content: field(item, &["content:encoded"]),
        media: media_field(item),
    }
}

fn atom_feed(feed: &Value) -> RawFeed {
    RawFeed {
        title: text_field(feed, &["title"]),
        description: text_field(feed, &["subtitle"]),
        link: feed.get("link").and_then(atom_link),
        published: text_field(feed, &["updated", "published"]),
        image: field(feed, &["logo"]),
        icon: field(feed, &["icon"]),
        generator: text_field(feed, &["generator"]),
        language: feed
            .get("@_xml:lang")
            .and_then(text_of)
            .or_else(|| text_field(feed, &["language"])),
        items: list(feed.get("entry")).iter().map(atom_entry).collect(),
    }
}

fn atom_entry(entry: &Value) -> RawItem {
    RawItem {
        id: text_field(entry, &["id"]),
        title: text_field(entry, &["title"]),
        link: entry.get("link").and_then(atom_link),
        published: text_field(entry, &["published", "updated"]),
        description: text_field(entry, &["summary"]),
        creator: field(entry, &["dc:creator"]),
        author: field(entry, &["author"]),
        content: field(entry, &["content"]),
        encoded_content: None,
        media: media_field(entry),
    }
}

fn json_feed(doc: &Value) -> Result<RawFeed, ParseError> {
    if !doc.is_object() {
        return Err(ParseError::UnrecognizedFormat(
            "JSON document is not an object".to_string(),
        ));
    }
    let items = doc
        .get("items")
        .ok_or_else(|| ParseError::UnrecognizedFormat("JSON document has no items".to_string()))?;

    Ok(RawFeed {
        title: text_field(doc, &["title"]),
        description: text_field(doc, &["description"]),
        link: text_field(doc, &["home_page_url", "feed_url"]),
        published: None,
        image: None,
        icon: field(doc, &["icon", "favicon"]),
        generator: None,
        language: text_field(doc, &["language"]),
        items: list(Some(items)).iter().map(json_item).collect(),
    })
}

fn json_item(item: &Value) -> RawItem {
    RawItem {
        id: text_field(item, &["id"]),
        title: text_field(item, &["title"]),
        link: text_field(item, &["url", "external_url"]),
        published: text_field(item, &["date_published", "date_modified"]),
        description: text_field(item, &["summary", "content_text"]),
        creator: None,
        author: field(item, &["authors", "author"]),
        content: field(item, &["content_html", "content_text"]),
        encoded_content: None,
        media: field(item, &["image", "banner_image"]),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// First present, non-null value among `keys`
fn field(node: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|k| node.get(*k))
        .find(|v| !v.is_null())
        .cloned()
}

/// First of `keys` that resolves to text
fn text_field(node: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| node.get(*k)).find_map(text_of)
}

/// Text of a structural field: a string, a number, or a `{#text}` wrapper.
/// Arrays resolve to their first element.
pub(crate) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("#text").and_then(text_of),
        Value::Array(items) => items.first().and_then(text_of),
        _ => None,
    }
}

/// Thumbnail candidates in priority order; arrays resolve to their first element
fn media_field(item: &Value) -> Option<Value> {
    ["media:thumbnail", "media:content", "media:group"]
        .iter()
        .filter_map(|k| item.get(*k))
        .map(first_of)
        .find(|v| !v.is_null())
        .cloned()
}

fn first_of(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

fn list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// Atom `<link>`: the `rel="alternate"` (or rel-less) href, else the first href
fn atom_link(value: &Value) -> Option<String> {
    let links: Vec<&Map<String, Value>> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => vec![map],
        Value::String(s) if !s.is_empty() => return Some(s.clone()),
        _ => return None,
    };

    let href = |link: &Map<String, Value>| link.get("@_href").and_then(text_of);

    links
        .iter()
        .find(|link| {
            matches!(
                link.get("@_rel").and_then(Value::as_str),
                None | Some("alternate")
            )
        })
        .and_then(|link| href(*link))
        .or_else(|| links.iter().find_map(|link| href(*link)))
}
