//! Generic XML → value tree conversion.
//!
//! Produces the loosely typed shape the normalizer matches against:
//!
//! - attributes become `@_name` keys
//! - text next to attributes or child elements becomes `#text`
//! - repeated child elements collapse into an array
//! - an element with only text (or nothing) becomes a plain string
//!
//! Names keep their namespace prefix (`media:thumbnail`, `dc:creator`).
//! Text is trimmed. DTD entity declarations are never expanded; unknown
//! entity references are kept verbatim.
//!
//! Input bytes are transcoded to UTF-8 first: a byte order mark wins, then
//! the `encoding` of the XML declaration, then UTF-8.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use super::normalize::ParseError;

/// An element being assembled while its children are read
struct Frame {
    name: String,
    attrs: Vec<(String, String)>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::Xml(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn push_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    fn add_child(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.children.insert(name, value);
            }
        }
    }

    fn close(self) -> (String, Value) {
        if self.attrs.is_empty() && self.children.is_empty() {
            return (self.name, Value::String(self.text));
        }

        let mut map = self.children;
        for (key, value) in self.attrs {
            map.insert(format!("@_{key}"), Value::String(value));
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text));
        }
        (self.name, Value::Object(map))
    }
}

/// Parse an XML document into `{ root_name: tree }`.
///
/// # Errors
///
/// Returns [`ParseError::Xml`] for malformed XML, including unclosed elements
/// and documents without a root element.
pub fn parse_xml(bytes: &[u8]) -> Result<Value, ParseError> {
    let text = decode_document(bytes);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Xml(format!("at byte {}: {e}", reader.buffer_position())))?;

        match event {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                attach(&mut stack, &mut root, name, value);
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unexpected closing tag".to_string()))?;
                let (name, value) = frame.close();
                attach(&mut stack, &mut root, name, value);
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    match text.unescape() {
                        Ok(t) => frame.push_text(&t),
                        Err(_) => frame.push_text(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.push_text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and DOCTYPE carry no feed data
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Xml("unexpected end of document".to_string()));
    }

    let (name, value) = root.ok_or_else(|| ParseError::Xml("no root element".to_string()))?;
    let mut doc = Map::new();
    doc.insert(name, value);
    Ok(Value::Object(doc))
}

/// Transcode a feed body to UTF-8. Undecodable sequences become U+FFFD.
fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| declared_encoding(bytes))
        .unwrap_or(UTF_8);
    // Strips the BOM if present
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "Feed body has undecodable bytes");
    }
    text
}

/// The `encoding` pseudo-attribute of a leading `<?xml ...?>` declaration.
///
/// A declaration readable as ASCII cannot be UTF-16, so UTF-16 labels map to
/// UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(1024)];
    let decl = head.trim_ascii_start().strip_prefix(b"<?xml")?;
    let decl = &decl[..decl.windows(2).position(|w| w == b"?>")?];
    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let value = decl[at + 8..]
        .trim_ascii_start()
        .strip_prefix(b"=")?
        .trim_ascii_start();
    let (&quote, rest) = value.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let label = &rest[..rest.iter().position(|&b| b == quote)?];
    Encoding::for_label(label).map(Encoding::output_encoding)
}

fn attach(stack: &mut [Frame], root: &mut Option<(String, Value)>, name: String, value: Value) {
    match stack.last_mut() {
        Some(parent) => parent.add_child(name, value),
        None => {
            if root.is_none() {
                *root = Some((name, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_text_only_elements_become_strings() {
        let tree = parse_xml(b"<rss><channel><title> Hello </title></channel></rss>").unwrap();
        assert_eq!(tree, json!({"rss": {"channel": {"title": "Hello"}}}));
    }

    #[test]
    fn test_attributes_and_text() {
        let tree = parse_xml(br#"<feed><title type="html">A &amp; B</title></feed>"#).unwrap();
        assert_eq!(
            tree,
            json!({"feed": {"title": {"@_type": "html", "#text": "A & B"}}})
        );
    }

    #[test]
    fn test_repeated_children_become_array() {
        let tree = parse_xml(b"<c><item>1</item><item>2</item><item>3</item></c>").unwrap();
        assert_eq!(tree, json!({"c": {"item": ["1", "2", "3"]}}));
    }

    #[test]
    fn test_empty_element_with_attributes() {
        let tree =
            parse_xml(br#"<item><media:thumbnail url="https://x/t.jpg"/></item>"#).unwrap();
        assert_eq!(
            tree,
            json!({"item": {"media:thumbnail": {"@_url": "https://x/t.jpg"}}})
        );
    }

    #[test]
    fn test_cdata_is_text() {
        let tree =
            parse_xml(b"<item><content:encoded><![CDATA[<p>Hi</p>]]></content:encoded></item>")
                .unwrap();
        assert_eq!(tree, json!({"item": {"content:encoded": "<p>Hi</p>"}}));
    }

    #[test]
    fn test_unknown_entity_kept_verbatim() {
        let tree = parse_xml(b"<t>a&nbsp;b</t>").unwrap();
        assert_eq!(tree["t"], json!("a&nbsp;b"));
    }

    #[test]
    fn test_latin1_declaration_is_decoded() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\
<rss><channel><title>Caf\xe9</title>\
<item><title>\xe9t\xe9</title></item><item><title>\xf4t\xe9</title></item>\
</channel></rss>";
        let tree = parse_xml(bytes).unwrap();
        let channel = &tree["rss"]["channel"];
        assert_eq!(channel["title"], json!("Café"));
        assert_eq!(
            channel["item"],
            json!([{"title": "été"}, {"title": "ôté"}])
        );
    }

    #[test]
    fn test_single_quoted_declaration_and_bom() {
        let tree = parse_xml(b"<?xml version='1.0' encoding='windows-1252'?><t>\x93q\x94</t>")
            .unwrap();
        assert_eq!(tree["t"], json!("\u{201c}q\u{201d}"));

        let tree = parse_xml(b"\xef\xbb\xbf<t>\xc3\xa9</t>").unwrap();
        assert_eq!(tree["t"], json!("é"));
    }

    #[test]
    fn test_undeclared_encoding_is_utf8() {
        let tree = parse_xml("<?xml version=\"1.0\"?><t>été</t>".as_bytes()).unwrap();
        assert_eq!(tree["t"], json!("été"));

        // Unknown labels fall back to UTF-8 as well
        let tree = parse_xml("<?xml version=\"1.0\" encoding=\"x-nope\"?><t>ô</t>".as_bytes())
            .unwrap();
        assert_eq!(tree["t"], json!("ô"));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_xml(b"<rss><channel></rss>").is_err());
        assert!(parse_xml(b"<not valid xml").is_err());
        assert!(parse_xml(b"").is_err());
    }
}
