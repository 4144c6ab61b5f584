//! Decoding of documents received from the simulator.
//!
//! Pushed updates look like
//!
//! ```text
//! <Message><Event Name="SubscribedValues">
//! <actualRpm>812.5</actualRpm><speed>42.0</speed>
//! </Event></Message>
//! ```
//!
//! Fields are looked up by bare tag name. Nesting and namespaces are ignored
//! and the first element in document order wins.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};

/// Tag of the vehicle speed leaf.
pub const SPEED: &str = "speed";
/// Tag of the engine rpm leaf.
pub const ACTUAL_RPM: &str = "actualRpm";
/// Event name of a pushed update.
pub const SUBSCRIBED_VALUES: &str = "SubscribedValues";

/// One element of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Element {
    name: String,
    /// `Name` attribute, if present.
    event_name: Option<String>,
    text: String,
}

/// A parsed response document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Elements in document (start tag) order.
    elements: Vec<Element>,
}

impl Response {
    /// Parse one complete XML document.
    ///
    /// Empty input, unbalanced tags, invalid UTF-8 and trailing content after
    /// the root element are all rejected with [`TelemetryError::Parse`].
    pub fn parse(buf: &[u8]) -> TelemetryResult<Self> {
        let mut reader = Reader::from_reader(buf);
        let mut scratch = Vec::new();

        // Open elements: index into `slots` plus accumulated text.
        let mut open: Vec<(usize, String)> = Vec::new();
        let mut slots: Vec<Element> = Vec::new();
        let mut root_closed = false;

        loop {
            let event = reader
                .read_event_into(&mut scratch)
                .map_err(|e| parse_error(&reader, e))?;

            match event {
                XmlEvent::Start(start) => {
                    if root_closed {
                        return Err(TelemetryError::Parse(
                            "extra content after document element".to_string(),
                        ));
                    }
                    let element = open_element(&start)?;
                    open.push((slots.len(), String::new()));
                    slots.push(element);
                }
                XmlEvent::Empty(start) => {
                    if root_closed {
                        return Err(TelemetryError::Parse(
                            "extra content after document element".to_string(),
                        ));
                    }
                    slots.push(open_element(&start)?);
                    if open.is_empty() {
                        root_closed = true;
                    }
                }
                XmlEvent::End(_) => {
                    let (slot, text) = open.pop().ok_or_else(|| {
                        TelemetryError::Parse("unexpected closing tag".to_string())
                    })?;
                    slots[slot].text = text.trim().to_string();
                    // Text content includes all descendant text.
                    if let Some((_, parent_text)) = open.last_mut() {
                        parent_text.push_str(&text);
                    } else {
                        root_closed = true;
                    }
                }
                XmlEvent::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| TelemetryError::Parse(e.to_string()))?;
                    match open.last_mut() {
                        Some((_, buf)) => buf.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(TelemetryError::Parse(
                                "text outside of document element".to_string(),
                            ))
                        }
                    }
                }
                XmlEvent::CData(data) => {
                    let data = std::str::from_utf8(&data)
                        .map_err(|e| TelemetryError::Parse(e.to_string()))?
                        .to_string();
                    if let Some((_, buf)) = open.last_mut() {
                        buf.push_str(&data);
                    }
                }
                XmlEvent::Eof => break,
                _ => {}
            }
            scratch.clear();
        }

        if !open.is_empty() {
            return Err(TelemetryError::Parse(format!(
                "unexpected end of document, {} element(s) left open",
                open.len()
            )));
        }
        if slots.is_empty() {
            return Err(TelemetryError::Parse("empty document".to_string()));
        }

        Ok(Self { elements: slots })
    }

    /// Text of the first element named `tag`, if any.
    pub fn field(&self, tag: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.name == tag)
            .map(|e| e.text.as_str())
    }

    /// Like [`Response::field`], but a missing tag is a
    /// [`TelemetryError::FieldNotFound`].
    pub fn require(&self, tag: &str) -> TelemetryResult<&str> {
        self.field(tag).ok_or_else(|| TelemetryError::FieldNotFound {
            tag: tag.to_string(),
        })
    }

    /// Number of elements named `tag`.
    pub fn count(&self, tag: &str) -> usize {
        self.elements.iter().filter(|e| e.name == tag).count()
    }

    /// `Name` attributes of all `<Event>` elements, in document order.
    pub fn event_names(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.name == "Event")
            .filter_map(|e| e.event_name.as_deref())
            .collect()
    }

    /// Whether this document carries pushed values.
    ///
    /// Replies to control events (`Subscriptions`, `UpdateInterval`,
    /// `ConnectionEstablished`) are not updates. Documents without any
    /// `<Event>` are treated as bare updates.
    pub fn is_update(&self) -> bool {
        let names = self.event_names();
        names.is_empty() || names.contains(&SUBSCRIBED_VALUES)
    }

    /// Name of the document element.
    pub fn root(&self) -> &str {
        // `parse` never yields an empty element list.
        self.elements.first().map(|e| e.name.as_str()).unwrap_or("")
    }

    /// Build a [`Sample`] holding the value of each of `tags`.
    pub fn sample<S: AsRef<str>>(&self, tags: &[S]) -> Sample {
        Sample {
            received_at: Utc::now(),
            values: tags
                .iter()
                .map(|tag| FieldValue {
                    tag: tag.as_ref().to_string(),
                    value: self.field(tag.as_ref()).map(str::to_string),
                })
                .collect(),
        }
    }
}

fn open_element(start: &BytesStart<'_>) -> TelemetryResult<Element> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| TelemetryError::Parse(e.to_string()))?
        .to_string();

    let mut event_name = None;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| TelemetryError::Parse(e.to_string()))?;
        if attr.key.as_ref() == b"Name" {
            let value = attr
                .unescape_value()
                .map_err(|e| TelemetryError::Parse(e.to_string()))?;
            event_name = Some(value.into_owned());
        }
    }

    Ok(Element {
        name,
        event_name,
        text: String::new(),
    })
}

fn parse_error(reader: &Reader<&[u8]>, err: quick_xml::Error) -> TelemetryError {
    TelemetryError::Parse(format!("{} at byte {}", err, reader.buffer_position()))
}

/// Extract the text of the first `tag` element from a raw document.
pub fn extract_field(buf: &[u8], tag: &str) -> TelemetryResult<String> {
    Response::parse(buf)?.require(tag).map(str::to_string)
}

/// Value of one reported field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub tag: String,
    /// `None` if the tag was absent from the update.
    pub value: Option<String>,
}

/// Field values decoded from one received update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub received_at: DateTime<Utc>,
    pub values: Vec<FieldValue>,
}

impl Sample {
    /// Value of `tag`, if it was both requested and present.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.tag == tag)
            .and_then(|v| v.value.as_deref())
    }

    /// Whether both samples carry the same values, ignoring receive time.
    pub fn same_values(&self, other: &Sample) -> bool {
        self.values == other.values
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, field) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match &field.value {
                Some(value) => write!(f, "{}: {}", field.tag, value)?,
                None => write!(f, "{}: -", field.tag)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUSH: &str = "<Message><Event Name=\"SubscribedValues\">\n\
        <actualRpm>812.5</actualRpm><speed>42.0</speed>\n\
        </Event></Message>\n";

    #[test]
    fn extracts_pushed_values() {
        assert_eq!(extract_field(PUSH.as_bytes(), SPEED).unwrap(), "42.0");
        assert_eq!(extract_field(PUSH.as_bytes(), ACTUAL_RPM).unwrap(), "812.5");
    }

    #[test]
    fn missing_tag_is_not_found() {
        let err = extract_field(PUSH.as_bytes(), "latitude").unwrap_err();
        assert!(matches!(err, TelemetryError::FieldNotFound { ref tag } if tag == "latitude"));
    }

    #[test]
    fn malformed_input_is_parse_error() {
        for input in [
            "",
            "   \n",
            "<Message><speed>1</speed>",
            "<Message><speed>1</rpm></Message>",
            "<Message></Message><Message></Message>",
            "garbage",
        ] {
            let err = extract_field(input.as_bytes(), SPEED).unwrap_err();
            assert!(
                matches!(err, TelemetryError::Parse(_)),
                "expected parse error for {:?}, got {:?}",
                input,
                err
            );
        }
    }

    #[test]
    fn invalid_utf8_is_parse_error() {
        let err = extract_field(b"<speed>\xff\xfe</speed>", SPEED).unwrap_err();
        assert!(matches!(err, TelemetryError::Parse(_)));
    }

    #[test]
    fn first_match_wins() {
        let xml = "<root><a><speed>1</speed></a><speed>2</speed></root>";
        let response = Response::parse(xml.as_bytes()).unwrap();
        assert_eq!(response.field(SPEED), Some("1"));
        assert_eq!(response.count(SPEED), 2);
    }

    #[test]
    fn text_content_spans_descendants() {
        let xml = "<root><Properties><speed>3</speed><rise>4</rise></Properties></root>";
        let response = Response::parse(xml.as_bytes()).unwrap();
        assert_eq!(response.field("Properties"), Some("34"));
        assert_eq!(response.root(), "root");
    }

    #[test]
    fn round_trip_with_entities_and_decl() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
            <Message><note>a &amp; b</note><empty/></Message>";
        let response = Response::parse(xml.as_bytes()).unwrap();
        assert_eq!(response.field("note"), Some("a & b"));
        assert_eq!(response.field("empty"), Some(""));
    }

    #[test]
    fn event_names_in_order() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Message>\
            <Event Name=\"Subscriptions\">\n</Event>\
            <Event Name=\"UpdateInterval\">\n200\n</Event>\
            <Event Name=\"ConnectionEstablished\"/>\n</Message>\n";
        let response = Response::parse(xml.as_bytes()).unwrap();
        assert_eq!(
            response.event_names(),
            vec!["Subscriptions", "UpdateInterval", "ConnectionEstablished"]
        );
        assert_eq!(response.field("Event"), Some(""));
        assert!(response.field(SPEED).is_none());
        assert!(!response.is_update());
    }

    #[test]
    fn pushed_values_are_updates() {
        assert!(Response::parse(PUSH.as_bytes()).unwrap().is_update());
        assert!(Response::parse(b"<Message><speed>1</speed></Message>")
            .unwrap()
            .is_update());

        // Subscription acknowledgement with empty leaves.
        let ack = "<Message><Event Name=\"Subscriptions\"><speed/><actualRpm/></Event>\
            <Event Name=\"ConnectionEstablished\"/></Message>";
        let response = Response::parse(ack.as_bytes()).unwrap();
        assert_eq!(response.field(SPEED), Some(""));
        assert!(!response.is_update());
    }

    #[test]
    fn sample_reports_missing_fields() {
        let xml = "<Message><speed>10</speed></Message>";
        let sample = Response::parse(xml.as_bytes())
            .unwrap()
            .sample(&[SPEED, ACTUAL_RPM]);
        assert_eq!(sample.get(SPEED), Some("10"));
        assert_eq!(sample.get(ACTUAL_RPM), None);
        assert_eq!(sample.to_string(), "speed: 10 actualRpm: -");
    }

    #[test]
    fn sample_serializes() {
        let sample = Response::parse(PUSH.as_bytes()).unwrap().sample(&[SPEED]);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["values"][0]["tag"], "speed");
        assert_eq!(json["values"][0]["value"], "42.0");

        let other = Response::parse(PUSH.as_bytes()).unwrap().sample(&[SPEED]);
        assert!(sample.same_values(&other));
    }
}
