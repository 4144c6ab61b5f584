//! Request documents sent to the simulator.
//!
//! A request is a `<Message>` root holding one `<Event Name="...">` element per
//! instruction. The simulator applies events in document order, so builders
//! here preserve insertion order exactly.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;

use crate::error::{TelemetryError, TelemetryResult};

/// Subtree every subscription lives under. Unsubscribing it clears all
/// previous subscriptions of the connection.
pub const VEHICLE_ROOT: &str = "/root/thisVehicle";

/// Event names understood by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    GetValue,
    Subscribe,
    Unsubscribe,
    SetUpdateInterval,
    GetUpdateInterval,
    EstablishConnection,
    AbolishConnection,
    GetDataSchema,
    GetSubscriptions,
    GetSubscribedValues,
}

impl EventName {
    /// Wire spelling used in the `Name` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetValue => "GetValue",
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
            Self::SetUpdateInterval => "SetUpdateInterval",
            Self::GetUpdateInterval => "GetUpdateInterval",
            Self::EstablishConnection => "EstablishConnection",
            Self::AbolishConnection => "AbolishConnection",
            Self::GetDataSchema => "GetDataSchema",
            Self::GetSubscriptions => "GetSubscriptions",
            Self::GetSubscribedValues => "GetSubscribedValues",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: EventName,
    /// Path or value carried as element text. `None` encodes a self-closing element.
    pub payload: Option<String>,
}

impl Event {
    /// Event carrying a text payload.
    pub fn with_payload(name: EventName, payload: impl Into<String>) -> Self {
        Self {
            name,
            payload: Some(payload.into()),
        }
    }

    /// Event without payload.
    pub fn bare(name: EventName) -> Self {
        Self {
            name,
            payload: None,
        }
    }
}

/// An ordered sequence of events, encoded as one `<Message>` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    events: Vec<Event>,
}

impl Request {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Read the current value(s) under `path`.
    pub fn get_value(path: impl Into<String>) -> Self {
        Self::new().event(Event::with_payload(EventName::GetValue, path))
    }

    /// Replace all subscriptions with `paths` and start pushing every `interval_ms`.
    ///
    /// Order is fixed: unsubscribe the vehicle root, subscribe each path in input
    /// order, set the interval, then establish the push connection.
    pub fn subscribe<I, S>(paths: I, interval_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request =
            Self::new().event(Event::with_payload(EventName::Unsubscribe, VEHICLE_ROOT));
        for path in paths {
            request = request.event(Event::with_payload(EventName::Subscribe, path));
        }
        request
            .event(Event::with_payload(
                EventName::SetUpdateInterval,
                interval_ms.to_string(),
            ))
            .event(Event::bare(EventName::EstablishConnection))
    }

    /// Ask the simulator to stop pushing and drop the connection.
    pub fn abolish() -> Self {
        Self::new().event(Event::bare(EventName::AbolishConnection))
    }

    /// Events in send order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Encode as a UTF-8 XML document.
    ///
    /// The document ends with a newline: the simulator reads requests line by
    /// line until it sees the closing `</Message>`.
    pub fn to_xml(&self) -> TelemetryResult<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        write(
            &mut writer,
            XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        write(&mut writer, XmlEvent::Start(BytesStart::new("Message")))?;

        for event in &self.events {
            let mut start = BytesStart::new("Event");
            start.push_attribute(("Name", event.name.as_str()));
            match &event.payload {
                Some(text) => {
                    write(&mut writer, XmlEvent::Start(start))?;
                    write(&mut writer, XmlEvent::Text(BytesText::new(text)))?;
                    write(&mut writer, XmlEvent::End(BytesEnd::new("Event")))?;
                }
                None => write(&mut writer, XmlEvent::Empty(start))?,
            }
        }

        write(&mut writer, XmlEvent::End(BytesEnd::new("Message")))?;

        let mut xml = writer.into_inner();
        xml.push(b'\n');
        Ok(xml)
    }
}

fn write(writer: &mut Writer<Vec<u8>>, event: XmlEvent<'_>) -> TelemetryResult<()> {
    writer
        .write_event(event)
        .map_err(|e| TelemetryError::Encode(e.to_string()))
}

/// Encode a `GetValue` request for `path`.
pub fn build_get_value(path: &str) -> TelemetryResult<Vec<u8>> {
    Request::get_value(path).to_xml()
}

/// Encode a subscription request for `paths` pushed every `interval_ms`.
pub fn build_subscribe<S: AsRef<str>>(paths: &[S], interval_ms: u64) -> TelemetryResult<Vec<u8>> {
    Request::subscribe(paths.iter().map(|p| p.as_ref().to_string()), interval_ms).to_xml()
}
