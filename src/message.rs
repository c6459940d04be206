//! The typed message exchanged between consumer, security server and
//! adapter: protocol header, opaque payload and ordered attachments.
//!
//! A `Message` is owned by the request scope that created it and is never
//! shared between handlers; all codec operations take it by reference or by
//! value, no interior mutability anywhere.

use crate::config::CodecConfig;
use crate::error::ValidationError;
use crate::header::MessageHeader;
use crate::identifier::{MemberId, ServiceId};

use quick_xml::events::Event;
use quick_xml::Reader;

/// Request or response side of an exchange; decides the body wrapper name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    /// Suffix appended to the service code to form the wrapper element name.
    pub fn wrapper_suffix(self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Response => "Response",
        }
    }
}

/// The body content carried inside the wrapper element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    /// An XML fragment inserted into the body verbatim. The codec checks it
    /// for well-formedness on serialization but never interprets it.
    Xml(String),
}

impl Payload {
    pub fn as_xml(&self) -> Option<&str> {
        match self {
            Self::Xml(fragment) => Some(fragment),
            Self::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A binary part carried alongside the envelope, referenced from the body
/// by content id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    content_id: String,
    content_type: String,
    data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequential single-pass view of the attachment bytes in chunks of at
    /// most `chunk_size`, so writers never need a second full copy.
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, u8> {
        self.data.chunks(chunk_size.max(1))
    }
}

/// A parsed or constructed X-Road message.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub kind: MessageKind,
    pub body: Payload,
    /// Ordered attachment parts
    pub attachments: Vec<Attachment>,
    /// Body wrapper element name as seen on the wire; `None` for messages
    /// built locally, where the wrapper is derived from the service code.
    pub wrapper_name: Option<String>,
}

// Structural equality covers header, kind, body and attachments; the wire
// wrapper name is parser bookkeeping and does not take part.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.kind == other.kind
            && self.body == other.body
            && self.attachments == other.attachments
    }
}

impl Eq for Message {}

impl Message {
    pub fn request(header: MessageHeader, body: Payload) -> Self {
        Self {
            header,
            kind: MessageKind::Request,
            body,
            attachments: Vec::new(),
            wrapper_name: None,
        }
    }

    pub fn response(header: MessageHeader, body: Payload) -> Self {
        Self {
            header,
            kind: MessageKind::Response,
            body,
            attachments: Vec::new(),
            wrapper_name: None,
        }
    }

    /// Build an empty request with a generated message id, using the
    /// default protocol version from the configuration.
    pub fn new_request(
        client: MemberId,
        service: ServiceId,
        config: &CodecConfig,
    ) -> Result<Self, ValidationError> {
        let header = MessageHeader::new(
            config.default_protocol_version,
            client,
            service,
            MessageHeader::generate_id(),
        )?;
        Ok(Self::request(header, Payload::Empty))
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn attachment(&self, content_id: &str) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.content_id() == content_id)
    }

    /// Wrapper element name this message serializes under.
    pub fn expected_wrapper(&self) -> String {
        format!(
            "{}{}",
            self.header.service.service_code(),
            self.kind.wrapper_suffix()
        )
    }

    /// Content ids referenced from the body via `href="cid:..."` attributes,
    /// in document order.
    ///
    /// Scanning stops quietly at the first XML error; well-formedness is the
    /// serializer's and parser's concern.
    pub fn referenced_content_ids(&self) -> Vec<String> {
        let fragment = match &self.body {
            Payload::Xml(fragment) => fragment,
            Payload::Empty => return Vec::new(),
        };
        let mut ids = Vec::new();
        let mut reader = Reader::from_str(fragment);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    for attr in e.attributes().flatten() {
                        if let Ok(value) = attr.unescape_value() {
                            if let Some(cid) = value.strip_prefix("cid:") {
                                if !cid.is_empty() && !ids.iter().any(|i| i == cid) {
                                    ids.push(cid.to_string());
                                }
                            }
                        }
                    }
                }
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
        }
        ids
    }
}
