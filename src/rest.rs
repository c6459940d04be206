//! REST-to-SOAP bridge.
//!
//! Lets a SOAP-only consumer reach a REST provider and vice versa. A REST
//! call travels inside the request wrapper as a small descriptor (method,
//! path, query parameters, optional body); a REST response travels back
//! either inline in the envelope or as an attachment, depending on its
//! content type and size.

use crate::config::CodecConfig;
use crate::error::{xml_escape, ValidationError, Violation, ViolationCode};
use crate::header::MessageHeader;
use crate::message::{Attachment, Message, Payload};

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;
use uuid::Uuid;

const KNOWN_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// A REST call extracted from a request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    /// Upper-cased HTTP method
    pub method: String,
    /// Resource path relative to the provider base URL
    pub path: String,
    /// Query parameters in descriptor order; names may repeat
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Wrap a REST response body into a response message.
///
/// XML and text bodies up to `inline_body_limit` bytes are inlined into the
/// envelope; anything else becomes a single attachment referenced from the
/// body by content id, with the original content type preserved.
pub fn wrap_rest_response(
    header: &MessageHeader,
    body: &[u8],
    content_type: &str,
    config: &CodecConfig,
) -> Message {
    let inline = body.len() <= config.inline_body_limit;
    let ct = content_type.to_ascii_lowercase();

    if inline && ct.contains("xml") {
        if let Ok(text) = std::str::from_utf8(body) {
            let fragment = strip_xml_decl(text).trim();
            let payload = if fragment.is_empty() {
                Payload::Empty
            } else {
                Payload::Xml(format!("<data>{fragment}</data>"))
            };
            return Message::response(header.clone(), payload);
        }
    }
    if inline && (ct.starts_with("text/") || ct.contains("json")) {
        if let Ok(text) = std::str::from_utf8(body) {
            return Message::response(
                header.clone(),
                Payload::Xml(format!("<data>{}</data>", xml_escape(text))),
            );
        }
    }

    // Binary, oversized or undecodable: carry the bytes out of band
    let cid = format!("resp-{}", Uuid::new_v4());
    debug!(content_type, size = body.len(), cid = %cid, "carrying response as attachment");
    let payload = Payload::Xml(format!("<data href=\"cid:{cid}\"/>"));
    Message::response(header.clone(), payload)
        .with_attachment(Attachment::new(cid, content_type, body.to_vec()))
}

fn strip_xml_decl(text: &str) -> &str {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(end) = rest.find("?>") {
            return &rest[end + 2..];
        }
    }
    trimmed
}

/// Extract the REST call descriptor from a request message.
///
/// Reports every problem with the descriptor at once, in the same shape the
/// message validator uses.
pub fn unwrap_rest_request(message: &Message) -> Result<RestRequest, ValidationError> {
    let mut violations = Vec::new();

    let fragment = match &message.body {
        Payload::Xml(fragment) => fragment.as_str(),
        Payload::Empty => {
            return Err(ValidationError::new(vec![Violation::new(
                ViolationCode::InvalidRestDescriptor,
                "request body is empty, expected a REST call descriptor",
            )]));
        }
    };

    let descriptor = match read_descriptor(fragment) {
        Ok(descriptor) => descriptor,
        Err(violation) => return Err(ValidationError::new(vec![violation])),
    };

    let method = match descriptor.method {
        None => {
            violations.push(Violation::for_field(
                ViolationCode::MissingField,
                "httpMethod",
                "descriptor element \"httpMethod\" is missing or empty",
            ));
            None
        }
        Some(raw) => {
            let method = raw.trim().to_ascii_uppercase();
            if KNOWN_METHODS.contains(&method.as_str()) {
                Some(method)
            } else {
                violations.push(Violation::for_field(
                    ViolationCode::InvalidRestDescriptor,
                    "httpMethod",
                    format!("\"{raw}\" is not a supported HTTP method"),
                ));
                None
            }
        }
    };

    let path = match descriptor.path {
        Some(path) if !path.trim().is_empty() => Some(path.trim().to_string()),
        _ => {
            violations.push(Violation::for_field(
                ViolationCode::MissingField,
                "resourcePath",
                "descriptor element \"resourcePath\" is missing or empty",
            ));
            None
        }
    };

    let body = match descriptor.body {
        None => None,
        Some(DescriptorBody::Inline(text)) => Some(text.into_bytes()),
        Some(DescriptorBody::Reference(cid)) => match message.attachment(&cid) {
            Some(attachment) => Some(attachment.data().to_vec()),
            None => {
                violations.push(Violation::for_field(
                    ViolationCode::MissingAttachment,
                    cid.clone(),
                    format!("request body references attachment \"{cid}\" but no such part is present"),
                ));
                None
            }
        },
    };

    match (method, path) {
        (Some(method), Some(path)) if violations.is_empty() => Ok(RestRequest {
            method,
            path,
            query: descriptor.query,
            body,
        }),
        _ => Err(ValidationError::new(violations)),
    }
}

enum DescriptorBody {
    Inline(String),
    Reference(String),
}

#[derive(Default)]
struct Descriptor {
    method: Option<String>,
    path: Option<String>,
    query: Vec<(String, String)>,
    body: Option<DescriptorBody>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Method,
    Path,
    Query,
    Body,
}

fn read_descriptor(fragment: &str) -> Result<Descriptor, Violation> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);

    let mut descriptor = Descriptor::default();
    let mut current: Option<Field> = None;
    let mut query_name: Option<String> = None;
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Err(e) => {
                return Err(Violation::new(
                    ViolationCode::InvalidRestDescriptor,
                    format!("descriptor is not well-formed XML: {e}"),
                ));
            }
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"httpMethod" => current = Some(Field::Method),
                b"resourcePath" => current = Some(Field::Path),
                b"queryParam" => {
                    query_name = attr_value(&e, "name");
                    if query_name.is_none() {
                        return Err(Violation::new(
                            ViolationCode::InvalidRestDescriptor,
                            "queryParam element without a name attribute",
                        ));
                    }
                    current = Some(Field::Query);
                }
                b"requestBody" => {
                    if let Some(href) = attr_value(&e, "href") {
                        descriptor.body = Some(reference_body(&href)?);
                        current = None;
                    } else {
                        current = Some(Field::Body);
                    }
                }
                _ => current = None,
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"queryParam" => match attr_value(&e, "name") {
                    Some(name) => descriptor.query.push((name, String::new())),
                    None => {
                        return Err(Violation::new(
                            ViolationCode::InvalidRestDescriptor,
                            "queryParam element without a name attribute",
                        ));
                    }
                },
                b"requestBody" => {
                    if let Some(href) = attr_value(&e, "href") {
                        descriptor.body = Some(reference_body(&href)?);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => match t.xml_content() {
                Ok(text) => text_buf.push_str(&text),
                Err(e) => {
                    return Err(Violation::new(
                        ViolationCode::InvalidRestDescriptor,
                        format!("descriptor text cannot be decoded: {e}"),
                    ));
                }
            },
            Ok(Event::GeneralRef(r)) => {
                let resolved = r
                    .resolve_char_ref()
                    .ok()
                    .flatten()
                    .map(String::from)
                    .or_else(|| {
                        r.decode().ok().and_then(|name| {
                            quick_xml::escape::resolve_predefined_entity(&name)
                                .map(str::to_string)
                        })
                    });
                match resolved {
                    Some(s) => text_buf.push_str(&s),
                    None => {
                        return Err(Violation::new(
                            ViolationCode::InvalidRestDescriptor,
                            "descriptor text cannot be decoded: unknown entity reference",
                        ));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let text = std::mem::take(&mut text_buf);
                match current {
                    Some(Field::Method) if !text.is_empty() => descriptor.method = Some(text),
                    Some(Field::Path) if !text.is_empty() => descriptor.path = Some(text),
                    // A queryParam that closed without text carries an empty value
                    Some(Field::Query) => {
                        if let Some(name) = query_name.take() {
                            descriptor.query.push((name, text));
                        }
                    }
                    Some(Field::Body) if !text.is_empty() => {
                        descriptor.body = Some(DescriptorBody::Inline(text));
                    }
                    _ => {}
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
        }
    }
    Ok(descriptor)
}

fn reference_body(href: &str) -> Result<DescriptorBody, Violation> {
    match href.strip_prefix("cid:") {
        Some(cid) if !cid.is_empty() => Ok(DescriptorBody::Reference(cid.to_string())),
        _ => Err(Violation::new(
            ViolationCode::InvalidRestDescriptor,
            format!("requestBody href \"{href}\" is not a cid reference"),
        )),
    }
}

fn attr_value(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == name.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}
