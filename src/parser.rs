//! Inbound envelope parsing.
//!
//! Built on quick-xml, which is safe against XXE by default (entities are
//! never expanded); DOCTYPE declarations are rejected outright.
//!
//! The parser is deliberately tolerant of anything the schema allows peers
//! to vary: optional fields may be missing, present-but-empty fields count
//! as absent, and unknown header elements are skipped so that newer peers
//! do not break older consumers. What it is strict about is the difference
//! between input that is not X-Road at all ([`ParseError::Malformed`]) and
//! an X-Road header that does not match its declared schema revision
//! ([`ParseError::SchemaMismatch`]).

use crate::config::CodecConfig;
use crate::error::ParseError;
use crate::header::{MessageHeader, ProtocolVersion, RequestHash, SOAP_NS};
use crate::identifier::{MemberId, ObjectType, SecurityServerId, ServiceId};
use crate::message::{Attachment, Message, MessageKind, Payload};

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use std::collections::HashMap;
use tracing::debug;

/// Parse raw request or response bytes into a typed message.
///
/// `content_type` is the HTTP Content-Type of the inbound entity, if known;
/// it selects between a bare envelope and a multipart/related body carrying
/// attachments. Attachments are paired with body references by content id
/// later, during validation, so parts without XOP markers still work.
pub fn parse_message(
    data: &[u8],
    content_type: Option<&str>,
    _config: &CodecConfig,
) -> Result<Message, ParseError> {
    let (envelope, attachments) = split_parts(data, content_type)?;
    let xml = std::str::from_utf8(&envelope)
        .map_err(|e| ParseError::Malformed(format!("invalid UTF-8: {e}")))?;
    parse_envelope(xml, attachments)
}

fn malformed(e: impl std::fmt::Display) -> ParseError {
    ParseError::Malformed(e.to_string())
}

// ---------------------------------------------------------------------------
// MIME multipart handling
// ---------------------------------------------------------------------------

struct MimePart {
    content_id: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

fn split_parts(
    data: &[u8],
    content_type: Option<&str>,
) -> Result<(Vec<u8>, Vec<Attachment>), ParseError> {
    let boundary = match content_type {
        Some(ct) if ct.trim().to_ascii_lowercase().starts_with("multipart/") => {
            Some(boundary_param(ct).ok_or_else(|| {
                malformed("multipart content type without a boundary parameter")
            })?)
        }
        Some(_) => None,
        // No content type: sniff; multipart bodies open with the dash-boundary
        None if data.starts_with(b"--") => sniff_boundary(data),
        None => None,
    };
    let boundary = match boundary {
        Some(b) => b,
        None => return Ok((data.to_vec(), Vec::new())),
    };

    let mut parts = split_multipart(data, &boundary)?;
    if parts.is_empty() {
        return Err(malformed("multipart body contains no parts"));
    }

    // The root part is the first XML part, or failing that simply the first
    let root_index = parts
        .iter()
        .position(|p| {
            p.content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"))
        })
        .unwrap_or(0);
    let root = parts.remove(root_index);

    let attachments = parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            Attachment::new(
                part.content_id.unwrap_or_else(|| format!("part{}", i + 1)),
                part.content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                part.body,
            )
        })
        .collect();
    Ok((root.body, attachments))
}

fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn sniff_boundary(data: &[u8]) -> Option<String> {
    let line_end = data.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let boundary = std::str::from_utf8(&data[2..line_end]).ok()?;
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|p| p + from)
}

fn split_multipart(data: &[u8], boundary: &str) -> Result<Vec<MimePart>, ParseError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut pos = find(data, 0, delimiter)
        .ok_or_else(|| malformed(format!("multipart boundary \"{boundary}\" not found")))?;
    loop {
        pos += delimiter.len();
        if data[pos..].starts_with(b"--") {
            break; // closing delimiter
        }
        if data[pos..].starts_with(b"\r\n") {
            pos += 2;
        } else if data[pos..].starts_with(b"\n") {
            pos += 1;
        }
        let next = find(data, pos, delimiter)
            .ok_or_else(|| malformed("unterminated multipart part"))?;
        let mut raw = &data[pos..next];
        if raw.ends_with(b"\r\n") {
            raw = &raw[..raw.len() - 2];
        } else if raw.ends_with(b"\n") {
            raw = &raw[..raw.len() - 1];
        }
        parts.push(parse_part(raw));
        pos = next;
    }
    Ok(parts)
}

fn parse_part(raw: &[u8]) -> MimePart {
    let (headers, body) = match find(raw, 0, b"\r\n\r\n") {
        Some(split) => (&raw[..split], &raw[split + 4..]),
        None => match find(raw, 0, b"\n\n") {
            Some(split) => (&raw[..split], &raw[split + 2..]),
            None => (&[][..], raw),
        },
    };
    let mut content_id = None;
    let mut content_type = None;
    for line in String::from_utf8_lossy(headers).lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            if key.trim().eq_ignore_ascii_case("content-id") {
                content_id = Some(value.trim_matches(|c| c == '<' || c == '>').to_string());
            } else if key.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            }
        }
    }
    MimePart {
        content_id,
        content_type,
        body: body.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Envelope parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RawHeader {
    client: Option<IdentifierElem>,
    service: Option<IdentifierElem>,
    security_server: Option<IdentifierElem>,
    /// Simple text header elements by local name; empty values never enter
    texts: HashMap<String, String>,
    request_hash: Option<(Option<String>, String)>,
    version: Option<ProtocolVersion>,
}

struct IdentifierElem {
    object_type: Option<ObjectType>,
    parts: HashMap<String, String>,
}

fn parse_envelope(xml: &str, attachments: Vec<Attachment>) -> Result<Message, ParseError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_envelope = false;
    let mut saw_body = false;
    let mut raw = RawHeader::default();
    let mut wrapper: Option<String> = None;
    let mut fragment: Option<String> = None;

    loop {
        match reader.read_resolved_event().map_err(malformed)? {
            (ns, Event::Start(e)) => {
                let local = local_str(&e)?;
                if !in_envelope {
                    if local == "Envelope" && ns_is(&ns, SOAP_NS) {
                        in_envelope = true;
                    } else {
                        return Err(malformed("root element is not a SOAP 1.1 Envelope"));
                    }
                } else if local == "Header" && ns_is(&ns, SOAP_NS) {
                    read_header(&mut reader, &mut raw)?;
                } else if local == "Body" && ns_is(&ns, SOAP_NS) {
                    saw_body = true;
                    let (w, f) = read_body(&mut reader, xml)?;
                    wrapper = w;
                    fragment = f;
                } else {
                    skip(&mut reader, &e)?;
                }
            }
            (ns, Event::Empty(e)) => {
                if !in_envelope {
                    let local = local_str(&e)?;
                    if local == "Envelope" && ns_is(&ns, SOAP_NS) {
                        in_envelope = true;
                    } else {
                        return Err(malformed("root element is not a SOAP 1.1 Envelope"));
                    }
                } else if local_str(&e)? == "Body" {
                    saw_body = true;
                }
            }
            (_, Event::DocType(_)) => {
                return Err(malformed("DOCTYPE declarations are not allowed"));
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    if !in_envelope {
        return Err(malformed("no SOAP envelope found"));
    }
    if !saw_body {
        return Err(malformed("SOAP Body is missing"));
    }

    let version = raw.version.ok_or_else(|| {
        malformed("no X-Road protocol header namespace found in the SOAP header")
    })?;

    let mut missing: Vec<String> = Vec::new();

    match raw.texts.get("protocolVersion") {
        None => missing.push("protocolVersion".to_string()),
        Some(text) => {
            if ProtocolVersion::from_wire(text) != Some(version) {
                missing.push("protocolVersion".to_string());
            }
        }
    }

    let id = raw.texts.get(version.id_field()).cloned();
    if id.is_none() {
        missing.push(version.id_field().to_string());
    }

    let client = match &raw.client {
        None => {
            missing.push("client".to_string());
            None
        }
        Some(elem) => build_member("client", elem, version, &mut missing),
    };
    let service = match &raw.service {
        None => {
            missing.push("service".to_string());
            None
        }
        Some(elem) => build_service("service", elem, &mut missing),
    };
    let security_server = match &raw.security_server {
        None => None,
        Some(elem) => build_server("securityServer", elem, &mut missing),
    };

    if !missing.is_empty() {
        return Err(ParseError::SchemaMismatch {
            version,
            fields: missing,
        });
    }

    // All three are present whenever `missing` stayed empty
    let (client, service, id) = match (client, service, id) {
        (Some(client), Some(service), Some(id)) => (client, service, id),
        _ => return Err(malformed("incomplete header")),
    };

    let header = MessageHeader {
        client,
        service,
        security_server,
        user_id: raw.texts.get("userId").cloned(),
        id,
        issue: raw.texts.get("issue").cloned(),
        request_hash: raw.request_hash.map(|(algorithm_id, digest)| RequestHash {
            algorithm_id: algorithm_id.unwrap_or_default(),
            digest,
        }),
        protocol_version: version,
    };

    let kind = match wrapper.as_deref() {
        Some(name) if name.ends_with("Response") => MessageKind::Response,
        _ => MessageKind::Request,
    };
    let body = match fragment {
        Some(f) => Payload::Xml(f),
        None => Payload::Empty,
    };

    debug!(
        version = %version,
        wrapper = wrapper.as_deref().unwrap_or("-"),
        attachments = attachments.len(),
        "parsed envelope"
    );

    Ok(Message {
        header,
        kind,
        body,
        attachments,
        wrapper_name: wrapper,
    })
}

fn read_header(reader: &mut NsReader<&[u8]>, raw: &mut RawHeader) -> Result<(), ParseError> {
    loop {
        match reader.read_resolved_event().map_err(malformed)? {
            (ns, Event::Start(e)) => {
                let local = local_str(&e)?;
                match header_version(&ns) {
                    Some(version) => {
                        raw.version.get_or_insert(version);
                        match local.as_str() {
                            "client" => raw.client = Some(read_identifier(reader, &e)?),
                            "service" => raw.service = Some(read_identifier(reader, &e)?),
                            "securityServer" => {
                                raw.security_server = Some(read_identifier(reader, &e)?)
                            }
                            "requestHash" => {
                                let algorithm_id = attr_local(&e, "algorithmId");
                                let text = read_text(reader)?;
                                if !text.trim().is_empty() {
                                    raw.request_hash =
                                        Some((algorithm_id, text.trim().to_string()));
                                }
                            }
                            _ => {
                                let text = read_text(reader)?;
                                if !text.trim().is_empty() {
                                    raw.texts.insert(local, text.trim().to_string());
                                }
                            }
                        }
                    }
                    // Foreign header element: forward compatibility, skip it
                    None => skip(reader, &e)?,
                }
            }
            (ns, Event::Empty(_)) => {
                // Present but empty counts as absent; still pins the revision
                if let Some(version) = header_version(&ns) {
                    raw.version.get_or_insert(version);
                }
            }
            (_, Event::End(_)) => return Ok(()),
            (_, Event::Eof) => return Err(malformed("unexpected end of document in header")),
            _ => {}
        }
    }
}

fn read_identifier(
    reader: &mut NsReader<&[u8]>,
    start: &BytesStart,
) -> Result<IdentifierElem, ParseError> {
    let object_type = attr_local(start, "objectType").and_then(|v| ObjectType::from_wire(&v));
    let mut parts = HashMap::new();
    loop {
        match reader.read_resolved_event().map_err(malformed)? {
            (_, Event::Start(e)) => {
                let local = local_str(&e)?;
                let text = read_text(reader)?;
                if !text.trim().is_empty() {
                    parts.insert(local, text.trim().to_string());
                }
            }
            (_, Event::Empty(_)) => {}
            (_, Event::End(_)) => break,
            (_, Event::Eof) => {
                return Err(malformed("unexpected end of document in identifier"))
            }
            _ => {}
        }
    }
    Ok(IdentifierElem { object_type, parts })
}

/// Collect the text content of the current element, consuming everything up
/// to and including its end tag. Nested elements are skipped over.
fn read_text(reader: &mut NsReader<&[u8]>) -> Result<String, ParseError> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_resolved_event().map_err(malformed)? {
            (_, Event::Start(_)) => depth += 1,
            (_, Event::End(_)) => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            (_, Event::Text(t)) => {
                if depth == 0 {
                    text.push_str(&t.xml_content().map_err(malformed)?);
                }
            }
            (_, Event::GeneralRef(r)) => {
                if depth == 0 {
                    if let Some(ch) = r.resolve_char_ref().map_err(malformed)? {
                        text.push(ch);
                    } else {
                        let name = r.decode().map_err(malformed)?;
                        match quick_xml::escape::resolve_predefined_entity(&name) {
                            Some(s) => text.push_str(s),
                            None => {
                                return Err(malformed(format!(
                                    "unknown entity reference &{name};"
                                )))
                            }
                        }
                    }
                }
            }
            (_, Event::CData(t)) => {
                if depth == 0 {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            (_, Event::Eof) => return Err(malformed("unexpected end of document")),
            _ => {}
        }
    }
}

fn read_body(
    reader: &mut NsReader<&[u8]>,
    xml: &str,
) -> Result<(Option<String>, Option<String>), ParseError> {
    let mut wrapper = None;
    let mut fragment = None;
    loop {
        match reader.read_resolved_event().map_err(malformed)? {
            (_, Event::Start(e)) => {
                if wrapper.is_none() {
                    wrapper = Some(local_str(&e)?);
                    let span = reader.read_to_end(e.name()).map_err(malformed)?;
                    // Verbatim span, so fragments round-trip byte-for-byte;
                    // whitespace-only content counts as an empty payload
                    let raw = &xml[span.start as usize..span.end as usize];
                    if !raw.trim().is_empty() {
                        fragment = Some(raw.to_string());
                    }
                } else {
                    skip(reader, &e)?;
                }
            }
            (_, Event::Empty(e)) => {
                if wrapper.is_none() {
                    wrapper = Some(local_str(&e)?);
                }
            }
            (_, Event::End(_)) => return Ok((wrapper, fragment)),
            (_, Event::Eof) => return Err(malformed("unexpected end of document in body")),
            _ => {}
        }
    }
}

fn skip(reader: &mut NsReader<&[u8]>, e: &BytesStart) -> Result<(), ParseError> {
    reader.read_to_end(e.name()).map_err(malformed)?;
    Ok(())
}

fn local_str(e: &BytesStart) -> Result<String, ParseError> {
    let local = e.local_name();
    std::str::from_utf8(local.as_ref())
        .map(str::to_string)
        .map_err(malformed)
}

fn ns_is(ns: &ResolveResult, expected: &str) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(b)) if *b == expected.as_bytes())
}

fn header_version(ns: &ResolveResult) -> Option<ProtocolVersion> {
    match ns {
        ResolveResult::Bound(Namespace(b)) => std::str::from_utf8(b)
            .ok()
            .and_then(ProtocolVersion::from_namespace),
        _ => None,
    }
}

fn attr_local(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == name.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

// ---------------------------------------------------------------------------
// Header field assembly
// ---------------------------------------------------------------------------

fn build_member(
    path: &str,
    elem: &IdentifierElem,
    version: ProtocolVersion,
    missing: &mut Vec<String>,
) -> Option<MemberId> {
    let mut absent = Vec::new();
    for field in ["xRoadInstance", "memberClass", "memberCode"] {
        if !elem.parts.contains_key(field) {
            absent.push(field);
        }
    }
    if version == ProtocolVersion::V7 && !elem.parts.contains_key("subsystemCode") {
        absent.push("subsystemCode");
    }
    if !absent.is_empty() {
        missing.extend(absent.iter().map(|f| format!("{path}.{f}")));
        return None;
    }
    let instance = elem.parts["xRoadInstance"].as_str();
    let class = elem.parts["memberClass"].as_str();
    let code = elem.parts["memberCode"].as_str();
    let result = match elem.parts.get("subsystemCode") {
        Some(subsystem) => MemberId::subsystem(instance, class, code, subsystem.as_str()),
        None => MemberId::member(instance, class, code),
    };
    match result {
        Ok(member) => Some(member),
        Err(e) => {
            missing.push(format!("{path}.{}", e.field));
            None
        }
    }
}

fn build_service(
    path: &str,
    elem: &IdentifierElem,
    missing: &mut Vec<String>,
) -> Option<ServiceId> {
    let instance = elem.parts.get("xRoadInstance");
    let service_code = elem.parts.get("serviceCode");
    if instance.is_none() {
        missing.push(format!("{path}.xRoadInstance"));
    }
    if service_code.is_none() {
        missing.push(format!("{path}.serviceCode"));
    }
    let (instance, service_code) = match (instance, service_code) {
        (Some(i), Some(c)) => (i.as_str(), c.as_str()),
        _ => return None,
    };

    let central = elem.object_type == Some(ObjectType::CentralService)
        || (!elem.parts.contains_key("memberClass") && !elem.parts.contains_key("memberCode"));

    let result = if central {
        ServiceId::central(instance, service_code)
    } else {
        let mut absent = Vec::new();
        for field in ["memberClass", "memberCode"] {
            if !elem.parts.contains_key(field) {
                absent.push(field);
            }
        }
        if !absent.is_empty() {
            missing.extend(absent.iter().map(|f| format!("{path}.{f}")));
            return None;
        }
        let class = elem.parts["memberClass"].as_str();
        let code = elem.parts["memberCode"].as_str();
        let owner = match elem.parts.get("subsystemCode") {
            Some(subsystem) => MemberId::subsystem(instance, class, code, subsystem.as_str()),
            None => MemberId::member(instance, class, code),
        };
        owner.and_then(|owner| ServiceId::service(owner, service_code))
    };

    let service = match result {
        Ok(service) => service,
        Err(e) => {
            missing.push(format!("{path}.{}", e.field));
            return None;
        }
    };
    match elem.parts.get("serviceVersion") {
        None => Some(service),
        Some(version) => match service.with_version(version.as_str()) {
            Ok(service) => Some(service),
            Err(e) => {
                missing.push(format!("{path}.{}", e.field));
                None
            }
        },
    }
}

fn build_server(
    path: &str,
    elem: &IdentifierElem,
    missing: &mut Vec<String>,
) -> Option<SecurityServerId> {
    let mut absent = Vec::new();
    for field in ["xRoadInstance", "memberClass", "memberCode", "serverCode"] {
        if !elem.parts.contains_key(field) {
            absent.push(field);
        }
    }
    if !absent.is_empty() {
        missing.extend(absent.iter().map(|f| format!("{path}.{f}")));
        return None;
    }
    match SecurityServerId::server(
        elem.parts["xRoadInstance"].as_str(),
        elem.parts["memberClass"].as_str(),
        elem.parts["memberCode"].as_str(),
        elem.parts["serverCode"].as_str(),
    ) {
        Ok(server) => Some(server),
        Err(e) => {
            missing.push(format!("{path}.{}", e.field));
            None
        }
    }
}
