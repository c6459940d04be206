//! Envelope serialization.
//!
//! Header fields are written in the exact per-version wire order with fixed
//! namespace prefixes, because peer security servers are known to check the
//! structure of the envelope, not just its content. Attachments turn the
//! output into a multipart/related MIME body with one part per content id.

use crate::config::CodecConfig;
use crate::error::SerializationError;
use crate::header::SOAP_NS;
use crate::identifier::{ObjectType, ID_NS};
use crate::message::{Message, Payload};
use crate::validator;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;
use tracing::debug;
use uuid::Uuid;

/// Content id of the root (envelope) part in multipart output.
const ROOT_PART_CID: &str = "envelope";

/// A serialized message ready to hand to the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    /// Value for the HTTP `Content-Type` header
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Serialize a message into its wire form.
///
/// The message is validated first; a message that fails validation is a
/// producer-side bug and is rejected with
/// [`SerializationError::InvalidMessage`] rather than put on the wire.
pub fn serialize_message(
    message: &Message,
    config: &CodecConfig,
) -> Result<SerializedMessage, SerializationError> {
    let result = validator::validate(message);
    if result.has_violations() {
        return Err(SerializationError::InvalidMessage(result.into_error()));
    }
    if let Payload::Xml(fragment) = &message.body {
        check_fragment(fragment)?;
    }

    debug!(
        wrapper = %message.expected_wrapper(),
        attachments = message.attachments.len(),
        "serializing envelope"
    );

    let mut envelope = Vec::new();
    write_envelope(&mut envelope, message, config)?;

    if message.attachments.is_empty() {
        return Ok(SerializedMessage {
            content_type: "text/xml; charset=UTF-8".to_string(),
            body: envelope,
        });
    }

    let boundary = format!("xrd-{}", Uuid::new_v4());
    let mut out = Vec::new();
    write!(
        out,
        "--{boundary}\r\nContent-Type: text/xml; charset=UTF-8\r\n\
         Content-Transfer-Encoding: 8bit\r\nContent-ID: <{ROOT_PART_CID}>\r\n\r\n"
    )?;
    out.write_all(&envelope)?;
    out.write_all(b"\r\n")?;
    for attachment in &message.attachments {
        write!(
            out,
            "--{boundary}\r\nContent-Type: {}\r\n\
             Content-Transfer-Encoding: binary\r\nContent-ID: <{}>\r\n\r\n",
            attachment.content_type(),
            attachment.content_id()
        )?;
        for chunk in attachment.chunks(config.attachment_chunk_size) {
            out.write_all(chunk)?;
        }
        out.write_all(b"\r\n")?;
    }
    write!(out, "--{boundary}--\r\n")?;

    Ok(SerializedMessage {
        content_type: format!(
            "multipart/related; type=\"text/xml\"; charset=UTF-8; boundary=\"{boundary}\""
        ),
        body: out,
    })
}

/// Stream the bare envelope XML into `sink`.
///
/// Low-level path used by [`serialize_message`]; performs no validation of
/// its own.
pub fn write_envelope<W: Write>(
    sink: W,
    message: &Message,
    config: &CodecConfig,
) -> Result<(), SerializationError> {
    let mut writer = Writer::new(sink);
    let version = message.header.protocol_version;

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let envelope_name = format!("{}:Envelope", config.soap_prefix);
    let mut envelope = BytesStart::new(envelope_name.as_str());
    envelope.push_attribute((format!("xmlns:{}", config.soap_prefix).as_str(), SOAP_NS));
    envelope.push_attribute((format!("xmlns:{}", config.id_prefix).as_str(), ID_NS));
    envelope.push_attribute((
        format!("xmlns:{}", config.xrd_prefix).as_str(),
        version.xrd_namespace(),
    ));
    writer.write_event(Event::Start(envelope))?;

    let header_name = format!("{}:Header", config.soap_prefix);
    writer.write_event(Event::Start(BytesStart::new(header_name.as_str())))?;

    let header = &message.header;
    write_identifier(
        &mut writer,
        config,
        "client",
        header.client.object_type(),
        &header.client.xml_elements(),
    )?;
    write_identifier(
        &mut writer,
        config,
        "service",
        header.service.object_type(),
        &header.service.xml_elements(),
    )?;
    if let Some(server) = &header.security_server {
        write_identifier(
            &mut writer,
            config,
            "securityServer",
            ObjectType::Server,
            &server.xml_elements(),
        )?;
    }
    if let Some(user_id) = header.user_id.as_deref().filter(|v| !v.is_empty()) {
        write_text_element(
            &mut writer,
            &format!("{}:userId", config.xrd_prefix),
            user_id,
        )?;
    }
    write_text_element(
        &mut writer,
        &format!("{}:{}", config.xrd_prefix, version.id_field()),
        &header.id,
    )?;
    if let Some(issue) = header.issue.as_deref().filter(|v| !v.is_empty()) {
        write_text_element(&mut writer, &format!("{}:issue", config.xrd_prefix), issue)?;
    }
    if let Some(hash) = &header.request_hash {
        let name = format!("{}:requestHash", config.xrd_prefix);
        let mut start = BytesStart::new(name.as_str());
        start.push_attribute(("algorithmId", hash.algorithm_id.as_str()));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&hash.digest)))?;
        writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    }
    write_text_element(
        &mut writer,
        &format!("{}:protocolVersion", config.xrd_prefix),
        version.wire_value(),
    )?;
    writer.write_event(Event::End(BytesEnd::new(header_name.as_str())))?;

    let body_name = format!("{}:Body", config.soap_prefix);
    writer.write_event(Event::Start(BytesStart::new(body_name.as_str())))?;
    let wrapper = message.expected_wrapper();
    match &message.body {
        Payload::Empty => {
            writer.write_event(Event::Empty(BytesStart::new(wrapper.as_str())))?;
        }
        Payload::Xml(fragment) => {
            writer.write_event(Event::Start(BytesStart::new(wrapper.as_str())))?;
            // Payload fragments go out verbatim
            writer.write_event(Event::Text(BytesText::from_escaped(fragment.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(wrapper.as_str())))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(body_name.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(envelope_name.as_str())))?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> std::io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))
}

fn write_identifier<W: Write>(
    writer: &mut Writer<W>,
    config: &CodecConfig,
    local: &str,
    object_type: ObjectType,
    elements: &[(&str, &str)],
) -> std::io::Result<()> {
    let name = format!("{}:{}", config.xrd_prefix, local);
    let mut start = BytesStart::new(name.as_str());
    start.push_attribute((
        format!("{}:objectType", config.id_prefix).as_str(),
        object_type.as_str(),
    ));
    writer.write_event(Event::Start(start))?;
    for (child, value) in elements {
        write_text_element(writer, &format!("{}:{}", config.id_prefix, child), value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))
}

/// Reject payload fragments that are not well-formed. The codec does not
/// look at payload content any deeper than this.
///
/// The reader reports mismatched end names itself but reaches `Eof`
/// without complaint when elements are simply left unclosed, so element
/// depth is tracked here.
fn check_fragment(fragment: &str) -> Result<(), SerializationError> {
    let mut reader = Reader::from_str(fragment);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return Err(SerializationError::MalformedPayload(
                        "closing tag without a matching opening tag".to_string(),
                    ));
                }
                depth -= 1;
            }
            Ok(Event::Eof) => {
                if depth > 0 {
                    return Err(SerializationError::MalformedPayload(format!(
                        "{depth} element(s) left unclosed"
                    )));
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(SerializationError::MalformedPayload(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MessageHeader, ProtocolVersion};
    use crate::identifier::{MemberId, ServiceId};
    use crate::message::Attachment;

    fn request(version: ProtocolVersion) -> Message {
        let client = MemberId::subsystem("FI", "GOV", "1710128-9", "TestSystem").unwrap();
        let owner = MemberId::subsystem("FI", "GOV", "0245437-2", "TestService").unwrap();
        let service = ServiceId::service(owner, "getRandom")
            .unwrap()
            .with_version("v1")
            .unwrap();
        let header = MessageHeader::new(version, client, service, "ID11234").unwrap();
        Message::request(header, Payload::Xml("<data>9</data>".to_string()))
    }

    fn envelope_string(message: &Message) -> String {
        let mut out = Vec::new();
        write_envelope(&mut out, message, &CodecConfig::default()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_v6_envelope_structure() {
        let xml = envelope_string(&request(ProtocolVersion::V6));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope/\""));
        assert!(xml.contains("xmlns:xrd=\"http://x-road.eu/xsd/xroad.xsd\""));
        assert!(xml.contains("<xrd:client id:objectType=\"SUBSYSTEM\">"));
        assert!(xml.contains("<xrd:id>ID11234</xrd:id>"));
        assert!(xml.contains("<xrd:protocolVersion>4.0</xrd:protocolVersion>"));
        assert!(xml.contains("<getRandomRequest><data>9</data></getRandomRequest>"));
    }

    #[test]
    fn test_v7_envelope_renames_id_element() {
        let xml = envelope_string(&request(ProtocolVersion::V7));
        assert!(xml.contains("xmlns:xrd=\"http://x-road.eu/xsd/xroad7.xsd\""));
        assert!(xml.contains("<xrd:requestId>ID11234</xrd:requestId>"));
        assert!(!xml.contains("<xrd:id>"));
        assert!(xml.contains("<xrd:protocolVersion>7.0</xrd:protocolVersion>"));
    }

    #[test]
    fn test_header_field_wire_order() {
        let message = request(ProtocolVersion::V6);
        let mut message = message;
        message.header = message.header.with_user_id("EE1234").with_issue("CASE-7");
        let xml = envelope_string(&message);
        let client = xml.find("<xrd:client").unwrap();
        let service = xml.find("<xrd:service").unwrap();
        let user_id = xml.find("<xrd:userId>").unwrap();
        let id = xml.find("<xrd:id>").unwrap();
        let issue = xml.find("<xrd:issue>").unwrap();
        let protocol = xml.find("<xrd:protocolVersion>").unwrap();
        assert!(client < service && service < user_id && user_id < id);
        assert!(id < issue && issue < protocol);
    }

    #[test]
    fn test_serialize_without_attachments_is_plain_xml() {
        let serialized =
            serialize_message(&request(ProtocolVersion::V6), &CodecConfig::default()).unwrap();
        assert_eq!(serialized.content_type, "text/xml; charset=UTF-8");
        assert!(serialized.body.starts_with(b"<?xml"));
    }

    #[test]
    fn test_serialize_with_attachment_is_multipart() {
        let mut message = request(ProtocolVersion::V6);
        message.body = Payload::Xml(r#"<data href="cid:att1"/>"#.to_string());
        let message = message.with_attachment(Attachment::new(
            "att1",
            "application/octet-stream",
            vec![1u8, 2, 3],
        ));
        let serialized = serialize_message(&message, &CodecConfig::default()).unwrap();
        assert!(serialized.content_type.starts_with("multipart/related;"));
        let body = String::from_utf8_lossy(&serialized.body);
        assert!(body.contains("Content-ID: <att1>"));
        assert!(body.contains("Content-ID: <envelope>"));
        assert!(body.trim_end().ends_with("--"));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let mut message = request(ProtocolVersion::V6);
        message.body = Payload::Xml("<open>".to_string());
        let err = serialize_message(&message, &CodecConfig::default()).unwrap_err();
        assert!(matches!(err, SerializationError::MalformedPayload(_)));
    }

    #[test]
    fn test_unclosed_payload_elements_rejected() {
        // Unclosed elements reach Eof without a reader error, so the depth
        // check has to catch them
        for fragment in ["<a><b></b>", "<a><b>", "</a>", "<a></a></b>"] {
            let mut message = request(ProtocolVersion::V6);
            message.body = Payload::Xml(fragment.to_string());
            let err = serialize_message(&message, &CodecConfig::default()).unwrap_err();
            assert!(
                matches!(err, SerializationError::MalformedPayload(_)),
                "fragment: {fragment}"
            );
        }
    }

    #[test]
    fn test_invalid_message_rejected_before_wire() {
        let mut message = request(ProtocolVersion::V6);
        message.header.id = String::new();
        let err = serialize_message(&message, &CodecConfig::default()).unwrap_err();
        assert!(matches!(err, SerializationError::InvalidMessage(_)));
    }

    #[test]
    fn test_empty_body_self_closing_wrapper() {
        let mut message = request(ProtocolVersion::V6);
        message.body = Payload::Empty;
        let xml = envelope_string(&message);
        assert!(xml.contains("<getRandomRequest/>"));
    }

    #[test]
    fn test_custom_prefixes() {
        let config = CodecConfig {
            soap_prefix: "soapenv".to_string(),
            xrd_prefix: "xro".to_string(),
            ..Default::default()
        };
        let mut out = Vec::new();
        write_envelope(&mut out, &request(ProtocolVersion::V6), &config).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<soapenv:Envelope"));
        assert!(xml.contains("<xro:client"));
    }
}
