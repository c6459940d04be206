//! Integration tests for the xrd-soap crate.
//!
//! These tests exercise the public API surface end-to-end, combining
//! serialization, parsing, validation and the REST bridge together.

use xrd_soap::{
    parse_message, serialize_message, unwrap_rest_request, validate, wrap_rest_response,
    Attachment, CodecConfig, MemberId, Message, MessageHeader, MessageKind, ParseError, Payload,
    ProtocolVersion, RequestHash, SecurityServerId, ServiceId, ViolationCode,
};

// ============================================================================
// Helpers: the canonical test fixture pair
// ============================================================================

fn client() -> MemberId {
    MemberId::subsystem("FI", "GOV", "1710128-9", "TestSystem").unwrap()
}

fn service() -> ServiceId {
    let owner = MemberId::subsystem("FI", "GOV", "0245437-2", "TestService").unwrap();
    ServiceId::service(owner, "getRandom")
        .unwrap()
        .with_version("v1")
        .unwrap()
}

fn request(version: ProtocolVersion) -> Message {
    let header = MessageHeader::new(version, client(), service(), "ID11234")
        .unwrap()
        .with_user_id("EE1234567890");
    Message::request(header, Payload::Xml("<data>9</data>".to_string()))
}

fn round_trip(message: &Message, config: &CodecConfig) -> Message {
    let wire = serialize_message(message, config).unwrap();
    parse_message(&wire.body, Some(&wire.content_type), config).unwrap()
}

// ============================================================================
// End-to-end: serialize then parse
// ============================================================================

#[test]
fn test_e2e_round_trip_v6() {
    let config = CodecConfig::default();
    let message = request(ProtocolVersion::V6);
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed, message);
    assert_eq!(parsed.wrapper_name.as_deref(), Some("getRandomRequest"));
}

#[test]
fn test_e2e_round_trip_v7() {
    let config = CodecConfig::default();
    let message = request(ProtocolVersion::V7);
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed, message);
    assert_eq!(parsed.header.protocol_version, ProtocolVersion::V7);
}

#[test]
fn test_e2e_round_trip_with_attachments() {
    let config = CodecConfig::default();
    let mut message = request(ProtocolVersion::V6);
    message.body = Payload::Xml(
        r#"<data><doc href="cid:att1"/><sig href="cid:att2"/></data>"#.to_string(),
    );
    let message = message
        .with_attachment(Attachment::new("att1", "application/pdf", b"%PDF-1.7".to_vec()))
        .with_attachment(Attachment::new(
            "att2",
            "application/octet-stream",
            vec![0u8, 1, 2, 3, 255],
        ));

    let wire = serialize_message(&message, &config).unwrap();
    assert!(wire.content_type.starts_with("multipart/related;"));

    let parsed = parse_message(&wire.body, Some(&wire.content_type), &config).unwrap();
    assert_eq!(parsed, message);
    assert_eq!(parsed.attachment("att1").unwrap().data(), b"%PDF-1.7");
    assert_eq!(parsed.attachment("att2").unwrap().content_type(), "application/octet-stream");
}

#[test]
fn test_e2e_round_trip_full_header() {
    let config = CodecConfig::default();
    let header = MessageHeader::new(ProtocolVersion::V6, client(), service(), "ID11234")
        .unwrap()
        .with_user_id("EE1234567890")
        .with_issue("CASE-7")
        .with_security_server(
            SecurityServerId::server("FI", "GOV", "0245437-2", "server1").unwrap(),
        )
        .with_request_hash(RequestHash {
            algorithm_id: "http://www.w3.org/2001/04/xmlenc#sha512".to_string(),
            digest: "ZGlnZXN0".to_string(),
        });
    let message = Message::response(header, Payload::Xml("<data>3</data>".to_string()));
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed, message);
    assert_eq!(
        parsed.header.request_hash.as_ref().unwrap().digest,
        "ZGlnZXN0"
    );
    assert_eq!(parsed.kind, MessageKind::Response);
}

#[test]
fn test_e2e_payload_fragment_preserved_verbatim() {
    let config = CodecConfig::default();
    let mut message = request(ProtocolVersion::V6);
    let fragment = r#"<data attr="v&amp;w"><nested><deep>x</deep></nested><empty/></data>"#;
    message.body = Payload::Xml(fragment.to_string());
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed.body.as_xml(), Some(fragment));
}

#[test]
fn test_e2e_fragment_whitespace_round_trips() {
    let config = CodecConfig::default();
    let mut message = request(ProtocolVersion::V6);
    message.body = Payload::Xml("  <data>9</data> ".to_string());
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed.body.as_xml(), Some("  <data>9</data> "));
    assert_eq!(parsed, message);
}

#[test]
fn test_e2e_empty_optional_fields_round_trip_equal() {
    let config = CodecConfig::default();
    let header = MessageHeader::new(ProtocolVersion::V6, client(), service(), "ID1")
        .unwrap()
        .with_user_id("");
    let message = Message::request(header, Payload::Xml("<data>1</data>".to_string()));
    assert_eq!(message.header.user_id, None);
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed, message);
}

#[test]
fn test_e2e_new_request_uses_config_defaults() {
    let config = CodecConfig {
        default_protocol_version: ProtocolVersion::V7,
        ..Default::default()
    };
    let message = Message::new_request(client(), service(), &config).unwrap();
    assert_eq!(message.header.protocol_version, ProtocolVersion::V7);
    assert!(!message.header.id.is_empty());
    let parsed = round_trip(&message, &config);
    assert_eq!(parsed, message);
}

// ============================================================================
// Parse failure classification
// ============================================================================

#[test]
fn test_malformed_input_is_never_a_validation_error() {
    let config = CodecConfig::default();
    for garbage in [
        &b"not xml at all"[..],
        b"<unclosed>",
        b"<root/>",
        b"\xff\xfe\x00",
    ] {
        let err = parse_message(garbage, Some("text/xml"), &config).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)), "input: {garbage:?}");
    }
}

#[test]
fn test_missing_v7_mandatory_field_names_it() {
    let config = CodecConfig::default();
    let wire = serialize_message(&request(ProtocolVersion::V7), &config).unwrap();
    let xml = String::from_utf8(wire.body).unwrap();
    let without_id = xml.replace("<xrd:requestId>ID11234</xrd:requestId>", "");
    match parse_message(without_id.as_bytes(), Some("text/xml"), &config).unwrap_err() {
        ParseError::SchemaMismatch { version, fields } => {
            assert_eq!(version, ProtocolVersion::V7);
            assert_eq!(fields, vec!["requestId"]);
        }
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }
}

#[test]
fn test_schema_mismatch_renders_as_fault() {
    let err = ParseError::SchemaMismatch {
        version: ProtocolVersion::V6,
        fields: vec!["client".to_string(), "id".to_string()],
    };
    let fault = err.to_soap_fault();
    assert!(fault.contains("<SOAP-ENV:Fault>"));
    assert!(fault.contains("MISSING_FIELD"));
    assert!(fault.contains("field=\"client\""));
    assert!(fault.contains("field=\"id\""));
}

// ============================================================================
// Validation scenarios
// ============================================================================

#[test]
fn test_two_references_one_part_fails_validation() {
    let mut message = request(ProtocolVersion::V6);
    message.body = Payload::Xml(
        r#"<data><a href="cid:att1"/><b href="cid:att2"/></data>"#.to_string(),
    );
    let message =
        message.with_attachment(Attachment::new("att1", "application/pdf", b"%PDF".to_vec()));

    let result = validate(&message);
    assert!(result.has_violations());
    let err = result.into_error();
    assert_eq!(err.violations.len(), 1);
    assert_eq!(err.violations[0].code, ViolationCode::MissingAttachment);
    assert_eq!(err.violations[0].field.as_deref(), Some("att2"));

    // And the serializer refuses to put it on the wire
    let err = serialize_message(&message, &CodecConfig::default()).unwrap_err();
    assert!(err.to_string().contains("validation"));
}

#[test]
fn test_validation_fault_round_trips_through_parser() {
    let config = CodecConfig::default();
    let mut message = request(ProtocolVersion::V6);
    message.header.id = String::new();
    let fault = validate(&message).into_error().to_soap_fault();
    // The fault itself is well-formed XML, whatever was wrong with the input
    let err = parse_message(fault.as_bytes(), Some("text/xml"), &config).unwrap_err();
    assert!(matches!(err, ParseError::Malformed(_)));
    assert!(quick_xml::Reader::from_str(&fault)
        .read_event()
        .is_ok());
}

// ============================================================================
// REST bridge end-to-end
// ============================================================================

#[test]
fn test_rest_descriptor_survives_the_wire() {
    let config = CodecConfig::default();
    let header = MessageHeader::new(ProtocolVersion::V6, client(), service(), "ID1").unwrap();
    let descriptor = "<httpMethod>GET</httpMethod>\
                      <resourcePath>/pets/42</resourcePath>\
                      <queryParam name=\"verbose\">true</queryParam>";
    let message = Message::request(header, Payload::Xml(descriptor.to_string()));

    let parsed = round_trip(&message, &config);
    let rest = unwrap_rest_request(&parsed).unwrap();
    assert_eq!(rest.method, "GET");
    assert_eq!(rest.path, "/pets/42");
    assert_eq!(rest.query, vec![("verbose".to_string(), "true".to_string())]);
}

#[test]
fn test_rest_response_attachment_survives_the_wire() {
    let config = CodecConfig {
        inline_body_limit: 4,
        ..Default::default()
    };
    let header = MessageHeader::new(ProtocolVersion::V6, client(), service(), "ID1").unwrap();
    let message = wrap_rest_response(&header, b"0123456789", "application/pdf", &config);
    assert_eq!(message.attachments.len(), 1);

    let parsed = round_trip(&message, &config);
    assert_eq!(parsed.attachments.len(), 1);
    assert_eq!(parsed.attachments[0].data(), b"0123456789");
    assert_eq!(parsed.attachments[0].content_type(), "application/pdf");
    assert!(!validate(&parsed).has_violations());
}

#[test]
fn test_rest_inline_xml_response_survives_the_wire() {
    let config = CodecConfig::default();
    let header = MessageHeader::new(ProtocolVersion::V6, client(), service(), "ID1").unwrap();
    let message = wrap_rest_response(
        &header,
        b"<pet><name>Rex</name></pet>",
        "application/xml",
        &config,
    );
    let parsed = round_trip(&message, &config);
    assert_eq!(
        parsed.body.as_xml(),
        Some("<data><pet><name>Rex</name></pet></data>")
    );
}

// ============================================================================
// Interop with externally produced envelopes
// ============================================================================

#[test]
fn test_parse_hand_written_envelope_with_extra_whitespace() {
    let config = CodecConfig::default();
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:id="http://x-road.eu/xsd/identifiers"
    xmlns:xrd="http://x-road.eu/xsd/xroad.xsd">
  <SOAP-ENV:Header>
    <xrd:client id:objectType="SUBSYSTEM">
      <id:xRoadInstance> FI </id:xRoadInstance>
      <id:memberClass>GOV</id:memberClass>
      <id:memberCode>1710128-9</id:memberCode>
      <id:subsystemCode>TestSystem</id:subsystemCode>
    </xrd:client>
    <xrd:service id:objectType="SERVICE">
      <id:xRoadInstance>FI</id:xRoadInstance>
      <id:memberClass>GOV</id:memberClass>
      <id:memberCode>0245437-2</id:memberCode>
      <id:subsystemCode>TestService</id:subsystemCode>
      <id:serviceCode>getRandom</id:serviceCode>
      <id:serviceVersion>v1</id:serviceVersion>
    </xrd:service>
    <xrd:id>ID11234</xrd:id>
    <xrd:protocolVersion>4.0</xrd:protocolVersion>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body>
    <getRandomRequest>
      <data>1</data>
    </getRandomRequest>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;
    let message = parse_message(xml.as_bytes(), Some("text/xml"), &config).unwrap();
    // Identifier part text is trimmed, payload whitespace is preserved
    assert_eq!(message.header.client.xroad_instance(), "FI");
    assert!(message.body.as_xml().unwrap().contains("<data>1</data>"));
    assert_eq!(message.expected_wrapper(), "getRandomRequest");
    assert!(!validate(&message).has_violations());
}

#[test]
fn test_parse_accepts_foreign_header_blocks() {
    let config = CodecConfig::default();
    let wire = serialize_message(&request(ProtocolVersion::V6), &config).unwrap();
    let xml = String::from_utf8(wire.body).unwrap();
    let with_extra = xml.replace(
        "<xrd:userId>",
        "<wsa:MessageID xmlns:wsa=\"http://www.w3.org/2005/08/addressing\">\
         uuid:x</wsa:MessageID><xrd:userId>",
    );
    let message = parse_message(with_extra.as_bytes(), Some("text/xml"), &config).unwrap();
    assert_eq!(message.header.id, "ID11234");
}
