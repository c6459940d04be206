//! Aggregate message validation.
//!
//! Validation is a pure function of the message: it never mutates its input
//! and reports every violation it finds, not just the first, so one fault
//! response can carry the complete diagnosis. Running it twice on the same
//! message yields the same result.

use crate::error::{ValidationError, Violation, ViolationCode};
use crate::header::ProtocolVersion;
use crate::identifier::check_part;
use crate::message::{Message, Payload};

use tracing::trace;

/// Outcome of validating a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn add(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// Convert into the error carrying all collected violations.
    pub fn into_error(self) -> ValidationError {
        ValidationError::new(self.violations)
    }

    /// `Ok(())` when clean, the aggregated error otherwise.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }
}

/// Validate a message against its own protocol revision.
///
/// Covers the header field rules, the identifier character rules, the body
/// wrapper naming convention and the pairing between body references and
/// attachment parts.
pub fn validate(message: &Message) -> ValidationResult {
    let mut result = ValidationResult::default();
    let header = &message.header;
    let version = header.protocol_version;

    if header.id.trim().is_empty() {
        result.add(Violation::for_field(
            ViolationCode::MissingField,
            version.id_field(),
            format!("\"{}\" must not be empty", version.id_field()),
        ));
    }

    if version == ProtocolVersion::V7 && header.client.subsystem_code().is_none() {
        result.add(Violation::for_field(
            ViolationCode::MissingField,
            "client.subsystemCode",
            "v7 requires the client to be identified at subsystem level",
        ));
    }

    check_identifier_parts(&mut result, "client", &header.client.xml_elements());
    check_identifier_parts(&mut result, "service", &header.service.xml_elements());
    if let Some(server) = &header.security_server {
        check_identifier_parts(&mut result, "securityServer", &server.xml_elements());
    }

    // Only messages that came off the wire carry a recorded wrapper name;
    // locally built ones derive it and cannot mismatch
    if let Some(wrapper) = &message.wrapper_name {
        let expected = message.expected_wrapper();
        if *wrapper != expected {
            result.add(Violation::for_field(
                ViolationCode::WrapperMismatch,
                wrapper.clone(),
                format!("body wrapper \"{wrapper}\" does not match expected \"{expected}\""),
            ));
        }
    }

    check_attachment_pairing(&mut result, message);

    trace!(violations = result.violations.len(), "validated message");
    result
}

fn check_identifier_parts(
    result: &mut ValidationResult,
    path: &str,
    elements: &[(&'static str, &str)],
) {
    for (name, value) in elements {
        if let Err(e) = check_part(name, value) {
            result.add(Violation::for_field(
                ViolationCode::InvalidIdentifier,
                format!("{path}.{name}"),
                e.to_string(),
            ));
        }
    }
}

fn check_attachment_pairing(result: &mut ValidationResult, message: &Message) {
    let referenced = message.referenced_content_ids();

    for cid in &referenced {
        if message.attachment(cid).is_none() {
            result.add(Violation::for_field(
                ViolationCode::MissingAttachment,
                cid.clone(),
                format!("body references attachment \"{cid}\" but no such part is present"),
            ));
        }
    }
    for attachment in &message.attachments {
        let cid = attachment.content_id();
        if !referenced.iter().any(|r| r == cid) {
            // An empty body cannot reference anything, so every part is loose
            let detail = match message.body {
                Payload::Empty => "the body is empty",
                Payload::Xml(_) => "the body never references it",
            };
            result.add(Violation::for_field(
                ViolationCode::OrphanAttachment,
                cid.to_string(),
                format!("attachment \"{cid}\" is present but {detail}"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MessageHeader;
    use crate::identifier::{MemberId, ServiceId};
    use crate::message::Attachment;

    fn request() -> Message {
        let client = MemberId::subsystem("FI", "GOV", "1710128-9", "TestSystem").unwrap();
        let owner = MemberId::subsystem("FI", "GOV", "0245437-2", "TestService").unwrap();
        let service = ServiceId::service(owner, "getRandom").unwrap();
        let header =
            MessageHeader::new(ProtocolVersion::V6, client, service, "ID11234").unwrap();
        Message::request(header, Payload::Empty)
    }

    #[test]
    fn test_valid_message_passes() {
        let result = validate(&request());
        assert!(!result.has_violations());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_empty_id_reported() {
        let mut message = request();
        message.header.id = "   ".to_string();
        let result = validate(&message);
        assert_eq!(result.violations().len(), 1);
        assert_eq!(result.violations()[0].code, ViolationCode::MissingField);
        assert_eq!(result.violations()[0].field.as_deref(), Some("id"));
    }

    #[test]
    fn test_v7_member_level_client_reported() {
        let mut message = request();
        message.header.protocol_version = ProtocolVersion::V7;
        message.header.client = MemberId::member("FI", "GOV", "1710128-9").unwrap();
        let result = validate(&message);
        assert!(result
            .violations()
            .iter()
            .any(|v| v.field.as_deref() == Some("client.subsystemCode")));
    }

    #[test]
    fn test_wrapper_mismatch_reported() {
        let mut message = request();
        message.wrapper_name = Some("somethingElseRequest".to_string());
        let result = validate(&message);
        assert_eq!(result.violations().len(), 1);
        assert_eq!(
            result.violations()[0].code,
            ViolationCode::WrapperMismatch
        );
    }

    #[test]
    fn test_recorded_matching_wrapper_passes() {
        let mut message = request();
        message.wrapper_name = Some("getRandomRequest".to_string());
        assert!(!validate(&message).has_violations());
    }

    #[test]
    fn test_attachment_pairing_both_directions() {
        // Body references att1 and att2 but only att1 and att3 are present:
        // att2 is missing, att3 is an orphan
        let mut message = request();
        message.body = Payload::Xml(
            r#"<data><a href="cid:att1"/><b href="cid:att2"/></data>"#.to_string(),
        );
        let message = message
            .with_attachment(Attachment::new("att1", "application/pdf", b"%PDF".to_vec()))
            .with_attachment(Attachment::new("att3", "text/plain", b"x".to_vec()));

        let result = validate(&message);
        let missing: Vec<_> = result
            .violations()
            .iter()
            .filter(|v| v.code == ViolationCode::MissingAttachment)
            .collect();
        let orphans: Vec<_> = result
            .violations()
            .iter()
            .filter(|v| v.code == ViolationCode::OrphanAttachment)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].field.as_deref(), Some("att2"));
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].field.as_deref(), Some("att3"));
    }

    #[test]
    fn test_unreferenced_attachment_with_empty_body() {
        let message =
            request().with_attachment(Attachment::new("att1", "text/plain", b"x".to_vec()));
        let result = validate(&message);
        assert_eq!(result.violations().len(), 1);
        assert_eq!(
            result.violations()[0].code,
            ViolationCode::OrphanAttachment
        );
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut message = request();
        message.header.id = String::new();
        message.wrapper_name = Some("wrong".to_string());
        let first = validate(&message);
        let second = validate(&message);
        assert_eq!(first, second);
    }

    #[test]
    fn test_all_violations_collected_at_once() {
        let mut message = request();
        message.header.id = String::new();
        message.wrapper_name = Some("wrong".to_string());
        let message =
            message.with_attachment(Attachment::new("loose", "text/plain", b"x".to_vec()));
        let err = validate(&message).into_result().unwrap_err();
        assert_eq!(err.violations.len(), 3);
    }
}
