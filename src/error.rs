//! Error types for the X-Road SOAP codec.
//!
//! The taxonomy separates wire-level failures (`ParseError`) from semantic
//! failures (`ValidationError`). A `ParseError::Malformed` input cannot be
//! answered at the protocol level; everything else can be rendered into a
//! well-formed SOAP fault with [`soap_fault_response`].

use crate::header::ProtocolVersion;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed identifier part or field value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct FormatError {
    /// Local name of the offending element, e.g. `memberCode`.
    pub field: &'static str,
    pub reason: String,
}

impl FormatError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure to parse an inbound envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not well-formed XML, or not a SOAP/X-Road document at all.
    ///
    /// Non-recoverable at the protocol level; the transport layer has to
    /// fail the request.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// A recognized X-Road header namespace with elements that are missing
    /// or invalid for the declared protocol version.
    ///
    /// Recoverable: convertible into a SOAP fault naming each field.
    #[error("header does not match the {version} schema: {}", fields.join(", "))]
    SchemaMismatch {
        version: ProtocolVersion,
        /// Names of the missing or invalid header fields.
        fields: Vec<String>,
    },
}

impl ParseError {
    /// Render this error as a SOAP 1.1 fault envelope.
    pub fn to_soap_fault(&self) -> String {
        match self {
            ParseError::Malformed(reason) => {
                soap_fault_response("SOAP-ENV:Client", reason, &[])
            }
            ParseError::SchemaMismatch { fields, .. } => {
                let violations: Vec<Violation> = fields
                    .iter()
                    .map(|f| {
                        let code = if f == "protocolVersion" {
                            ViolationCode::UnknownProtocolVersion
                        } else {
                            ViolationCode::MissingField
                        };
                        Violation::for_field(
                            code,
                            f.clone(),
                            format!("header field \"{f}\" is missing or invalid"),
                        )
                    })
                    .collect();
                soap_fault_response("SOAP-ENV:Client", &self.to_string(), &violations)
            }
        }
    }
}

/// Failure to serialize a message.
///
/// Serializing a message that does not pass validation is a programming
/// error on the producer side; it is fatal to the current request only.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("message failed validation before serialization: {0}")]
    InvalidMessage(#[from] ValidationError),

    #[error("payload fragment is not well-formed XML: {0}")]
    MalformedPayload(String),

    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable codes for semantic violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationCode {
    /// Protocol version element does not match the header schema in use
    UnknownProtocolVersion,
    /// Mandatory header field missing or empty
    MissingField,
    /// Identifier part violates X-Road identifier character rules
    InvalidIdentifier,
    /// Body wrapper element does not match the service code
    WrapperMismatch,
    /// Content id referenced from the body has no attachment part
    MissingAttachment,
    /// Attachment part is not referenced anywhere in the body
    OrphanAttachment,
    /// Request body cannot be interpreted as a REST call descriptor
    InvalidRestDescriptor,
}

impl ViolationCode {
    /// Get the string code for this violation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownProtocolVersion => "UNKNOWN_PROTOCOL_VERSION",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::WrapperMismatch => "WRAPPER_MISMATCH",
            Self::MissingAttachment => "MISSING_ATTACHMENT",
            Self::OrphanAttachment => "ORPHAN_ATTACHMENT",
            Self::InvalidRestDescriptor => "INVALID_REST_DESCRIPTOR",
        }
    }
}

/// A single field-level problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    /// Human-readable message
    pub message: String,
    /// Header field path or content id the violation refers to
    pub field: Option<String>,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn for_field(
        code: ViolationCode,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Aggregate of every semantic problem found in a message.
///
/// Validation reports all violations, not just the first, so callers can
/// produce a complete diagnostic in a single fault response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message validation failed with {} violation(s)", violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Render this error as a SOAP 1.1 fault envelope enumerating every
    /// violation.
    pub fn to_soap_fault(&self) -> String {
        let summary = self
            .violations
            .iter()
            .map(|v| format!("[{}] {}", v.code.as_str(), v.message))
            .collect::<Vec<_>>()
            .join("; ");
        soap_fault_response("SOAP-ENV:Client", &summary, &self.violations)
    }
}

/// Generate a SOAP 1.1 fault envelope for the given violations.
///
/// The result is always well-formed, whatever the inbound request looked
/// like, so a dispatcher can answer any rejected request with it.
pub fn soap_fault_response(faultcode: &str, faultstring: &str, violations: &[Violation]) -> String {
    let detail = violations
        .iter()
        .map(|v| match &v.field {
            Some(field) => format!(
                "        <violation code=\"{}\" field=\"{}\">{}</violation>",
                v.code.as_str(),
                xml_escape(field),
                xml_escape(&v.message)
            ),
            None => format!(
                "        <violation code=\"{}\">{}</violation>",
                v.code.as_str(),
                xml_escape(&v.message)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
  <SOAP-ENV:Body>
    <SOAP-ENV:Fault>
      <faultcode>{}</faultcode>
      <faultstring>{}</faultstring>
      <detail>
{}
      </detail>
    </SOAP-ENV:Fault>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        xml_escape(faultcode),
        xml_escape(faultstring),
        detail
    )
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
