//! X-Road protocol header model.
//!
//! The two header schema revisions are modeled as a closed variant set with
//! per-variant field tables. The tables drive both validation and the order
//! in which header elements are written to the wire, so the two can never
//! drift apart.

use crate::error::{ValidationError, Violation, ViolationCode};
use crate::identifier::{MemberId, SecurityServerId, ServiceId};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// SOAP 1.1 envelope namespace URI.
pub const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// X-Road v6 protocol header namespace URI.
pub const XRD_V6_NS: &str = "http://x-road.eu/xsd/xroad.xsd";
/// X-Road v7 protocol header namespace URI.
pub const XRD_V7_NS: &str = "http://x-road.eu/xsd/xroad7.xsd";

/// X-Road message protocol header schema revision.
///
/// The revisions are structurally incompatible: v7 moves the header to its
/// own namespace, renames the message id element from `id` to `requestId`
/// and requires the client to be identified at subsystem level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v6")]
    V6,
    #[serde(rename = "v7")]
    V7,
}

impl ProtocolVersion {
    /// Namespace the header elements of this revision live in.
    pub fn xrd_namespace(self) -> &'static str {
        match self {
            Self::V6 => XRD_V6_NS,
            Self::V7 => XRD_V7_NS,
        }
    }

    /// Recognize a header revision from its namespace URI.
    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            XRD_V6_NS => Some(Self::V6),
            XRD_V7_NS => Some(Self::V7),
            _ => None,
        }
    }

    /// Text content of the `protocolVersion` header element.
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::V6 => "4.0",
            Self::V7 => "7.0",
        }
    }

    /// Parse the `protocolVersion` element text.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "4.0" => Some(Self::V6),
            "7.0" => Some(Self::V7),
            _ => None,
        }
    }

    /// Local name of the message id element.
    pub fn id_field(self) -> &'static str {
        match self {
            Self::V6 => "id",
            Self::V7 => "requestId",
        }
    }

    /// Header fields that must be present and non-empty for this revision.
    ///
    /// The order is the wire order; optional fields interleave at fixed
    /// positions (securityServer and userId before the id element, issue
    /// and requestHash after it).
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::V6 => &["client", "service", "id", "protocolVersion"],
            Self::V7 => &["client", "service", "requestId", "protocolVersion"],
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V6 => f.write_str("v6"),
            Self::V7 => f.write_str("v7"),
        }
    }
}

/// Hash of the request message, echoed back in response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHash {
    /// Digest algorithm URI, e.g. `http://www.w3.org/2001/04/xmlenc#sha512`
    pub algorithm_id: String,
    /// Base64 encoded digest
    pub digest: String,
}

/// The protocol header of a single X-Road message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Consumer that sent the request
    pub client: MemberId,
    /// Service the request is addressed to
    pub service: ServiceId,
    /// Security server the consumer routes through, if pinned
    pub security_server: Option<SecurityServerId>,
    /// End user on whose behalf the request was made
    pub user_id: Option<String>,
    /// Unique message id of this exchange
    pub id: String,
    /// Ticket or case identifier in the client's system
    pub issue: Option<String>,
    /// Digest of the request, set on responses
    pub request_hash: Option<RequestHash>,
    pub protocol_version: ProtocolVersion,
}

impl MessageHeader {
    /// Build a header, rejecting combinations that can never validate for
    /// the given protocol revision.
    pub fn new(
        protocol_version: ProtocolVersion,
        client: MemberId,
        service: ServiceId,
        id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        let mut violations = Vec::new();
        if id.trim().is_empty() {
            violations.push(Violation::for_field(
                ViolationCode::MissingField,
                protocol_version.id_field(),
                format!("\"{}\" must not be empty", protocol_version.id_field()),
            ));
        }
        if protocol_version == ProtocolVersion::V7 && client.subsystem_code().is_none() {
            violations.push(Violation::for_field(
                ViolationCode::MissingField,
                "client.subsystemCode",
                "v7 requires the client to be identified at subsystem level",
            ));
        }
        if !violations.is_empty() {
            return Err(ValidationError::new(violations));
        }
        Ok(Self {
            client,
            service,
            security_server: None,
            user_id: None,
            id,
            issue: None,
            request_hash: None,
            protocol_version,
        })
    }

    /// Empty values count as absent, matching how the codec treats empty
    /// optional header elements on the wire.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.user_id = (!user_id.trim().is_empty()).then_some(user_id);
        self
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        let issue = issue.into();
        self.issue = (!issue.trim().is_empty()).then_some(issue);
        self
    }

    pub fn with_security_server(mut self, server: SecurityServerId) -> Self {
        self.security_server = Some(server);
        self
    }

    pub fn with_request_hash(mut self, hash: RequestHash) -> Self {
        self.request_hash = Some(hash);
        self
    }

    /// Fields mandatory for the given protocol revision.
    pub fn required_fields(protocol_version: ProtocolVersion) -> &'static [&'static str] {
        protocol_version.required_fields()
    }

    /// Generate a unique message id.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}
