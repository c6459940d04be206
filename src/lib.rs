//! X-Road SOAP message model and envelope codec
//!
//! Typed identifiers, protocol headers and messages for the X-Road data
//! exchange layer, with a codec that turns them into SOAP 1.1 envelopes
//! (plain or multipart with attachments) and back.
//!
//! # Features
//!
//! - Typed member, subsystem, service and security server identifiers
//! - Protocol header model covering the v6 and v7 schema revisions
//! - Envelope serialization in exact wire order, MTOM-style attachments
//! - Tolerant parsing with a strict malformed/schema-mismatch distinction
//! - Whole-message validation reporting every violation at once
//! - REST-to-SOAP bridging for mixed consumer/provider pairs
//!
//! # Example
//!
//! ```ignore
//! use xrd_soap::{CodecConfig, MemberId, Message, ServiceId};
//! use xrd_soap::{parse_message, serialize_message};
//!
//! let config = CodecConfig::default();
//! let client = MemberId::subsystem("FI", "GOV", "1710128-9", "TestSystem")?;
//! let owner = MemberId::subsystem("FI", "GOV", "0245437-2", "TestService")?;
//! let service = ServiceId::service(owner, "getRandom")?.with_version("v1")?;
//!
//! let request = Message::new_request(client, service, &config)?;
//! let wire = serialize_message(&request, &config)?;
//! let parsed = parse_message(&wire.body, Some(&wire.content_type), &config)?;
//! assert_eq!(parsed, request);
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod identifier;
pub mod message;
pub mod parser;
pub mod rest;
pub mod serializer;
pub mod validator;

pub use config::CodecConfig;
pub use error::{
    soap_fault_response, FormatError, ParseError, SerializationError, ValidationError, Violation,
    ViolationCode,
};
pub use header::{MessageHeader, ProtocolVersion, RequestHash};
pub use identifier::{MemberId, ObjectType, SecurityServerId, ServiceId, ServiceOwner};
pub use message::{Attachment, Message, MessageKind, Payload};
pub use parser::parse_message;
pub use rest::{unwrap_rest_request, wrap_rest_response, RestRequest};
pub use serializer::{serialize_message, write_envelope, SerializedMessage};
pub use validator::{validate, ValidationResult};
