//! Codec configuration.
//!
//! Everything that used to be a process-wide constant in adapter stacks
//! (default protocol version, namespace prefixes, size limits) is carried
//! in an explicit value threaded into every serialize/parse call.

use crate::header::ProtocolVersion;

use serde::{Deserialize, Serialize};

/// Configuration threaded through serialization and parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Protocol revision used when building messages without an explicit one
    pub default_protocol_version: ProtocolVersion,

    /// Prefix bound to the SOAP envelope namespace
    pub soap_prefix: String,

    /// Prefix bound to the X-Road header namespace
    pub xrd_prefix: String,

    /// Prefix bound to the identifiers namespace
    pub id_prefix: String,

    /// REST bridge: largest response body (bytes) inlined into the envelope
    /// instead of being carried as an attachment
    pub inline_body_limit: usize,

    /// Chunk size used when streaming attachment bytes into the output
    pub attachment_chunk_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            default_protocol_version: ProtocolVersion::V6,
            soap_prefix: "SOAP-ENV".to_string(),
            xrd_prefix: "xrd".to_string(),
            id_prefix: "id".to_string(),
            inline_body_limit: 65_536, // 64KB
            attachment_chunk_size: 8_192,
        }
    }
}

impl CodecConfig {
    /// Load a configuration from a YAML document; absent keys keep their
    /// defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}
