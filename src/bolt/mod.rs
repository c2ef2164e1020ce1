//! Bolt protocol descriptors.
//!
//! A [`BoltProtocol`] describes everything version specific the stub server
//! needs once a connection has agreed on a protocol version:
//!
//! - the canonical version plus the equivalent versions it also accepts,
//! - the handshake capabilities (minor negotiation, range negotiation,
//!   highest manifest version),
//! - the feature flag bytes offered during manifest negotiation,
//! - the message tag tables used to translate between wire structures and
//!   named messages, and the automatic responses the protocol mandates.
//!
//! Descriptors are immutable once built. Use [`get_bolt_protocol`] to look one
//! up by version.
mod messages;
mod version;

use std::fmt;

use thiserror::Error;

use crate::{
    packstream::{Structure, Value},
    util::hex_repr,
};

use messages::MessageTable;

pub use version::{MANIFEST_MAJOR, ProtocolVersion, VersionOffer};

pub const DEFAULT_SERVER_AGENT: &str = "Neo4j/5.26.0";

/// Connection id reported in automatic HELLO responses.
pub const AUTO_CONNECTION_ID: &str = "bolt-123456789";

/// Versions [`get_bolt_protocol`] knows about.
pub const SUPPORTED_VERSIONS: &[ProtocolVersion] = &[
    ProtocolVersion::new(1, 0),
    ProtocolVersion::new(2, 0),
    ProtocolVersion::new(3, 0),
    ProtocolVersion::new(4, 0),
    ProtocolVersion::new(4, 1),
    ProtocolVersion::new(4, 2),
    ProtocolVersion::new(4, 3),
    ProtocolVersion::new(4, 4),
    ProtocolVersion::new(5, 0),
    ProtocolVersion::new(5, 1),
    ProtocolVersion::new(5, 2),
    ProtocolVersion::new(5, 3),
    ProtocolVersion::new(5, 4),
    ProtocolVersion::new(5, 5),
    ProtocolVersion::new(5, 6),
    ProtocolVersion::new(5, 7),
    ProtocolVersion::new(5, 8),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported bolt version {0}")]
    UnsupportedVersion(ProtocolVersion),

    #[error("invalid bolt version '{0}', expected MAJOR.MINOR")]
    InvalidVersion(String),

    #[error("invalid feature flags ({0}), every byte but the last needs the 0x80 bit")]
    InvalidFeatures(String),

    #[error("unknown server message {name} for bolt {version}")]
    UnknownServerMessage {
        name: String,
        version: ProtocolVersion,
    },

    #[error("unknown client message tag 0x{tag:02X} for bolt {version}")]
    UnknownClientMessage { tag: u8, version: ProtocolVersion },
}

/// Decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub name: &'static str,
    pub fields: Vec<Value>,
}

/// Server response as described by a test script, before tag translation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerLine {
    pub name: String,
    pub fields: Vec<Value>,
}

impl ServerLine {
    pub fn new(name: impl Into<String>, fields: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

fn fmt_line(f: &mut fmt::Formatter<'_>, name: &str, fields: &[Value]) -> fmt::Result {
    write!(f, "{name}")?;
    for field in fields {
        write!(f, " {field}")?;
    }
    Ok(())
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_line(f, self.name, &self.fields)
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_line(f, &self.name, &self.fields)
    }
}

#[derive(Debug, Clone)]
pub struct BoltProtocol {
    version: ProtocolVersion,
    equivalent_versions: Vec<ProtocolVersion>,
    features: Vec<u8>,
    minor_negotiation: bool,
    range_negotiation: bool,
    max_manifest_version: u8,
    client_messages: MessageTable,
    server_messages: MessageTable,
    server_agent: String,
}

/// Looks up the descriptor for `version`.
///
/// `features` are the flag bytes offered in manifest negotiation; `None`
/// offers no features (`[0x00]`).
pub fn get_bolt_protocol(
    version: ProtocolVersion,
    features: Option<Vec<u8>>,
) -> Result<BoltProtocol, ProtocolError> {
    let (major, minor) = (version.major, version.minor);
    let client_messages = match (major, minor) {
        (1 | 2, 0) => messages::V1_CLIENT_MESSAGES,
        (3, 0) => messages::V3_CLIENT_MESSAGES,
        (4, 0..=2) => messages::V4_CLIENT_MESSAGES,
        (4, 3..=4) | (5, 0) => messages::V4_3_CLIENT_MESSAGES,
        (5, 1..=3) => messages::V5_1_CLIENT_MESSAGES,
        (5, 4..=8) => messages::V5_4_CLIENT_MESSAGES,
        _ => return Err(ProtocolError::UnsupportedVersion(version)),
    };

    let features = match features {
        Some(features) => validate_features(features)?,
        None => vec![0x00],
    };
    let equivalent_versions = match (major, minor) {
        (4, 2) => vec![ProtocolVersion::new(4, 1)],
        _ => vec![],
    };

    Ok(BoltProtocol {
        version,
        equivalent_versions,
        features,
        minor_negotiation: major >= 4,
        range_negotiation: (major, minor) >= (4, 3),
        max_manifest_version: if (major, minor) >= (5, 7) { 1 } else { 0 },
        client_messages,
        server_messages: messages::SERVER_MESSAGES,
        server_agent: DEFAULT_SERVER_AGENT.to_string(),
    })
}

/// Feature flags use the high bit of a byte to announce another byte.
fn validate_features(features: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
    let well_formed = match features.split_last() {
        Some((last, rest)) => last & 0x80 == 0 && rest.iter().all(|b| b & 0x80 != 0),
        None => false,
    };
    if !well_formed {
        return Err(ProtocolError::InvalidFeatures(hex_repr(&features)));
    }
    Ok(features)
}

impl BoltProtocol {
    pub fn with_server_agent(mut self, agent: impl Into<String>) -> Self {
        self.server_agent = agent.into();
        self
    }

    /// Replaces the equivalent versions. Their order is the order in which
    /// the handshake tries them.
    pub fn with_equivalent_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.equivalent_versions = versions;
        self
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn equivalent_versions(&self) -> &[ProtocolVersion] {
        &self.equivalent_versions
    }

    pub fn features(&self) -> &[u8] {
        &self.features
    }

    pub fn supports_minor_negotiation(&self) -> bool {
        self.minor_negotiation
    }

    pub fn supports_range_negotiation(&self) -> bool {
        self.range_negotiation
    }

    /// `0` means no manifest negotiation.
    pub fn max_manifest_version(&self) -> u8 {
        self.max_manifest_version
    }

    pub fn server_agent(&self) -> &str {
        &self.server_agent
    }

    pub fn translate_server_line(&self, line: &ServerLine) -> Result<Structure, ProtocolError> {
        let tag = messages::tag_of(self.server_messages, &line.name).ok_or_else(|| {
            ProtocolError::UnknownServerMessage {
                name: line.name.clone(),
                version: self.version,
            }
        })?;
        Ok(Structure::new(tag, line.fields.clone()))
    }

    pub fn server_message_name(&self, tag: u8) -> Option<&'static str> {
        messages::name_of(self.server_messages, tag)
    }

    pub fn translate_structure(&self, structure: Structure) -> Result<Message, ProtocolError> {
        let name = messages::name_of(self.client_messages, structure.tag).ok_or(
            ProtocolError::UnknownClientMessage {
                tag: structure.tag,
                version: self.version,
            },
        )?;
        Ok(Message {
            name,
            fields: structure.fields,
        })
    }

    /// Response the protocol mandates for `message` when no script line
    /// says otherwise.
    pub fn auto_response(&self, message: &Message) -> Structure {
        let metadata = match message.name {
            "HELLO" | "INIT" => vec![
                ("server".to_string(), Value::from(self.server_agent.as_str())),
                ("connection_id".to_string(), Value::from(AUTO_CONNECTION_ID)),
            ],
            _ => vec![],
        };
        Structure::new(self.success_tag(), vec![Value::Map(metadata)])
    }

    fn success_tag(&self) -> u8 {
        messages::tag_of(self.server_messages, "SUCCESS").unwrap_or(0x70)
    }
}
