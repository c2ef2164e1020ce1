use std::{fmt, str::FromStr};

use super::ProtocolError;

/// Major version reserved for manifest-negotiation requests.
pub const MANIFEST_MAJOR: u8 = 0xFF;

/// A `(major, minor)` Bolt protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Manifest sentinel `(0xFF, manifest)` rather than a real protocol version.
    pub const fn manifest(manifest: u8) -> Self {
        Self::new(MANIFEST_MAJOR, manifest)
    }

    pub fn is_manifest(&self) -> bool {
        self.major == MANIFEST_MAJOR
    }

    /// Wire form used in replies and offers: `00 00 <minor> <major>`.
    pub fn wire_bytes(&self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    /// Parses `"5.7"`; a bare major (`"3"`) means minor 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());
        let mut parts = s.trim().splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self::new(major, minor))
    }
}

/// One `(major, minor, range)` entry of a legacy client offer.
///
/// `range` extends the offer down to minor `minor - range` of the same major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionOffer {
    pub major: u8,
    pub minor: u8,
    pub range: u8,
}

impl VersionOffer {
    pub const fn new(major: u8, minor: u8, range: u8) -> Self {
        Self {
            major,
            minor,
            range,
        }
    }

    /// Whether `version` falls in `[minor - range, minor]` of this offer's major.
    pub fn covers(&self, version: ProtocolVersion) -> bool {
        version.major == self.major
            && version.minor <= self.minor
            && version.minor >= self.minor.saturating_sub(self.range)
    }
}
