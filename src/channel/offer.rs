//! Fixed-layout handshake records.
//!
//! Every version on the handshake wire is four bytes, `00 <range> <minor> <major>`.
//! The records are plain `u8` structs encoded with the same big-endian,
//! fixed-int bincode configuration used for the rest of the stub's binary
//! layouts, so no length prefixes ever appear.
use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_to_vec,
    error::{DecodeError, EncodeError},
};

use crate::bolt::{ProtocolVersion, VersionOffer};

use super::handshake::ManifestVersion;

pub(crate) const OFFER_SIZE: usize = 4;
pub(crate) const OFFER_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct WireVersion {
    reserved: u8,
    range: u8,
    minor: u8,
    major: u8,
}

impl From<ProtocolVersion> for WireVersion {
    fn from(value: ProtocolVersion) -> Self {
        Self {
            reserved: 0,
            range: 0,
            minor: value.minor,
            major: value.major,
        }
    }
}

/// Server side of a manifest handshake, minus the trailing feature bytes.
#[derive(Debug, Encode)]
struct ManifestOffer {
    manifest: WireVersion,
    count: u8,
    offered: WireVersion,
}

#[derive(Clone, Copy)]
pub(crate) struct HandshakeCodec {
    config: Configuration<BigEndian, Fixint>,
}

impl HandshakeCodec {
    pub(crate) fn new() -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self { config }
    }

    /// Splits a 16 byte client offer into its four version offers, highest
    /// priority first.
    pub(crate) fn decode_offers(&self, bytes: &[u8]) -> Result<Vec<VersionOffer>, DecodeError> {
        bytes
            .chunks_exact(OFFER_SIZE)
            .take(OFFER_COUNT)
            .map(|chunk| {
                let (raw, _): (WireVersion, usize) = decode_from_slice(chunk, self.config)?;
                Ok(VersionOffer::new(raw.major, raw.minor, raw.range))
            })
            .collect()
    }

    /// Legacy reply `00 00 <minor> <major>`.
    pub(crate) fn encode_version(&self, version: ProtocolVersion) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(WireVersion::from(version), self.config)
    }

    /// `00 00 <manifest> FF`, the version count, the offered version, then
    /// the feature bytes verbatim.
    pub(crate) fn encode_manifest_offer(
        &self,
        manifest: ManifestVersion,
        offered: ProtocolVersion,
        features: &[u8],
    ) -> Result<Vec<u8>, EncodeError> {
        let header = ManifestOffer {
            manifest: ProtocolVersion::manifest(manifest.number()).into(),
            count: 1,
            offered: offered.into(),
        };
        let mut out = encode_to_vec(header, self.config)?;
        out.extend_from_slice(features);
        Ok(out)
    }
}
