//! Bolt preamble and version negotiation.
//!
//! A connection opens with the magic preamble `60 60 B0 17`, followed by the
//! version handshake in one of three dialects:
//!
//! - **Legacy**: the client offers four `(major, minor, range)` triples in 16
//!   bytes and the server answers `00 00 <minor> <major>`, or `00 00 00 00`
//!   when nothing fits.
//! - **Manifest v1**: the client offers major `0xFF`; the server answers with
//!   its versions and feature flags and the client echoes back its pick.
//! - **Fixed**: the server answers with literal configured bytes, used to
//!   imitate broken or hostile servers.
//!
//! # State machine
//!
//! The manifest dialect is a short back-and-forth. Its progress lives in a
//! [`HandshakeStep`] kept on the channel and advanced one read at a time, so
//! a handshake interrupted by a failed read resumes where it stopped on the
//! next [`Channel::version_handshake`] call.
//!
//! ```text
//! INIT --magic ok--> OFFER_READ --ordinary--> LEGACY_REPLIED
//!                              \--none-----> ABORTED
//!                              \--manifest v1--> VersionPick -> FirstFeature -> Features -> DONE
//! ```
use std::{thread, time::Duration};

use log::debug;

use crate::{
    bolt::{BoltProtocol, MANIFEST_MAJOR, ProtocolVersion, VersionOffer},
    error::StubError,
    transport::Wire,
    util::hex_repr,
};

use super::{
    Channel,
    offer::{OFFER_COUNT, OFFER_SIZE},
};

pub const MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

const ABORT: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Feature flag bytes with this bit set are followed by another flag byte.
const FEATURE_CONTINUATION: u8 = 0x80;

/// How a channel answers the client's version offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Negotiate per protocol rules. A pinned `manifest` only accepts that
    /// manifest version and rejects ordinary offers, unless it is `0`.
    Dynamic { manifest: Option<u8> },
    /// Answer with `response` verbatim and, if set, expect the client to
    /// follow up with exactly `expected_reply`.
    Fixed {
        response: Vec<u8>,
        expected_reply: Option<Vec<u8>>,
    },
}

impl Default for HandshakeMode {
    fn default() -> Self {
        HandshakeMode::Dynamic { manifest: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub mode: HandshakeMode,
    /// Slept once, right before the server's first handshake write.
    pub delay: Option<Duration>,
}

/// Manifest negotiation versions the stub implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    V1,
}

impl ManifestVersion {
    pub fn number(self) -> u8 {
        match self {
            ManifestVersion::V1 => 1,
        }
    }

    fn handler<W: Wire>(self) -> fn(&mut Channel<W>) -> Result<(), StubError> {
        match self {
            ManifestVersion::V1 => Channel::<W>::manifest_v1_offer,
        }
    }
}

impl TryFrom<u8> for ManifestVersion {
    type Error = StubError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ManifestVersion::V1),
            other => Err(StubError::Unimplemented(format!(
                "Handshake manifest version {other}"
            ))),
        }
    }
}

/// Outcome of the offer phase.
enum Negotiated {
    Legacy(ProtocolVersion),
    Manifest(ManifestVersion),
}

/// Next step of an in-progress manifest v1 handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Offer sent, waiting for the client's 4 byte version pick.
    ManifestV1VersionPick,
    /// Waiting for the first feature flag byte.
    ManifestV1FirstFeature { client_pick: Vec<u8> },
    /// Reading feature flag bytes until one has the continuation bit clear.
    ManifestV1Features {
        client_pick: Vec<u8>,
        features: Vec<u8>,
    },
}

/// Tests one client offer against `protocol`.
///
/// Manifest requests yield the sentinel `(0xFF, manifest)`; ordinary offers
/// yield the canonical version or the first matching equivalent version.
pub fn check_offer(
    protocol: &BoltProtocol,
    manifest: Option<u8>,
    offer: VersionOffer,
) -> Result<Option<ProtocolVersion>, StubError> {
    if offer.major == MANIFEST_MAJOR {
        if offer.range != 0 {
            return Err(StubError::Unimplemented(
                "Handshake range negotiation".to_string(),
            ));
        }
        let accepted = match manifest {
            None => {
                let max = protocol.max_manifest_version();
                max > 0 && offer.minor <= max
            }
            Some(pinned) => offer.minor == pinned,
        };
        return Ok(accepted.then(|| ProtocolVersion::manifest(offer.minor)));
    }
    if manifest.is_some_and(|m| m != 0) {
        return Ok(None);
    }

    let mut offer = offer;
    if !protocol.supports_range_negotiation() {
        offer.range = 0;
    }
    if !protocol.supports_minor_negotiation() {
        offer.minor = 0;
    }

    let canonical = protocol.version();
    let accepted = std::iter::once(&canonical)
        .chain(protocol.equivalent_versions())
        .find(|version| offer.covers(**version))
        .copied();
    Ok(accepted)
}

/// First offer, in client priority order, that `protocol` accepts.
pub fn select_offer(
    protocol: &BoltProtocol,
    manifest: Option<u8>,
    offers: &[VersionOffer],
) -> Result<Option<ProtocolVersion>, StubError> {
    for offer in offers {
        if let Some(version) = check_offer(protocol, manifest, *offer)? {
            return Ok(Some(version));
        }
    }
    Ok(None)
}

impl<W: Wire> Channel<W> {
    /// Reads and checks the 4 byte magic preamble.
    pub fn preamble(&mut self) -> Result<(), StubError> {
        let request = self.wire.read(MAGIC.len())?;
        self.log(format_args!("C: <MAGIC> {}", hex_repr(&request)));
        if request != MAGIC {
            return Err(StubError::ServerExit(format!(
                "Expected the magic header 6060B017, received {}",
                hex_repr(&request)
            )));
        }
        Ok(())
    }

    /// Runs, or resumes, the version handshake.
    pub fn version_handshake(&mut self) -> Result<(), StubError> {
        if self.handshake_step.is_some() {
            return self.resume_handshake();
        }

        if let HandshakeMode::Fixed {
            response,
            expected_reply,
        } = &self.handshake_mode
        {
            let (response, expected_reply) = (response.clone(), expected_reply.clone());
            return self.fixed_handshake(&response, expected_reply.as_deref());
        }

        let accepted = self.negotiate_offer()?;
        let negotiated = if accepted.is_manifest() {
            Negotiated::Manifest(ManifestVersion::try_from(accepted.minor)?)
        } else {
            Negotiated::Legacy(accepted)
        };

        self.delay_handshake();
        match negotiated {
            Negotiated::Legacy(version) => self.legacy_reply(version),
            Negotiated::Manifest(manifest) => manifest.handler::<W>()(self),
        }
    }

    /// Whether a multi-step handshake is waiting to be resumed.
    pub fn is_handshake_in_progress(&self) -> bool {
        self.handshake_step.is_some()
    }

    fn pinned_manifest(&self) -> Option<u8> {
        match self.handshake_mode {
            HandshakeMode::Dynamic { manifest } => manifest,
            HandshakeMode::Fixed { .. } => None,
        }
    }

    fn negotiate_offer(&mut self) -> Result<ProtocolVersion, StubError> {
        let request = self.wire.read(OFFER_SIZE * OFFER_COUNT)?;
        self.log(format_args!("C: <HANDSHAKE> {}", hex_repr(&request)));

        let manifest = self.pinned_manifest();
        let offers = self.codec.decode_offers(&request)?;
        if let Some(version) = select_offer(&self.protocol, manifest, &offers)? {
            return Ok(version);
        }

        self.abort_handshake();
        let manifest = match manifest {
            Some(pinned) => pinned.to_string(),
            None => format!("<= {}", self.protocol.max_manifest_version()),
        };
        Err(StubError::Script(format!(
            "Failed handshake, stub server talks protocol {} (manifest version {}). \
             Driver sent handshake: {}",
            self.protocol.version(),
            manifest,
            hex_repr(&request)
        )))
    }

    fn legacy_reply(&mut self, version: ProtocolVersion) -> Result<(), StubError> {
        let response = self.codec.encode_version(version)?;
        self.wire.write(&response)?;
        self.wire.send()?;
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(&response)));
        Ok(())
    }

    fn manifest_v1_offer(&mut self) -> Result<(), StubError> {
        let offered = self.protocol.version();
        let offer =
            self.codec
                .encode_manifest_offer(ManifestVersion::V1, offered, self.protocol.features())?;
        self.wire.write(&offer)?;
        self.log(format_args!(
            "S: <HANDSHAKE> 00 00 01 FF [1] {} {}",
            hex_repr(&offered.wire_bytes()),
            hex_repr(self.protocol.features())
        ));
        self.wire.send()?;

        self.handshake_step = Some(HandshakeStep::ManifestV1VersionPick);
        self.resume_handshake()
    }

    fn resume_handshake(&mut self) -> Result<(), StubError> {
        // A failed read leaves the step untouched so the caller can retry.
        while let Some(step) = self.handshake_step.clone() {
            self.handshake_step = self.advance_handshake(step)?;
        }
        Ok(())
    }

    /// Performs at most one read and returns the step that follows.
    fn advance_handshake(&mut self, step: HandshakeStep) -> Result<Option<HandshakeStep>, StubError> {
        match step {
            HandshakeStep::ManifestV1VersionPick => {
                let client_pick = self.wire.read(4)?;
                Ok(Some(HandshakeStep::ManifestV1FirstFeature { client_pick }))
            }
            HandshakeStep::ManifestV1FirstFeature { client_pick } => {
                let features = self.wire.read(1)?;
                Ok(Some(HandshakeStep::ManifestV1Features {
                    client_pick,
                    features,
                }))
            }
            HandshakeStep::ManifestV1Features {
                client_pick,
                mut features,
            } => {
                if features.last().is_some_and(|b| b & FEATURE_CONTINUATION != 0) {
                    features.extend(self.wire.read(1)?);
                    return Ok(Some(HandshakeStep::ManifestV1Features {
                        client_pick,
                        features,
                    }));
                }
                self.handshake_step = None;
                self.verify_manifest_v1(&client_pick, &features)?;
                Ok(None)
            }
        }
    }

    fn verify_manifest_v1(&mut self, client_pick: &[u8], features: &[u8]) -> Result<(), StubError> {
        let offered = self.protocol.version().wire_bytes();
        self.log(format_args!(
            "C: <HANDSHAKE> {} {}",
            hex_repr(client_pick),
            hex_repr(features)
        ));

        if client_pick != offered {
            return Err(StubError::Script(format!(
                "Failed handshake, client picked different version {} than offered {}",
                hex_repr(client_pick),
                hex_repr(&offered)
            )));
        }
        if features != self.protocol.features() {
            return Err(StubError::Script(format!(
                "Failed handshake, client picked different features ({}) than offered ({})",
                hex_repr(features),
                hex_repr(self.protocol.features())
            )));
        }
        Ok(())
    }

    fn fixed_handshake(
        &mut self,
        response: &[u8],
        expected_reply: Option<&[u8]>,
    ) -> Result<(), StubError> {
        let request = self.wire.read(OFFER_SIZE * OFFER_COUNT)?;
        self.log(format_args!("C: <HANDSHAKE> {}", hex_repr(&request)));

        self.delay_handshake();
        self.wire.write(response)?;
        self.wire.send()?;
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(response)));

        let Some(expected) = expected_reply else {
            return Ok(());
        };
        let reply = self.wire.read(expected.len())?;
        self.log(format_args!("C: <HANDSHAKE> {}", hex_repr(&reply)));
        if reply != expected {
            return Err(StubError::ServerExit(format!(
                "Expected the client handshake response {}, received {}",
                hex_repr(expected),
                hex_repr(&reply)
            )));
        }
        Ok(())
    }

    /// Best effort: the client may already have hung up.
    fn abort_handshake(&mut self) {
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(&ABORT)));
        let sent = self.wire.write(&ABORT).and_then(|()| self.wire.send());
        if let Err(e) = sent {
            debug!("ignoring failed handshake abort: {e}");
        }
    }

    fn delay_handshake(&mut self) {
        if let Some(delay) = self.handshake_delay.take() {
            self.log(format_args!(
                "S: <HANDSHAKE DELAY> {}",
                delay.as_secs_f64()
            ));
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        bolt::get_bolt_protocol,
        channel::tests::recorded,
        transport::MemoryWire,
    };

    fn v(major: u8, minor: u8) -> ProtocolVersion {
        ProtocolVersion::new(major, minor)
    }

    fn protocol(version: (u8, u8), features: Option<Vec<u8>>) -> BoltProtocol {
        get_bolt_protocol(v(version.0, version.1), features).unwrap()
    }

    fn offers(triples: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (major, minor, range) in triples {
            out.extend([0, *range, *minor, *major]);
        }
        out.resize(16, 0);
        out
    }

    fn dynamic(input: &[u8], protocol: BoltProtocol) -> Channel<MemoryWire> {
        Channel::new(MemoryWire::new(input), protocol, HandshakeConfig::default())
    }

    fn pinned(input: &[u8], protocol: BoltProtocol, manifest: u8) -> Channel<MemoryWire> {
        let config = HandshakeConfig {
            mode: HandshakeMode::Dynamic {
                manifest: Some(manifest),
            },
            delay: None,
        };
        Channel::new(MemoryWire::new(input), protocol, config)
    }

    #[test]
    fn preamble_accepts_magic() {
        let mut channel = dynamic(&MAGIC, protocol((5, 0), None));
        channel.preamble().unwrap();
    }

    #[test]
    fn preamble_rejects_anything_else() {
        for bad in [[0x60, 0x60, 0xB0, 0x18], [0; 4], [0x17, 0xB0, 0x60, 0x60]] {
            let mut channel = dynamic(&bad, protocol((5, 0), None));
            match channel.preamble().unwrap_err() {
                StubError::ServerExit(msg) => {
                    assert!(msg.contains("6060B017"));
                    assert!(msg.contains(&hex_repr(&bad)));
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn legacy_exact_match() {
        let mut channel = dynamic(&offers(&[(5, 8, 0)]), protocol((5, 8), None));
        channel.version_handshake().unwrap();

        assert_eq!(channel.wire.sent, vec![0x00, 0x00, 0x08, 0x05]);
        assert!(!channel.is_handshake_in_progress());
    }

    #[test]
    fn legacy_no_acceptable_offer() {
        let request = offers(&[(5, 0, 0), (4, 4, 0)]);
        let mut channel = dynamic(&request, protocol((5, 8), None));

        match channel.version_handshake().unwrap_err() {
            StubError::Script(msg) => {
                assert!(msg.contains("talks protocol 5.8"));
                assert!(msg.contains("manifest version <= 1"));
                assert!(msg.contains(&hex_repr(&request)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(channel.wire.sent, vec![0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn abort_write_failure_is_swallowed() {
        let mut channel = dynamic(&offers(&[(3, 0, 0)]), protocol((5, 8), None));
        channel.wire.broken = true;

        let err = channel.version_handshake().unwrap_err();
        assert!(matches!(err, StubError::Script(_)));
    }

    #[test]
    fn first_acceptable_offer_wins() {
        let descriptor = protocol((4, 2), None);
        let mut channel = dynamic(&offers(&[(4, 1, 0), (4, 2, 0)]), descriptor);
        channel.version_handshake().unwrap();

        // 4.1 is an equivalent of 4.2 and was offered first.
        assert_eq!(channel.wire.sent, vec![0x00, 0x00, 0x01, 0x04]);
    }

    #[test]
    fn non_matching_offer_order_is_irrelevant() {
        let descriptor = protocol((4, 2), None);
        let a = [
            VersionOffer::new(3, 0, 0),
            VersionOffer::new(6, 0, 0),
            VersionOffer::new(4, 2, 0),
        ];
        let b = [a[1], a[0], a[2]];

        assert_eq!(select_offer(&descriptor, None, &a).unwrap(), Some(v(4, 2)));
        assert_eq!(select_offer(&descriptor, None, &b).unwrap(), Some(v(4, 2)));
    }

    #[test]
    fn minor_ignored_without_minor_negotiation() {
        let descriptor = protocol((3, 0), None);

        assert_eq!(
            check_offer(&descriptor, None, VersionOffer::new(3, 5, 0)).unwrap(),
            Some(v(3, 0))
        );
    }

    #[test]
    fn range_honoured_only_when_supported() {
        let with_range = protocol((4, 3), None);
        let without_range = protocol((4, 2), None);
        let offer = VersionOffer::new(4, 4, 1);

        assert_eq!(check_offer(&with_range, None, offer).unwrap(), Some(v(4, 3)));
        assert_eq!(check_offer(&without_range, None, offer).unwrap(), None);
    }

    #[test]
    fn equivalent_versions_tried_in_declaration_order() {
        let offer = VersionOffer::new(4, 4, 1);
        let forward = protocol((5, 0), None).with_equivalent_versions(vec![v(4, 4), v(4, 3)]);
        let backward = protocol((5, 0), None).with_equivalent_versions(vec![v(4, 3), v(4, 4)]);

        assert_eq!(check_offer(&forward, None, offer).unwrap(), Some(v(4, 4)));
        assert_eq!(check_offer(&backward, None, offer).unwrap(), Some(v(4, 3)));
    }

    #[test]
    fn manifest_request_rules() {
        let manifest = protocol((5, 7), None);
        let legacy = protocol((5, 6), None);
        let request = VersionOffer::new(0xFF, 1, 0);

        assert_eq!(
            check_offer(&manifest, None, request).unwrap(),
            Some(ProtocolVersion::manifest(1))
        );
        assert_eq!(check_offer(&legacy, None, request).unwrap(), None);
        assert_eq!(
            check_offer(&manifest, None, VersionOffer::new(0xFF, 2, 0)).unwrap(),
            None
        );
        assert_eq!(check_offer(&manifest, Some(2), request).unwrap(), None);
        // A pinned manifest is accepted even if the descriptor lacks support.
        assert_eq!(
            check_offer(&legacy, Some(1), request).unwrap(),
            Some(ProtocolVersion::manifest(1))
        );
    }

    #[test]
    fn manifest_range_is_unimplemented() {
        let descriptor = protocol((5, 7), None);
        let err = check_offer(&descriptor, None, VersionOffer::new(0xFF, 1, 1)).unwrap_err();

        assert!(matches!(err, StubError::Unimplemented(_)));
    }

    #[test]
    fn pinned_manifest_rejects_ordinary_offers() {
        let descriptor = protocol((5, 7), None);
        assert_eq!(
            check_offer(&descriptor, Some(1), VersionOffer::new(5, 7, 0)).unwrap(),
            None
        );
        assert_eq!(
            check_offer(&descriptor, Some(0), VersionOffer::new(5, 7, 0)).unwrap(),
            Some(v(5, 7))
        );

        let mut channel = pinned(&offers(&[(5, 7, 0)]), descriptor, 1);
        match channel.version_handshake().unwrap_err() {
            StubError::Script(msg) => assert!(msg.contains("(manifest version 1)")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_manifest_version_is_unimplemented() {
        let mut channel = pinned(&offers(&[(0xFF, 2, 0)]), protocol((5, 7), None), 2);
        let err = channel.version_handshake().unwrap_err();

        assert!(matches!(err, StubError::Unimplemented(_)));
        assert!(channel.wire.sent.is_empty());
    }

    #[test]
    fn manifest_v1_success() {
        let mut input = offers(&[(0xFF, 1, 0)]);
        input.extend([0x00, 0x00, 0x07, 0x05, 0x01]);
        let (mut channel, lines) = recorded(dynamic(&input, protocol((5, 7), Some(vec![0x01]))));

        channel.version_handshake().unwrap();

        assert_eq!(
            channel.wire.sent,
            vec![0x00, 0x00, 0x01, 0xFF, 0x01, 0x00, 0x00, 0x07, 0x05, 0x01]
        );
        assert_eq!(channel.wire.flushes, 1);
        assert!(!channel.is_handshake_in_progress());
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                format!("C: <HANDSHAKE> {}", hex_repr(&offers(&[(0xFF, 1, 0)]))),
                "S: <HANDSHAKE> 00 00 01 FF [1] 00 00 07 05 01".to_string(),
                "C: <HANDSHAKE> 00 00 07 05 01".to_string(),
            ]
        );
    }

    #[test]
    fn manifest_v1_reads_one_byte_past_continued_features() {
        let mut input = offers(&[(0xFF, 1, 0)]);
        input.extend([0x00, 0x00, 0x07, 0x05, 0x81, 0x82, 0x03, 0xAA]);
        let features = vec![0x81, 0x82, 0x03];
        let mut channel = dynamic(&input, protocol((5, 7), Some(features)));

        channel.version_handshake().unwrap();

        // offer + pick + three feature bytes
        assert_eq!(channel.wire.reads, 5);
        assert_eq!(channel.wire.remaining(), 1);
    }

    #[test]
    fn manifest_v1_single_feature_byte() {
        let mut input = offers(&[(0xFF, 1, 0)]);
        input.extend([0x00, 0x00, 0x07, 0x05, 0x00, 0x00]);
        let mut channel = dynamic(&input, protocol((5, 7), None));

        channel.version_handshake().unwrap();

        assert_eq!(channel.wire.reads, 3);
        assert_eq!(channel.wire.remaining(), 1);
    }

    #[test]
    fn manifest_v1_version_mismatch() {
        let mut input = offers(&[(0xFF, 1, 0)]);
        input.extend([0x00, 0x00, 0x06, 0x05, 0x01]);
        let mut channel = dynamic(&input, protocol((5, 7), Some(vec![0x01])));

        match channel.version_handshake().unwrap_err() {
            StubError::Script(msg) => {
                assert!(msg.contains("different version 00 00 06 05 than offered 00 00 07 05"))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!channel.is_handshake_in_progress());
    }

    #[test]
    fn manifest_v1_feature_mismatch() {
        for bit in 0..7 {
            let mut input = offers(&[(0xFF, 1, 0)]);
            input.extend([0x00, 0x00, 0x07, 0x05, 0x01 ^ (1 << bit)]);
            let sent_len = 10;
            let mut channel = dynamic(&input, protocol((5, 7), Some(vec![0x01])));

            match channel.version_handshake().unwrap_err() {
                StubError::Script(msg) => assert!(msg.contains("different features")),
                other => panic!("unexpected error {other:?}"),
            }
            assert_eq!(channel.wire.sent.len(), sent_len);
        }
    }

    #[test]
    fn manifest_v1_resumes_after_failed_read() {
        let mut channel = dynamic(&offers(&[(0xFF, 1, 0)]), protocol((5, 7), Some(vec![0x81, 0x01])));

        let err = channel.version_handshake().unwrap_err();
        assert!(err.is_end_of_stream());
        assert_eq!(
            channel.handshake_step,
            Some(HandshakeStep::ManifestV1VersionPick)
        );

        channel.wire.feed(&[0x00, 0x00, 0x07, 0x05, 0x81]);
        let err = channel.version_handshake().unwrap_err();
        assert!(err.is_end_of_stream());
        assert!(channel.is_handshake_in_progress());

        channel.wire.feed(&[0x01]);
        channel.version_handshake().unwrap();
        assert!(!channel.is_handshake_in_progress());
        // The offer went out exactly once.
        assert_eq!(channel.wire.flushes, 1);
    }

    #[test]
    fn fixed_handshake_sends_literal_bytes() {
        let config = HandshakeConfig {
            mode: HandshakeMode::Fixed {
                response: vec![0x00, 0x00, 0x01, 0xFF, 0x00],
                expected_reply: Some(vec![0x00, 0x00, 0x07, 0x05, 0x00]),
            },
            delay: None,
        };
        let mut input = offers(&[(0x12, 0x34, 0x56)]);
        input.extend([0x00, 0x00, 0x07, 0x05, 0x00]);
        let mut channel = Channel::new(MemoryWire::new(&input), protocol((5, 7), None), config);

        channel.version_handshake().unwrap();
        assert_eq!(channel.wire.sent, vec![0x00, 0x00, 0x01, 0xFF, 0x00]);
        assert_eq!(channel.wire.remaining(), 0);
    }

    #[test]
    fn fixed_handshake_without_follow_up_ends_after_write() {
        let config = HandshakeConfig {
            mode: HandshakeMode::Fixed {
                response: vec![0x00, 0x00, 0x04, 0x04],
                expected_reply: None,
            },
            delay: Some(Duration::from_millis(10)),
        };
        let mut input = offers(&[(4, 4, 0)]);
        input.extend([0x00, 0x02]);
        let channel = Channel::new(MemoryWire::new(&input), protocol((4, 4), None), config);
        let (mut channel, lines) = recorded(channel);

        let start = Instant::now();
        channel.version_handshake().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(channel.wire.sent, vec![0x00, 0x00, 0x04, 0x04]);
        assert_eq!(channel.wire.remaining(), 2);
        assert!(channel.handshake_delay.is_none());

        let lines = lines.lock().unwrap();
        let delays = lines
            .iter()
            .filter(|line| line.starts_with("S: <HANDSHAKE DELAY>"))
            .count();
        assert_eq!(delays, 1);
        assert_eq!(lines.last().unwrap(), "S: <HANDSHAKE> 00 00 04 04");
    }

    #[test]
    fn fixed_handshake_reply_mismatch_is_fatal() {
        let config = HandshakeConfig {
            mode: HandshakeMode::Fixed {
                response: vec![0x00, 0x00, 0x04, 0x04],
                expected_reply: Some(vec![0xAB]),
            },
            delay: None,
        };
        let mut input = offers(&[]);
        input.push(0xCD);
        let mut channel = Channel::new(MemoryWire::new(&input), protocol((4, 4), None), config);

        match channel.version_handshake().unwrap_err() {
            StubError::ServerExit(msg) => {
                assert_eq!(msg, "Expected the client handshake response AB, received CD")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn handshake_delay_applies_once() {
        let config = HandshakeConfig {
            mode: HandshakeMode::default(),
            delay: Some(Duration::from_millis(20)),
        };
        let channel = Channel::new(
            MemoryWire::new(&offers(&[(4, 4, 0)])),
            protocol((4, 4), None),
            config,
        );
        let (mut channel, lines) = recorded(channel);

        let start = Instant::now();
        channel.version_handshake().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(channel.handshake_delay.is_none());

        let delays = lines
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("S: <HANDSHAKE DELAY>"))
            .count();
        assert_eq!(delays, 1);
    }
}
