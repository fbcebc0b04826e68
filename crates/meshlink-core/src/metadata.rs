//! Handshake metadata codec
//!
//! Both ends send the same fixed-size frame immediately after the raw
//! connection comes up:
//!
//! ```text
//! +-------+-------+----------------------+--------+
//! | major | minor | identity (32 bytes)  | metric |
//! +-------+-------+----------------------+--------+
//! ```
//!
//! There is no length prefix and no encryption; the frame is a version and
//! capability check only. The layout is fixed for a given major version so
//! nodes with different minor versions interoperate.

use crate::errors::MetadataError;
use crate::types::{PeerIdentity, PUBLIC_KEY_LEN};

/// Protocol major version; peers must match exactly
pub const PROTOCOL_MAJOR: u8 = 0;
/// Protocol minor version; informational across one major version
pub const PROTOCOL_MINOR: u8 = 4;

/// Total size of one metadata frame
pub const METADATA_LEN: usize = 1 + 1 + PUBLIC_KEY_LEN + 1;

const MAJOR_OFFSET: usize = 0;
const MINOR_OFFSET: usize = 1;
const KEY_OFFSET: usize = 2;
const METRIC_OFFSET: usize = KEY_OFFSET + PUBLIC_KEY_LEN;

/// Record exchanged by both sides at connection start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeMetadata {
    pub major: u8,
    pub minor: u8,
    pub identity: PeerIdentity,
    pub metric: u8,
}

impl HandshakeMetadata {
    /// Metadata carrying this build's version, zero identity and metric
    pub fn base() -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            identity: PeerIdentity::new([0u8; PUBLIC_KEY_LEN]),
            metric: 0,
        }
    }

    /// Local metadata for a node with the given identity and metric
    pub fn local(identity: PeerIdentity, metric: u8) -> Self {
        Self {
            identity,
            metric,
            ..Self::base()
        }
    }

    pub fn encode(&self) -> [u8; METADATA_LEN] {
        let mut out = [0u8; METADATA_LEN];
        out[MAJOR_OFFSET] = self.major;
        out[MINOR_OFFSET] = self.minor;
        out[KEY_OFFSET..METRIC_OFFSET].copy_from_slice(self.identity.as_bytes());
        out[METRIC_OFFSET] = self.metric;
        out
    }

    /// Decode a frame. Anything other than exactly [`METADATA_LEN`] bytes is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        if bytes.len() != METADATA_LEN {
            return Err(MetadataError::Length {
                expected: METADATA_LEN,
                actual: bytes.len(),
            });
        }

        let identity = PeerIdentity::from_slice(&bytes[KEY_OFFSET..METRIC_OFFSET]).ok_or(
            MetadataError::Length {
                expected: METADATA_LEN,
                actual: bytes.len(),
            },
        )?;

        Ok(Self {
            major: bytes[MAJOR_OFFSET],
            minor: bytes[MINOR_OFFSET],
            identity,
            metric: bytes[METRIC_OFFSET],
        })
    }

    /// Whether the advertised version can talk to this build
    ///
    /// Only the major version has to match; minor versions within one major
    /// share the frame layout.
    pub fn check(&self) -> bool {
        self.major == PROTOCOL_MAJOR
    }

    /// `major.minor`, for log lines and errors
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> HandshakeMetadata {
        HandshakeMetadata::local(PeerIdentity::new([7u8; PUBLIC_KEY_LEN]), 42)
    }

    #[test]
    fn test_frame_layout() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), 35);
        assert_eq!(bytes[0], PROTOCOL_MAJOR);
        assert_eq!(bytes[1], PROTOCOL_MINOR);
        assert!(bytes[2..34].iter().all(|b| *b == 7));
        assert_eq!(bytes[34], 42);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let bytes = sample().encode();
        assert_eq!(
            HandshakeMetadata::decode(&bytes[..10]),
            Err(MetadataError::Length {
                expected: METADATA_LEN,
                actual: 10
            })
        );
        let mut long = bytes.to_vec();
        long.push(0);
        assert!(HandshakeMetadata::decode(&long).is_err());
        assert!(HandshakeMetadata::decode(&[]).is_err());
    }

    #[test]
    fn test_version_mismatch_decodes_but_fails_check() {
        let mut meta = sample();
        meta.major = PROTOCOL_MAJOR.wrapping_add(1);
        let decoded = HandshakeMetadata::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
        assert!(!decoded.check());
    }

    #[test]
    fn test_minor_version_is_compatible() {
        let mut meta = sample();
        meta.minor = PROTOCOL_MINOR.wrapping_add(3);
        assert!(meta.check());
        assert!(HandshakeMetadata::base().check());
    }

    #[test]
    fn test_version_string() {
        assert_eq!(
            HandshakeMetadata::base().version_string(),
            format!("{}.{}", PROTOCOL_MAJOR, PROTOCOL_MINOR)
        );
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let result = HandshakeMetadata::decode(&bytes);
            prop_assert_eq!(result.is_ok(), bytes.len() == METADATA_LEN);
        }

        #[test]
        fn prop_encode_decode_identity(
            major in any::<u8>(),
            minor in any::<u8>(),
            key in any::<[u8; 32]>(),
            metric in any::<u8>(),
        ) {
            let meta = HandshakeMetadata { major, minor, identity: PeerIdentity::new(key), metric };
            prop_assert_eq!(HandshakeMetadata::decode(&meta.encode()), Ok(meta));
        }

        #[test]
        fn prop_major_mismatch_rejected(major in any::<u8>(), minor in any::<u8>()) {
            let meta = HandshakeMetadata { major, minor, ..HandshakeMetadata::base() };
            prop_assert_eq!(meta.check(), major == PROTOCOL_MAJOR);
        }
    }
}
