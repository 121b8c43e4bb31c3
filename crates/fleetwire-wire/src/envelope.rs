//! Envelope layer: the telemetry message inside binary frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WireResult;

/// Out-of-band text command requesting an immediate load-average
/// sample from a node.
pub const LOADAVG_REQUEST: &[u8] = b"loadavg";

/// Acknowledgement sentinel exchanged as a text frame.
pub const ACK: &[u8] = b"ack";

/// The enumerated tag identifying how to interpret an envelope payload.
///
/// Carried as a raw byte on the wire. Values not in this table decode
/// as [`Kind::Unknown`] so that a newer peer can introduce metric types
/// without breaking older ones; dispatchers log and discard unknowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Behavior configuration pushed from collector to node.
    ClientConf,
    /// End of handshake.
    Eot,
    /// CPU utilization sample.
    CpuUtilization,
    /// Memory usage sample.
    MemInfo,
    /// Network usage sample.
    NetUsage,
    /// Load average sample.
    LoadAvg,
    /// A tag this build does not know about.
    Unknown(u8),
}

impl From<u8> for Kind {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ClientConf,
            2 => Self::Eot,
            3 => Self::CpuUtilization,
            4 => Self::MemInfo,
            5 => Self::NetUsage,
            6 => Self::LoadAvg,
            other => Self::Unknown(other),
        }
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::ClientConf => 1,
            Kind::Eot => 2,
            Kind::CpuUtilization => 3,
            Kind::MemInfo => 4,
            Kind::NetUsage => 5,
            Kind::LoadAvg => 6,
            Kind::Unknown(other) => other,
        }
    }
}

/// Serialized form. The `kind` field stays a bare `u8` here; mapping to
/// [`Kind`] happens after decode so unknown tags never fail the parse.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    id: u64,
    kind: u8,
    payload: Bytes,
}

/// The binary message wrapper: a node-scoped message id, a kind tag,
/// and a payload interpreted according to the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Unique per node-scoped stream, monotonic under a forward clock.
    pub id: u64,
    pub kind: Kind,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(id: u64, kind: Kind, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            kind,
            payload: payload.into(),
        }
    }

    /// Encodes the envelope. Infallible for well-formed input; the only
    /// failure mode postcard has here is allocation.
    pub fn encode(&self) -> Bytes {
        let raw = RawEnvelope {
            id: self.id,
            kind: u8::from(self.kind),
            payload: self.payload.clone(),
        };
        let vec = postcard::to_allocvec(&raw).expect("envelope serialization cannot fail");
        Bytes::from(vec)
    }

    /// Decodes an envelope from the payload of a binary frame.
    ///
    /// Fails with [`crate::WireError::MalformedEnvelope`] on truncated
    /// or invalid input. An unknown kind tag is not an error.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let raw: RawEnvelope = postcard::from_bytes(bytes)?;
        Ok(Self {
            id: raw.id,
            kind: Kind::from(raw.kind),
            payload: raw.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_basic() {
        let env = Envelope::new(42, Kind::MemInfo, vec![1, 2, 3]);
        let decoded = Envelope::decode(&env.encode()).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn round_trip_empty_payload() {
        let env = Envelope::new(0, Kind::Eot, Bytes::new());
        let decoded = Envelope::decode(&env.encode()).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn unknown_kind_decodes_without_error() {
        let env = Envelope::new(7, Kind::Unknown(200), vec![0xde, 0xad]);
        let decoded = Envelope::decode(&env.encode()).expect("decode");
        assert_eq!(decoded.kind, Kind::Unknown(200));
        assert_eq!(decoded.payload.as_ref(), &[0xde, 0xad]);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let env = Envelope::new(u64::MAX, Kind::CpuUtilization, vec![0u8; 64]);
        let bytes = env.encode();
        let err = Envelope::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, crate::WireError::MalformedEnvelope(_)));
    }

    #[test]
    fn kind_mapping_is_exhaustive_for_known_tags() {
        for tag in 1u8..=6 {
            let kind = Kind::from(tag);
            assert!(!matches!(kind, Kind::Unknown(_)), "tag {tag} is known");
            assert_eq!(u8::from(kind), tag);
        }
        assert_eq!(Kind::from(0), Kind::Unknown(0));
        assert_eq!(Kind::from(99), Kind::Unknown(99));
    }

    proptest! {
        #[test]
        fn prop_round_trip(id in any::<u64>(), tag in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let env = Envelope::new(id, Kind::from(tag), payload);
            let decoded = Envelope::decode(&env.encode()).expect("decode");
            prop_assert_eq!(decoded, env);
        }
    }
}
