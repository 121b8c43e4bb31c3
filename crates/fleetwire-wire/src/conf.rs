//! The `ClientConf` payload: behavior configuration pushed from the
//! collector to a node during handshake (and as live updates).
//!
//! This is a wire schema contract: field order is fixed, durations are
//! plain nanosecond counts, and new fields may only be appended. The
//! richer in-memory form with human-readable durations lives in
//! `fleetwire-config`.

use bytes::Bytes;
use fleetwire_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::WireResult;

/// Node identity, placement tags, and sampling periods.
///
/// All `*_period`, `*_interval`, and `*_wait` fields are nanoseconds;
/// zero disables the corresponding producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientConf {
    pub id: NodeId,
    pub hostname: String,
    pub region: String,
    pub zone: String,
    pub datacenter: String,
    pub cpu_utilization_period: u64,
    pub mem_info_period: u64,
    pub net_usage_period: u64,
    pub healthbeat_interval: u64,
    pub healthbeat_push_period: u64,
    pub ping_period: u64,
    pub pong_wait: u64,
    pub save_interval: u64,
}

impl ClientConf {
    /// Serializes the configuration for transmission.
    pub fn encode(&self) -> Bytes {
        let vec = postcard::to_allocvec(self).expect("client conf serialization cannot fail");
        Bytes::from(vec)
    }

    /// Deserializes a configuration received from the peer.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let conf = ClientConf {
            id: NodeId::from(0x1234u32),
            hostname: "node-7".to_string(),
            region: "us-east".to_string(),
            zone: "b".to_string(),
            datacenter: "dc2".to_string(),
            cpu_utilization_period: 5_000_000_000,
            mem_info_period: 10_000_000_000,
            net_usage_period: 0,
            healthbeat_interval: 30_000_000_000,
            healthbeat_push_period: 120_000_000_000,
            ping_period: 15_000_000_000,
            pong_wait: 20_000_000_000,
            save_interval: 300_000_000_000,
        };
        let decoded = ClientConf::decode(&conf.encode()).expect("decode");
        assert_eq!(decoded, conf);
    }

    #[test]
    fn truncated_conf_is_malformed() {
        let conf = ClientConf::default();
        let bytes = conf.encode();
        assert!(ClientConf::decode(&bytes[..bytes.len().saturating_sub(1)]).is_err());
    }
}
