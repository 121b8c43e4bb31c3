//! Behavior configuration: the sampling periods a collector pushes to
//! its nodes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use fleetwire_types::{HumanDuration, NodeId};
use fleetwire_wire::ClientConf;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Per-metric sampling periods plus the heartbeat/ping timings.
///
/// Owned by the node for the life of a connection and replaced
/// wholesale on every handshake or live update, never merged field by
/// field. A zero period disables the corresponding producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub cpu_utilization_period: HumanDuration,
    pub mem_info_period: HumanDuration,
    pub net_usage_period: HumanDuration,
    pub healthbeat_interval: HumanDuration,
    pub healthbeat_push_period: HumanDuration,
    pub ping_period: HumanDuration,
    pub pong_wait: HumanDuration,
    pub save_interval: HumanDuration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            cpu_utilization_period: HumanDuration::new(Duration::from_secs(5)),
            mem_info_period: HumanDuration::new(Duration::from_secs(10)),
            net_usage_period: HumanDuration::new(Duration::from_secs(10)),
            healthbeat_interval: HumanDuration::new(Duration::from_secs(30)),
            healthbeat_push_period: HumanDuration::new(Duration::from_secs(120)),
            ping_period: HumanDuration::new(Duration::from_secs(54)),
            pong_wait: HumanDuration::new(Duration::from_secs(60)),
            save_interval: HumanDuration::new(Duration::from_secs(300)),
        }
    }
}

impl BehaviorConfig {
    /// Loads the collector's default behavior config from a JSON file
    /// with human-readable duration strings.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the wire form sent to a node, attaching its identity and
    /// placement tags.
    pub fn to_wire(
        &self,
        id: NodeId,
        hostname: impl Into<String>,
        region: impl Into<String>,
        zone: impl Into<String>,
        datacenter: impl Into<String>,
    ) -> ClientConf {
        ClientConf {
            id,
            hostname: hostname.into(),
            region: region.into(),
            zone: zone.into(),
            datacenter: datacenter.into(),
            cpu_utilization_period: self.cpu_utilization_period.as_nanos(),
            mem_info_period: self.mem_info_period.as_nanos(),
            net_usage_period: self.net_usage_period.as_nanos(),
            healthbeat_interval: self.healthbeat_interval.as_nanos(),
            healthbeat_push_period: self.healthbeat_push_period.as_nanos(),
            ping_period: self.ping_period.as_nanos(),
            pong_wait: self.pong_wait.as_nanos(),
            save_interval: self.save_interval.as_nanos(),
        }
    }

    /// Rebuilds the in-memory form from a received `ClientConf`.
    pub fn from_wire(conf: &ClientConf) -> Self {
        Self {
            cpu_utilization_period: HumanDuration::from_nanos(conf.cpu_utilization_period),
            mem_info_period: HumanDuration::from_nanos(conf.mem_info_period),
            net_usage_period: HumanDuration::from_nanos(conf.net_usage_period),
            healthbeat_interval: HumanDuration::from_nanos(conf.healthbeat_interval),
            healthbeat_push_period: HumanDuration::from_nanos(conf.healthbeat_push_period),
            ping_period: HumanDuration::from_nanos(conf.ping_period),
            pong_wait: HumanDuration::from_nanos(conf.pong_wait),
            save_interval: HumanDuration::from_nanos(conf.save_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wire_round_trip_preserves_periods() {
        let behavior = BehaviorConfig::default();
        let wire = behavior
            .clone()
            .to_wire(NodeId::from(1u32), "host", "region", "zone", "dc");
        assert_eq!(wire.cpu_utilization_period, 5_000_000_000);
        let back = BehaviorConfig::from_wire(&wire);
        assert_eq!(back, behavior);
    }

    #[test]
    fn load_from_json_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("behavior.json");
        std::fs::write(
            &path,
            r#"{
                "cpu_utilization_period": "2s",
                "mem_info_period": "1m",
                "net_usage_period": "0s",
                "healthbeat_interval": "30s",
                "healthbeat_push_period": "2m",
                "ping_period": "54s",
                "pong_wait": "1m",
                "save_interval": "5m"
            }"#,
        )
        .expect("write");

        let behavior = BehaviorConfig::load(&path).expect("load");
        assert_eq!(
            behavior.cpu_utilization_period.as_duration(),
            Duration::from_secs(2)
        );
        assert!(behavior.net_usage_period.is_zero());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nope.json");
        assert!(matches!(
            BehaviorConfig::load(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
