//! # fleetwire-types: Core types for Fleetwire
//!
//! This crate contains shared types used across the Fleetwire system:
//! - Node identity ([`NodeId`])
//! - Temporal types ([`Timestamp`], [`HumanDuration`])
//! - Telemetry samples ([`CpuSample`], [`MemSample`], [`NetSample`], [`LoadAvg`])

use std::fmt::{self, Debug, Display};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Node identity
// ============================================================================

/// Identity of a node as assigned by the collector.
///
/// A node starts life with an empty identity and adopts whatever the
/// collector hands it during the handshake. The identity is an opaque
/// byte sequence; the collector currently mints 4-byte big-endian
/// values but nodes must not rely on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct NodeId(Bytes);

impl NodeId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// An unassigned identity. Nodes present this on first contact.
    pub fn unassigned() -> Self {
        Self(Bytes::new())
    }

    /// True until the collector has assigned an identity.
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derives a small numeric component from the identity bytes,
    /// used to scope generated message ids to this node.
    pub fn component(&self, bits: u32) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in &self.0 {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        h & ((1 << bits) - 1)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unassigned() {
            return write!(f, "(unassigned)");
        }
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<Vec<u8>> for NodeId {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<NodeId> for Bytes {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(Bytes::copy_from_slice(&value.to_be_bytes()))
    }
}

// ============================================================================
// Temporal types
// ============================================================================

/// Nanoseconds since the Unix epoch.
///
/// Samples carry the collection time so the sink can backdate points
/// rather than stamping them at arrival.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as i64);
        Self(nanos)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// A duration that serializes as a human-readable string (`"5s"`,
/// `"15m"`, `"500ms"`).
///
/// Persisted configuration stores durations in this form so operators
/// can edit the files by hand; in memory it is a plain
/// [`std::time::Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Zero duration, the "disabled" sentinel for producer periods.
    pub fn zero() -> Self {
        Self(Duration::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn as_nanos(self) -> u64 {
        self.0.as_nanos() as u64
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self(Duration::from_nanos(nanos))
    }
}

impl Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Telemetry samples
// ============================================================================

/// One CPU utilization sample, per CPU.
///
/// Percentages are carried as integer hundredths; the sink scales them
/// back to fractions when building points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSample {
    pub timestamp: Timestamp,
    pub cpu_id: String,
    pub usr: u32,
    pub sys: u32,
    pub iowait: u32,
    pub idle: u32,
}

/// One memory usage sample. All values are bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemSample {
    pub timestamp: Timestamp,
    pub mem_total: u64,
    pub mem_used: u64,
    pub mem_free: u64,
    pub mem_shared: u64,
    pub mem_buffers: u64,
    pub cache_used: u64,
    pub cache_free: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
}

/// One network usage sample for a single interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSample {
    pub timestamp: Timestamp,
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Load average over the standard 1/5/15 minute windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAvg {
    pub timestamp: Timestamp,
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}
