//! Message id generation.
//!
//! Ids combine a millisecond timestamp, a component derived from the
//! node's identity, and a per-millisecond sequence counter:
//!
//! ```text
//! 63            22 21       12 11        0
//! ┌───────────────┬───────────┬───────────┐
//! │ timestamp ms  │ node (10) │  seq (12) │
//! └───────────────┴───────────┴───────────┘
//! ```
//!
//! The result is unique within the node's lifetime and monotonically
//! non-decreasing as long as the system clock moves forward. A clock
//! that steps backward is absorbed by holding the last observed
//! timestamp until real time catches up.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use fleetwire_types::NodeId;

const NODE_BITS: u32 = 10;
const SEQ_BITS: u32 = 12;
const SEQ_MAX: u64 = (1 << SEQ_BITS) - 1;

#[derive(Debug)]
struct GenState {
    last_ms: u64,
    seq: u64,
}

/// Per-node message id generator.
///
/// Safe to call from many threads; generation is serialized on an
/// internal mutex. Callers re-create the generator whenever the
/// identity it is seeded from changes.
#[derive(Debug)]
pub struct IdGenerator {
    node: u64,
    state: Mutex<GenState>,
}

impl IdGenerator {
    /// Creates a generator seeded by the node's identity.
    pub fn new(id: &NodeId) -> Self {
        Self {
            node: id.component(NODE_BITS),
            state: Mutex::new(GenState { last_ms: 0, seq: 0 }),
        }
    }

    /// Returns the next id.
    pub fn next(&self) -> u64 {
        let mut state = self.state.lock().expect("idgen lock poisoned");
        let mut now = Self::clock_ms();
        // Hold the high-water mark if the clock stepped backward.
        if now < state.last_ms {
            now = state.last_ms;
        }
        if now == state.last_ms {
            state.seq += 1;
            if state.seq > SEQ_MAX {
                // Sequence exhausted within one millisecond: wait for
                // the next tick.
                while Self::clock_ms() <= state.last_ms {
                    std::hint::spin_loop();
                }
                state.last_ms = Self::clock_ms();
                state.seq = 0;
            }
        } else {
            state.last_ms = now;
            state.seq = 0;
        }
        (state.last_ms << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | state.seq
    }

    fn clock_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sequential_ids_are_strictly_increasing() {
        let generator = IdGenerator::new(&NodeId::from(0x1234u32));
        let mut prev = generator.next();
        for _ in 0..10_000 {
            let next = generator.next();
            assert!(next > prev, "{next} should exceed {prev}");
            prev = next;
        }
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let generator = Arc::new(IdGenerator::new(&NodeId::from(7u32)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = Arc::clone(&generator);
            handles.push(thread::spawn(move || {
                (0..1000).map(|_| generator.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("join") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn node_component_lands_in_the_middle_bits() {
        let id = NodeId::from(42u32);
        let generator = IdGenerator::new(&id);
        let value = generator.next();
        let node = (value >> SEQ_BITS) & ((1 << NODE_BITS) - 1);
        assert_eq!(node, id.component(NODE_BITS));
    }

    #[test]
    fn different_identities_differ_in_node_bits() {
        let a = IdGenerator::new(&NodeId::from(1u32));
        let b = IdGenerator::new(&NodeId::from(2u32));
        let node_of = |v: u64| (v >> SEQ_BITS) & ((1 << NODE_BITS) - 1);
        assert_ne!(node_of(a.next()), node_of(b.next()));
    }
}
