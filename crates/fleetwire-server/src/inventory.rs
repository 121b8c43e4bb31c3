//! Node inventory and the node store boundary.
//!
//! The inventory is the collector's authoritative view of the fleet:
//! every node that ever connected, keyed by identity, plus the set of
//! identities with a live connection. Minting a new identity, creating
//! its record, and persisting it happen under one lock so two
//! first-contact nodes can never race to the same identity.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fleetwire_config::BehaviorConfig;
use fleetwire_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult, StoreError};

/// Everything the collector knows about one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// Placement tags attached to every point from this node. Empty
    /// until an operator fills them in; empty tags are omitted from
    /// points.
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub datacenter: String,
    /// The behavior config this node was last handed.
    pub behavior: BehaviorConfig,
}

impl NodeRecord {
    /// A record with empty placement tags, as minted on first contact.
    pub fn new(id: NodeId, behavior: BehaviorConfig) -> Self {
        Self {
            id,
            hostname: String::new(),
            region: String::new(),
            zone: String::new(),
            datacenter: String::new(),
            behavior,
        }
    }
}

/// Persistence boundary for node records.
pub trait NodeStore: Send + Sync {
    /// Loads every stored record.
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError>;

    /// Persists one record, replacing any stored record with the same
    /// identity.
    fn save(&self, record: &NodeRecord) -> Result<(), StoreError>;
}

/// JSON-file node store. The whole inventory is rewritten on each
/// save; a missing file on first run is an empty inventory, not an
/// error.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NodeStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let mut records = self.load_all()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        let bytes = serde_json::to_vec_pretty(&records)?;
        fs::write(&self.path, bytes).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory node store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<NodeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
        Ok(self.records.lock().expect("store lock poisoned").clone())
    }

    fn save(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store lock poisoned");
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}

/// How a connecting node was admitted.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The identity was already on file.
    Known(NodeRecord),
    /// A fresh identity was minted, persisted, and assigned.
    Minted(NodeRecord),
}

impl Admission {
    pub fn record(&self) -> &NodeRecord {
        match self {
            Self::Known(record) | Self::Minted(record) => record,
        }
    }
}

#[derive(Default)]
struct Fleet {
    nodes: HashMap<NodeId, NodeRecord>,
    active: HashSet<NodeId>,
}

/// The collector's node registry.
pub struct Inventory {
    fleet: Mutex<Fleet>,
    store: Box<dyn NodeStore>,
}

impl Inventory {
    pub fn new(store: Box<dyn NodeStore>) -> Self {
        Self {
            fleet: Mutex::new(Fleet::default()),
            store,
        }
    }

    /// Hydrates the registry from the store. Returns the number of
    /// records loaded.
    pub fn hydrate(&self) -> ServerResult<usize> {
        let records = self.store.load_all()?;
        let mut fleet = self.fleet.lock().expect("fleet lock poisoned");
        let count = records.len();
        for record in records {
            fleet.nodes.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    pub fn lookup(&self, id: &NodeId) -> Option<NodeRecord> {
        self.fleet
            .lock()
            .expect("fleet lock poisoned")
            .nodes
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.fleet.lock().expect("fleet lock poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admits a connecting node, minting an identity when it presents
    /// an empty or unknown one.
    ///
    /// The whole check-mint-persist sequence runs under the registry
    /// lock. A persist failure aborts the admission without assigning
    /// anything, and an identity that already has a live connection is
    /// refused.
    pub fn admit(&self, id: &NodeId, behavior: &BehaviorConfig) -> ServerResult<Admission> {
        let mut fleet = self.fleet.lock().expect("fleet lock poisoned");

        if let Some(record) = fleet.nodes.get(id).cloned() {
            if !fleet.active.insert(id.clone()) {
                return Err(ServerError::DuplicateNode(id.clone()));
            }
            return Ok(Admission::Known(record));
        }

        let minted = loop {
            let candidate = NodeId::from(rand::random::<u32>());
            if !candidate.is_unassigned() && !fleet.nodes.contains_key(&candidate) {
                break candidate;
            }
        };
        let record = NodeRecord::new(minted.clone(), behavior.clone());
        self.store.save(&record)?;
        fleet.nodes.insert(minted.clone(), record.clone());
        fleet.active.insert(minted);
        Ok(Admission::Minted(record))
    }

    /// Releases the active-connection claim when a session ends.
    pub fn release(&self, id: &NodeId) {
        self.fleet
            .lock()
            .expect("fleet lock poisoned")
            .active
            .remove(id);
    }

    #[cfg(test)]
    fn is_active(&self, id: &NodeId) -> bool {
        self.fleet
            .lock()
            .expect("fleet lock poisoned")
            .active
            .contains(id)
    }
}
