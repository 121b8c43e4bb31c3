//! # fleetwire-server: the collector
//!
//! The collector side of the Fleetwire protocol: a plain-thread TCP
//! accept loop, one [`NodeSession`] per connected node, the fleet
//! [`Inventory`] with its pluggable [`NodeStore`] persistence, and the
//! [`SampleSink`] boundary that turns decoded samples into timeseries
//! points.
//!
//! Sessions are fully isolated from each other and from the accept
//! loop; the only shared state is the inventory (one lock) and the
//! sink (bounded queue).

mod error;
mod inventory;
mod listener;
mod node;
mod sink;

pub use error::{ServerError, ServerResult, StoreError};
pub use inventory::{Admission, Inventory, JsonFileStore, MemoryStore, NodeRecord, NodeStore};
pub use listener::Collector;
pub use node::NodeSession;
pub use sink::{
    ForwardingSink, Point, SampleSink, TracingSink, cpu_point, load_point, mem_point, net_point,
};
