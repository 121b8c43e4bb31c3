//! Accept loop.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use fleetwire_config::BehaviorConfig;
use fleetwire_types::NodeId;
use fleetwire_wire::IdGenerator;

use crate::error::{ServerError, ServerResult};
use crate::inventory::{Inventory, NodeStore};
use crate::node::NodeSession;
use crate::sink::SampleSink;

/// The collector: inventory, sink, and the accept loop that spawns a
/// [`NodeSession`] thread per connection.
pub struct Collector {
    inventory: Arc<Inventory>,
    sink: Arc<dyn SampleSink>,
    behavior: BehaviorConfig,
    idgen: Arc<IdGenerator>,
}

impl Collector {
    /// Builds a collector and hydrates the inventory from the store.
    ///
    /// `server_id` seeds the message-id generator so envelopes from
    /// this collector are distinguishable from node envelopes.
    pub fn new(
        server_id: u32,
        behavior: BehaviorConfig,
        store: Box<dyn NodeStore>,
        sink: Arc<dyn SampleSink>,
    ) -> ServerResult<Self> {
        let inventory = Arc::new(Inventory::new(store));
        let loaded = inventory.hydrate()?;
        tracing::info!(nodes = loaded, "inventory hydrated");
        Ok(Self {
            inventory,
            sink,
            behavior,
            idgen: Arc::new(IdGenerator::new(&NodeId::from(server_id))),
        })
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// Binds `addr` and serves until the process exits.
    pub fn bind_and_serve(&self, addr: &str) -> ServerResult<()> {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        tracing::info!(%addr, "listening");
        self.serve(listener)
    }

    /// Accepts connections on an already-bound listener. Accept errors
    /// are logged and the loop keeps going; the loop ends only when
    /// the listener itself goes away.
    pub fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    tracing::warn!(error = %e, "connection lost before handshake");
                    continue;
                }
            };
            let session = NodeSession::new(
                stream,
                peer,
                Arc::clone(&self.inventory),
                Arc::clone(&self.sink),
                self.behavior.clone(),
                Arc::clone(&self.idgen),
            );
            // Sessions are detached; they log their own outcome.
            let _ = thread::Builder::new()
                .name(format!("fw-node-{peer}"))
                .spawn(move || session.run())
                .map_err(ServerError::Io)?;
        }
        Ok(())
    }
}
