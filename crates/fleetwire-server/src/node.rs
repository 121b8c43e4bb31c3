//! Per-connection node session.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use bytes::Bytes;
use fleetwire_config::BehaviorConfig;
use fleetwire_types::{CpuSample, LoadAvg, MemSample, NetSample, NodeId};
use fleetwire_wire::{
    ACK, ClientConf, Envelope, Frame, FrameKind, FrameReader, IdGenerator, Kind, write_frame,
};

use crate::error::{ServerError, ServerResult};
use crate::inventory::{Admission, Inventory, NodeRecord};
use crate::sink::{SampleSink, cpu_point, load_point, mem_point, net_point};

/// Handles one accepted connection for its whole lifetime.
///
/// Sessions are isolated: any error here ends this session and is
/// logged by [`run`](Self::run); nothing propagates to the accept
/// loop or to other sessions.
pub struct NodeSession {
    stream: TcpStream,
    peer: SocketAddr,
    inventory: Arc<Inventory>,
    sink: Arc<dyn SampleSink>,
    behavior: BehaviorConfig,
    idgen: Arc<IdGenerator>,
}

impl NodeSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        inventory: Arc<Inventory>,
        sink: Arc<dyn SampleSink>,
        behavior: BehaviorConfig,
        idgen: Arc<IdGenerator>,
    ) -> Self {
        Self {
            stream,
            peer,
            inventory,
            sink,
            behavior,
            idgen,
        }
    }

    /// Runs the session to completion, logging the outcome.
    pub fn run(self) {
        let peer = self.peer;
        match self.run_inner() {
            Ok(()) => tracing::debug!(%peer, "session ended"),
            Err(ServerError::DuplicateNode(id)) => {
                tracing::warn!(%peer, node = %id, "rejected duplicate connection");
            }
            Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
        }
    }

    fn run_inner(self) -> ServerResult<()> {
        let mut reader = FrameReader::new(self.stream.try_clone()?);
        let record = match self.admit(&mut reader) {
            Ok(record) => record,
            Err(e) => {
                // Best effort: tell the node before hanging up.
                let _ = write_frame(&mut &self.stream, &Frame::close());
                return Err(e);
            }
        };

        // The active claim is held from here on; every exit path below
        // must release it or the identity stays locked out until the
        // collector restarts.
        let result = self.welcome(&record).and_then(|()| {
            tracing::info!(peer = %self.peer, node = %record.id, "node connected");
            self.serve(&mut reader, &record)
        });
        self.inventory.release(&record.id);
        result
    }

    /// First half of the handshake: read the node's identity frame and
    /// admit it, minting an identity when needed. On success the
    /// caller holds the active claim for `record.id`.
    fn admit(&self, reader: &mut FrameReader<TcpStream>) -> ServerResult<NodeRecord> {
        let hello = reader.next_frame()?;
        if hello.kind != FrameKind::Text {
            return Err(ServerError::Handshake(format!(
                "expected identity frame, got {:?}",
                hello.kind
            )));
        }
        let claimed = NodeId::new(hello.payload);
        let admission = self.inventory.admit(&claimed, &self.behavior)?;
        if let Admission::Minted(record) = &admission {
            tracing::info!(peer = %self.peer, node = %record.id, "minted identity");
        }
        Ok(admission.record().clone())
    }

    /// Second half of the handshake: the assigned `ClientConf`, then
    /// `EOT`.
    fn welcome(&self, record: &NodeRecord) -> ServerResult<()> {
        let conf: ClientConf = record.behavior.to_wire(
            record.id.clone(),
            record.hostname.clone(),
            record.region.clone(),
            record.zone.clone(),
            record.datacenter.clone(),
        );
        self.send_envelope(Kind::ClientConf, conf.encode())?;
        self.send_envelope(Kind::Eot, Bytes::new())
    }

    fn serve(&self, reader: &mut FrameReader<TcpStream>, record: &NodeRecord) -> ServerResult<()> {
        loop {
            let frame = match reader.next_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!(node = %record.id, "node disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            match frame.kind {
                FrameKind::Text => {
                    if frame.payload.as_ref() != ACK {
                        tracing::debug!(
                            node = %record.id,
                            message = %String::from_utf8_lossy(&frame.payload),
                            "text message"
                        );
                        self.write(&Frame::text(Bytes::from_static(ACK)))?;
                    }
                }
                FrameKind::Binary => {
                    self.write(&Frame::text(Bytes::from_static(ACK)))?;
                    match Envelope::decode(&frame.payload) {
                        Ok(envelope) => self.dispatch(record, &envelope),
                        Err(e) => {
                            tracing::warn!(node = %record.id, error = %e, "malformed envelope");
                        }
                    }
                }
                FrameKind::Ping => self.write(&Frame::new(FrameKind::Pong, frame.payload))?,
                FrameKind::Pong => self.write(&Frame::new(FrameKind::Ping, frame.payload))?,
                FrameKind::Close => {
                    tracing::debug!(node = %record.id, "node closed the connection");
                    return Ok(());
                }
            }
        }
    }

    /// Routes a decoded envelope to the sink. Malformed payloads and
    /// unknown kinds are logged and skipped; they never end the
    /// session.
    fn dispatch(&self, record: &NodeRecord, envelope: &Envelope) {
        match envelope.kind {
            Kind::CpuUtilization => match postcard::from_bytes::<CpuSample>(&envelope.payload) {
                Ok(sample) => self.sink.write(cpu_point(record, &sample)),
                Err(e) => tracing::warn!(node = %record.id, error = %e, "bad cpu sample"),
            },
            Kind::MemInfo => match postcard::from_bytes::<MemSample>(&envelope.payload) {
                Ok(sample) => self.sink.write(mem_point(record, &sample)),
                Err(e) => tracing::warn!(node = %record.id, error = %e, "bad memory sample"),
            },
            Kind::NetUsage => match postcard::from_bytes::<NetSample>(&envelope.payload) {
                Ok(sample) => self.sink.write(net_point(record, &sample)),
                Err(e) => tracing::warn!(node = %record.id, error = %e, "bad network sample"),
            },
            Kind::LoadAvg => match postcard::from_bytes::<LoadAvg>(&envelope.payload) {
                Ok(sample) => self.sink.write(load_point(record, &sample)),
                Err(e) => tracing::warn!(node = %record.id, error = %e, "bad loadavg sample"),
            },
            kind => {
                tracing::warn!(node = %record.id, ?kind, id = envelope.id, "unhandled kind");
            }
        }
    }

    fn send_envelope(&self, kind: Kind, payload: impl Into<Bytes>) -> ServerResult<()> {
        let envelope = Envelope::new(self.idgen.next(), kind, payload);
        self.write(&Frame::binary(envelope.encode()))
    }

    fn write(&self, frame: &Frame) -> ServerResult<()> {
        write_frame(&mut &self.stream, frame)?;
        Ok(())
    }
}
