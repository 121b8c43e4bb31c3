//! The client session: connection lifecycle and inbound routing.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use fleetwire_config::{BehaviorConfig, ConnConfig};
use fleetwire_types::NodeId;
use fleetwire_wire::{
    ClientConf, Envelope, Frame, FrameKind, FrameReader, IdGenerator, Kind, LOADAVG_REQUEST,
    write_frame,
};

use crate::cancel::CancelToken;
use crate::error::{ClientError, ClientResult};
use crate::producer::SampleSource;
use crate::queue::SendQueue;

/// Bounded retry budget for [`Session::reconnect`], distinct from the
/// connect-period timeout that bounds a single [`Session::connect`].
pub const RECONNECT_ATTEMPTS: u32 = 4;

/// Outbound queue capacity. Deliberately small: telemetry is lossy by
/// contract and a deep queue only delays noticing a dead link.
const INBOX_CAPACITY: usize = 8;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
    Terminated,
}

/// Owns the socket and drives the connection state machine.
///
/// The session is shared (`Arc`) between the read loop, the writer
/// (multiplexer), and the producers; all mutable state lives behind
/// its locks. Producers only ever see the session through
/// [`enqueue`](Self::enqueue), [`new_message`](Self::new_message), and
/// the cancellation token — never the socket.
pub struct Session {
    conn: Mutex<ConnConfig>,
    behavior: Mutex<BehaviorConfig>,
    state: Mutex<SessionState>,
    pub(crate) socket: Mutex<Option<TcpStream>>,
    /// Read half, with its buffer. Kept across the handshake-to-listen
    /// handoff so frames the handshake read ahead of are not lost.
    reader: Mutex<Option<FrameReader<TcpStream>>>,
    pub(crate) inbox: SendQueue<Frame>,
    idgen: Mutex<Option<IdGenerator>>,
    cancel: CancelToken,
}

impl Session {
    pub fn new(conn: ConnConfig) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(conn),
            behavior: Mutex::new(BehaviorConfig::default()),
            state: Mutex::new(SessionState::Disconnected),
            socket: Mutex::new(None),
            reader: Mutex::new(None),
            inbox: SendQueue::new(INBOX_CAPACITY),
            idgen: Mutex::new(None),
            cancel: CancelToken::new(),
        })
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Connects to the collector and runs the handshake.
    ///
    /// Dial attempts are retried every `connect_interval` until the
    /// `connect_period` budget is spent, at which point the attempt
    /// fails and the session is left [`SessionState::Disconnected`];
    /// only [`terminate`](Self::terminate) and reconnect exhaustion
    /// mark it Terminated. The handshake itself is attempted once per
    /// call; a protocol violation closes the socket and fails the
    /// attempt without retrying.
    ///
    /// Does nothing when already connected.
    pub fn connect(&self) -> ClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let (endpoint, interval, period) = {
            let conn = self.conn.lock().expect("conn lock poisoned");
            (
                conn.server_endpoint(),
                conn.connect_interval.as_duration(),
                conn.connect_period.as_duration(),
            )
        };

        self.set_state(SessionState::Connecting);
        let start = Instant::now();
        let stream = loop {
            match TcpStream::connect(&endpoint) {
                Ok(stream) => break stream,
                Err(source) => {
                    tracing::debug!(server = %endpoint, error = %source, "dial failed, retrying");
                    if start.elapsed() >= period || self.cancel.wait_timeout(interval) {
                        // terminate() already set the state when the
                        // wait broke on cancellation.
                        if !self.cancel.is_cancelled() {
                            self.set_state(SessionState::Disconnected);
                        }
                        tracing::warn!(server = %endpoint, "connect timed out");
                        return Err(ClientError::ConnectTimedOut {
                            endpoint,
                            elapsed: start.elapsed(),
                        });
                    }
                }
            }
        };

        let mut reader = FrameReader::new(stream.try_clone()?);
        match self.handshake(&stream, &mut reader) {
            Ok(()) => {
                let id = self.conn.lock().expect("conn lock poisoned").id.clone();
                self.seed_idgen(&id);
                *self.socket.lock().expect("socket lock poisoned") = Some(stream);
                *self.reader.lock().expect("reader lock poisoned") = Some(reader);
                self.set_state(SessionState::Connected);
                tracing::debug!(server = %endpoint, id = %id, "connected");
                Ok(())
            }
            Err(e) => {
                // Dropping the stream closes the socket.
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// The sequential handshake, run before the multiplexer owns the
    /// socket: send our identity, then read frames until `EOT`. The
    /// reader is handed back to the caller afterwards so frames it read
    /// ahead of survive into [`Session::listen`].
    fn handshake(
        &self,
        stream: &TcpStream,
        reader: &mut FrameReader<TcpStream>,
    ) -> ClientResult<()> {
        self.set_state(SessionState::Handshaking);
        let id = self.conn.lock().expect("conn lock poisoned").id.clone();
        write_frame(&mut &*stream, &Frame::text(Bytes::from(id)))?;

        loop {
            let frame = reader.next_frame()?;
            match frame.kind {
                FrameKind::Binary => {
                    let envelope = Envelope::decode(&frame.payload)?;
                    match envelope.kind {
                        Kind::ClientConf => {
                            let conf = ClientConf::decode(&envelope.payload)?;
                            self.adopt_conf(&conf)?;
                        }
                        Kind::Eot => return Ok(()),
                        other => {
                            return Err(ClientError::HandshakeViolation(format!(
                                "unexpected message kind {other:?} during handshake"
                            )));
                        }
                    }
                }
                // Informational only; the collector may chat.
                FrameKind::Text => {
                    tracing::info!(message = %String::from_utf8_lossy(&frame.payload), "server message");
                }
                other => {
                    return Err(ClientError::HandshakeViolation(format!(
                        "unexpected {other:?} frame during handshake"
                    )));
                }
            }
        }
    }

    /// Applies a handshake `ClientConf`: the behavior config is
    /// replaced wholesale, and a changed identity is adopted and
    /// persisted immediately. An identity that cannot be persisted is
    /// not adopted — the persist error fails the handshake.
    fn adopt_conf(&self, conf: &ClientConf) -> ClientResult<()> {
        *self.behavior.lock().expect("behavior lock poisoned") = BehaviorConfig::from_wire(conf);
        let mut conn = self.conn.lock().expect("conn lock poisoned");
        if conn.id != conf.id {
            let previous = std::mem::replace(&mut conn.id, conf.id.clone());
            if let Err(e) = conn.save() {
                conn.id = previous;
                return Err(e.into());
            }
            tracing::info!(id = %conn.id, "adopted new identity");
        }
        Ok(())
    }

    /// Live behavior update in Connected state: wholesale replacement,
    /// no identity or persistence step.
    fn apply_live_conf(&self, conf: &ClientConf) {
        *self.behavior.lock().expect("behavior lock poisoned") = BehaviorConfig::from_wire(conf);
    }

    /// Re-runs the connect sequence up to [`RECONNECT_ATTEMPTS`] times.
    /// Exhausting the budget terminates the session.
    pub fn reconnect(&self) -> ClientResult<()> {
        *self.socket.lock().expect("socket lock poisoned") = None;
        *self.reader.lock().expect("reader lock poisoned") = None;
        self.set_state(SessionState::Reconnecting);
        for attempt in 1..=RECONNECT_ATTEMPTS {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.connect() {
                Ok(()) => {
                    tracing::debug!(attempt, "reconnected");
                    return Ok(());
                }
                Err(e) => tracing::warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
        self.terminate();
        Err(ClientError::ReconnectExhausted {
            attempts: RECONNECT_ATTEMPTS,
        })
    }

    /// Marks the session unusable and signals every thread to stop.
    /// Idempotent; the first caller wins.
    pub fn terminate(&self) {
        self.set_state(SessionState::Terminated);
        *self.socket.lock().expect("socket lock poisoned") = None;
        *self.reader.lock().expect("reader lock poisoned") = None;
        self.cancel.cancel();
    }

    // ------------------------------------------------------------------
    // Steady-state read loop
    // ------------------------------------------------------------------

    /// Reads inbound frames until the session terminates.
    ///
    /// `loadavg` serves the out-of-band load-average request: the
    /// collector may ask for an immediate sample at any time,
    /// independent of the periodic producers.
    pub fn listen(&self, mut loadavg: Box<dyn SampleSource>) {
        'session: loop {
            let taken = self.reader.lock().expect("reader lock poisoned").take();
            let Some(mut reader) = taken else {
                if !self.cancel.is_cancelled() {
                    self.terminate();
                }
                return;
            };
            loop {
                let frame = match reader.next_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        if self.cancel.is_cancelled() {
                            return;
                        }
                        if e.is_disconnect() {
                            tracing::debug!("connection lost, reconnecting");
                        } else {
                            tracing::warn!(error = %e, "read failed, reconnecting");
                        }
                        if self.reconnect().is_ok() {
                            continue 'session;
                        }
                        tracing::error!("reconnect failed, session terminated");
                        return;
                    }
                };
                match frame.kind {
                    FrameKind::Text => {
                        if frame.payload.as_ref() == LOADAVG_REQUEST {
                            self.send_loadavg(loadavg.as_mut());
                        } else {
                            tracing::debug!(
                                message = %String::from_utf8_lossy(&frame.payload),
                                "text message"
                            );
                        }
                    }
                    FrameKind::Binary => match Envelope::decode(&frame.payload) {
                        Ok(envelope) => self.dispatch(&envelope),
                        Err(e) => tracing::warn!(error = %e, "malformed envelope, skipping"),
                    },
                    FrameKind::Close => {
                        tracing::debug!("closed by remote, reconnecting");
                        if self.reconnect().is_ok() {
                            continue 'session;
                        }
                        tracing::error!("reconnect failed, session terminated");
                        return;
                    }
                    FrameKind::Ping | FrameKind::Pong => {
                        tracing::debug!(kind = ?frame.kind, "control frame");
                    }
                }
            }
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        match envelope.kind {
            Kind::ClientConf => match ClientConf::decode(&envelope.payload) {
                Ok(conf) => {
                    tracing::debug!("behavior config updated");
                    self.apply_live_conf(&conf);
                }
                Err(e) => tracing::warn!(error = %e, "malformed client conf, skipping"),
            },
            kind => tracing::warn!(?kind, id = envelope.id, "unhandled message kind"),
        }
    }

    /// One-off load-average sample, sent as a binary envelope for the
    /// sink plus a text-tagged copy for visibility.
    fn send_loadavg(&self, source: &mut dyn SampleSource) {
        let payload = match source.collect() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "loadavg collection failed");
                return;
            }
        };
        match self.new_message(Kind::LoadAvg, payload) {
            Ok(bytes) => {
                self.enqueue(Frame::binary(bytes.clone()));
                self.enqueue(Frame::text(bytes));
            }
            Err(e) => tracing::warn!(error = %e, "could not build loadavg message"),
        }
    }

    // ------------------------------------------------------------------
    // Producer-facing surface
    // ------------------------------------------------------------------

    /// Builds an encoded envelope with a fresh message id.
    ///
    /// Refused before the handshake settles the node identity.
    pub fn new_message(&self, kind: Kind, payload: impl Into<Bytes>) -> ClientResult<Bytes> {
        let guard = self.idgen.lock().expect("idgen lock poisoned");
        let generator = guard.as_ref().ok_or(ClientError::IdentityUnassigned)?;
        Ok(Envelope::new(generator.next(), kind, payload).encode())
    }

    /// Enqueues a frame on the outbound multiplexer. A full inbox
    /// backpressures the caller until the writer drains a slot; a
    /// cancelled session drops the frame instead.
    pub fn enqueue(&self, frame: Frame) {
        if !self.inbox.push_or_drop(frame, &self.cancel) {
            tracing::debug!("dropping outbound message during shutdown");
        }
    }

    /// The connectivity query producers are allowed; they never touch
    /// the session state directly.
    pub fn is_connected(&self) -> bool {
        *self.state.lock().expect("state lock poisoned") == SessionState::Connected
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Current behavior config (producers read their periods from this
    /// after connect).
    pub fn behavior(&self) -> BehaviorConfig {
        self.behavior.lock().expect("behavior lock poisoned").clone()
    }

    /// The identity currently held, assigned or not.
    pub fn node_id(&self) -> NodeId {
        self.conn.lock().expect("conn lock poisoned").id.clone()
    }

    /// Persists the connection config (used on clean shutdown and
    /// after startup connect).
    pub fn save_conn(&self) -> ClientResult<()> {
        self.conn.lock().expect("conn lock poisoned").save()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    pub(crate) fn seed_idgen(&self, id: &NodeId) {
        *self.idgen.lock().expect("idgen lock poisoned") = Some(IdGenerator::new(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_disconnected() {
        let session = Session::new(ConnConfig::default());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
    }

    #[test]
    fn terminate_is_idempotent_and_cancels() {
        let session = Session::new(ConnConfig::default());
        session.terminate();
        session.terminate();
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.cancel_token().is_cancelled());
    }

    #[test]
    fn new_message_refused_before_identity_assignment() {
        let session = Session::new(ConnConfig::default());
        let err = session.new_message(Kind::LoadAvg, Bytes::new()).unwrap_err();
        assert!(matches!(err, ClientError::IdentityUnassigned));
    }

    #[test]
    fn new_message_works_after_seeding() {
        let session = Session::new(ConnConfig::default());
        session.seed_idgen(&NodeId::from(0x1234u32));
        let bytes = session
            .new_message(Kind::MemInfo, vec![1, 2, 3])
            .expect("message");
        let envelope = Envelope::decode(&bytes).expect("decode");
        assert_eq!(envelope.kind, Kind::MemInfo);
        assert_eq!(envelope.payload.as_ref(), &[1, 2, 3]);
    }
}
