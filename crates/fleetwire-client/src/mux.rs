//! Outbound multiplexer: the single socket-write path.
//!
//! Every outbound frame after the handshake flows through here. The
//! writer drains the bounded inbox onto the socket; while disconnected
//! it keeps draining and drops, so producers never block on a dead
//! link and never see a stale socket handle.

use std::time::Duration;

use fleetwire_wire::{Frame, write_frame};

use crate::error::{ClientError, ClientResult};
use crate::session::Session;

/// Idle poll interval between inbox drains.
const DRAIN_TICK: Duration = Duration::from_millis(5);

impl Session {
    /// Runs the writer loop until the session is cancelled.
    ///
    /// On cancellation the remaining queued frames are flushed and a
    /// `Close` frame is sent as a best effort goodbye.
    pub fn run_writer(&self) {
        loop {
            match self.inbox.try_pop() {
                Some(frame) => self.write_or_drop(&frame),
                None => {
                    if self.cancel_token().wait_timeout(DRAIN_TICK) {
                        break;
                    }
                }
            }
        }
        while let Some(frame) = self.inbox.try_pop() {
            self.write_or_drop(&frame);
        }
        if let Err(e) = self.write_frame(&Frame::close()) {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        tracing::debug!("writer stopped");
    }

    /// Telemetry is lossy by contract: frames queued while disconnected
    /// are dropped, not spooled.
    fn write_or_drop(&self, frame: &Frame) {
        if !self.is_connected() {
            tracing::debug!("not connected, dropping outbound message");
            return;
        }
        if let Err(e) = self.write_frame(frame) {
            // The read loop sees the dead socket and drives
            // reconnection; the writer just reports.
            tracing::warn!(error = %e, "write failed");
        }
    }

    pub(crate) fn write_frame(&self, frame: &Frame) -> ClientResult<()> {
        let guard = self.socket.lock().expect("socket lock poisoned");
        let stream = guard.as_ref().ok_or(ClientError::NotConnected)?;
        write_frame(&mut &*stream, frame)?;
        Ok(())
    }
}
