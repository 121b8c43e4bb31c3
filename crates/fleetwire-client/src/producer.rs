//! Periodic telemetry producers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use fleetwire_wire::{Frame, Kind};
use thiserror::Error;

use crate::session::Session;

/// Error from a metric source.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to read metric source: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metric data: {0}")]
    Malformed(String),
}

/// A source of encoded metric samples.
///
/// Implementations read the platform counters and return the encoded
/// sample payload; the producer wraps it in an envelope. Collection
/// failure is considered permanent and stops the producer that hit it,
/// leaving the rest of the session running.
pub trait SampleSource: Send {
    /// Short name for logs and thread naming.
    fn name(&self) -> &'static str;

    /// Collects one sample, encoded for the wire.
    fn collect(&mut self) -> Result<Bytes, CollectError>;
}

/// Drives one metric source on a fixed period.
pub struct Producer<S> {
    kind: Kind,
    period: Duration,
    source: S,
    session: Arc<Session>,
}

impl<S: SampleSource> Producer<S> {
    pub fn new(kind: Kind, period: Duration, source: S, session: Arc<Session>) -> Self {
        Self {
            kind,
            period,
            source,
            session,
        }
    }

    /// Runs the collection loop until cancelled.
    ///
    /// A zero period means the metric is disabled; the producer returns
    /// immediately without collecting anything.
    pub fn run(mut self) {
        if self.period.is_zero() {
            tracing::debug!(source = self.source.name(), "period is zero, producer disabled");
            return;
        }
        loop {
            if self.session.cancel_token().wait_timeout(self.period) {
                tracing::debug!(source = self.source.name(), "producer stopped");
                return;
            }
            let payload = match self.source.collect() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(
                        source = self.source.name(),
                        error = %e,
                        "collection failed, stopping producer"
                    );
                    return;
                }
            };
            match self.session.new_message(self.kind, payload) {
                Ok(bytes) => self.session.enqueue(Frame::binary(bytes)),
                Err(e) => {
                    tracing::warn!(source = self.source.name(), error = %e, "skipping sample");
                }
            }
        }
    }

    /// Spawns the producer on its own named thread.
    pub fn spawn(self) -> thread::JoinHandle<()>
    where
        S: 'static,
    {
        let name = format!("fw-{}", self.source.name());
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .expect("failed to spawn producer thread")
    }
}
