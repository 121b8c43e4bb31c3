//! # fleetwire-client: the node agent
//!
//! This crate implements the agent side of the Fleetwire protocol: the
//! connection state machine (connect, handshake, steady-state,
//! reconnect), the outbound multiplexer that serializes all producers
//! onto one socket, and the periodic telemetry producers.
//!
//! ## Architecture
//!
//! No async runtime: one plain thread per concern, coordinated through
//! a shared cancellation token and a bounded queue.
//!
//! ```text
//! ┌──────────┐  ┌──────────┐  ┌──────────┐
//! │ Producer │  │ Producer │  │ Producer │   (one per enabled metric)
//! └────┬─────┘  └────┬─────┘  └────┬─────┘
//!      └─────────────┼─────────────┘
//!              bounded inbox (8)
//!                    │
//!              ┌─────▼─────┐          ┌───────────┐
//!              │Multiplexer│──socket──│ read loop │
//!              └───────────┘          └───────────┘
//!                        Session owns both
//! ```
//!
//! The socket is written only by the multiplexer (and by the session
//! during the strictly sequential handshake); producers talk to the
//! queue, never the socket, so a reconnect can replace the socket
//! without any producer holding a stale handle.

mod cancel;
mod error;
mod mux;
mod producer;
mod queue;
mod session;

pub use cancel::CancelToken;
pub use error::{ClientError, ClientResult};
pub use producer::{CollectError, Producer, SampleSource};
pub use queue::SendQueue;
pub use session::{RECONNECT_ATTEMPTS, Session, SessionState};
