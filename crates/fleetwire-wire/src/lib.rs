//! # fleetwire-wire: Binary wire protocol for Fleetwire
//!
//! Two layers:
//!
//! 1. **Frames** — the outer transport unit. A frame is an opcode byte
//!    (text, binary, close, ping, pong) plus a length-prefixed payload.
//!    Frames are what actually crosses the socket.
//! 2. **Envelopes** — the telemetry message carried inside binary
//!    frames: a message id, a [`Kind`] tag, and an opaque payload whose
//!    interpretation is keyed by the kind.
//!
//! The kind tag travels as a raw byte so that a peer running a newer
//! protocol revision never breaks an older one: unknown discriminants
//! decode as [`Kind::Unknown`] and are dropped by the dispatcher, not
//! treated as errors.
//!
//! Envelope ids come from [`IdGenerator`], a timestamp/node/sequence
//! scheme both sides of the protocol share.

mod conf;
mod envelope;
mod error;
mod frame;
mod idgen;

pub use conf::ClientConf;
pub use envelope::{ACK, Envelope, Kind, LOADAVG_REQUEST};
pub use error::{WireError, WireResult};
pub use frame::{FRAME_HEADER_SIZE, Frame, FrameKind, FrameReader, MAX_FRAME_PAYLOAD, write_frame};
pub use idgen::IdGenerator;
