//! Agent error types.

use fleetwire_config::ConfigError;
use fleetwire_wire::WireError;
use thiserror::Error;

/// Result type for agent operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the agent session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connect period elapsed without a successful dial.
    /// Individual dial failures are transient and retried; only the
    /// exhausted budget surfaces.
    #[error("connect to {endpoint} timed out after {elapsed:?}")]
    ConnectTimedOut {
        endpoint: String,
        elapsed: std::time::Duration,
    },

    /// The peer deviated from the handshake sequence.
    #[error("handshake protocol violation: {0}")]
    HandshakeViolation(String),

    /// A newly assigned identity could not be persisted. Fatal to the
    /// handshake: an identity that cannot be saved is not adopted.
    #[error("failed to persist connection config: {0}")]
    Persist(#[from] ConfigError),

    /// The bounded reconnect budget was exhausted.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Message generation was requested before the collector assigned
    /// an identity.
    #[error("node identity not yet assigned")]
    IdentityUnassigned,

    /// The session has no live socket.
    #[error("not connected")]
    NotConnected,

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
