//! Collector error types.

use std::path::PathBuf;

use fleetwire_types::NodeId;
use fleetwire_wire::WireError;
use thiserror::Error;

/// Result type for collector operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the collector.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The node deviated from the handshake sequence.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A second connection arrived for an identity that is already
    /// active. The first connection wins.
    #[error("node {0} already has an active connection")]
    DuplicateNode(NodeId),

    /// Node store failure. Fatal to the handshake that triggered it:
    /// an identity that cannot be persisted is never handed out.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the node store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read node store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse node store {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write node store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode node store: {0}")]
    Encode(#[from] serde_json::Error),
}
