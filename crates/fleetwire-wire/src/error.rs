//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while encoding or decoding wire traffic.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer holds bytes that cannot be parsed as a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame's declared payload length exceeds the protocol maximum.
    #[error("frame payload of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The bytes inside a binary frame are not a valid envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] postcard::Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True when the error means the peer went away (cleanly or not)
    /// rather than sending something unparseable.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
