//! Transport error types.

use skein_types::ProcessId;
use thiserror::Error;

/// Errors raised by the communication layer.
///
/// Any of these is a `Communication` failure in the engine's error model:
/// once a transport errors, ordering guarantees for the affected process can
/// no longer be assumed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The destination rank does not exist in the process group.
    #[error("Unknown peer: {rank} (group size {group_size})")]
    UnknownPeer { rank: ProcessId, group_size: u32 },

    /// The channel to or from a peer has closed.
    #[error("Channel closed: {message}")]
    Closed { message: String },

    /// Encoding or framing failure below the message surface.
    #[error("Codec failure: {0}")]
    Codec(#[from] skein_codec::CodecError),

    /// An operation exceeded its deadline.
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}
