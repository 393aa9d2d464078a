//! Engine error types.

use skein_types::{ErrorKind, ErrorObject};
use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// `Failed` carries a captured failure re-raised at `get` time (task fault,
/// dependency failure, lost worker, dead actor, serialization). The other
/// variants are local operational errors of the calling process.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A captured failure attached to an object reference.
    #[error("{0}")]
    Failed(ErrorObject),

    /// An operation exceeded the caller-supplied deadline. Bounds only the
    /// caller's wait; the underlying task keeps running.
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The engine is shut down or the handle outlived its runtime.
    #[error("Engine unavailable: {message}")]
    Unavailable { message: String },

    /// Transport-level failure; fatal to the owning process.
    #[error("Communication failure: {0}")]
    Transport(#[from] skein_network::TransportError),

    /// Local store inconsistency.
    #[error("Store failure: {0}")]
    Store(#[from] skein_store::StoreError),

    /// Encoding failure outside a task payload (wire-level).
    #[error("Codec failure: {0}")]
    Codec(#[from] skein_codec::CodecError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// The failure kind, when this error carries a captured failure.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Failed(obj) => Some(obj.kind),
            _ => None,
        }
    }
}
