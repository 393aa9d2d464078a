//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol data.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A user value could not be serialized for transfer.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A payload could not be decoded back into the requested type.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    /// A wire message could not be encoded or decoded.
    #[error("Wire protocol error: {message}")]
    Wire { message: String },

    /// A frame header was malformed or inconsistent.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Frame payload failed checksum verification.
    #[error("Checksum mismatch on stream {stream_id} frame {index}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        stream_id: u64,
        index: u32,
        expected: u32,
        actual: u32,
    },
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    pub fn wire(message: impl Into<String>) -> Self {
        Self::Wire {
            message: message.into(),
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Whether the failure is scoped to one value (task-fatal) rather than
    /// to the process. Frame and checksum failures break the ordered-stream
    /// assumption and are process-fatal.
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            CodecError::Serialization { .. } | CodecError::Deserialization { .. }
        )
    }
}
