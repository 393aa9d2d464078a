//! Explicit serialization capability for cross-process values.
//!
//! All user values cross process boundaries through these two functions.
//! There is no implicit pickling of arbitrary arguments: anything submitted
//! inline or stored in the object store is bincode-encoded here, and a value
//! that fails to encode fails only its own task.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skein_types::ErrorObject;

use crate::error::{CodecError, Result};

/// Serialize a user value into an owned payload.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Bytes> {
    let encoded = bincode::serialize(value).map_err(|e| CodecError::serialization(e.to_string()))?;
    Ok(Bytes::from(encoded))
}

/// Deserialize a payload back into a concrete type.
pub fn deserialize_value<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| CodecError::deserialization(e.to_string()))
}

/// What an object store entry holds once sealed: either a serialized value or
/// the captured failure of the task that was supposed to produce it.
///
/// The distinction travels with the payload so a receiving process can
/// re-raise the failure at `get` time without guessing at byte contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectPayload {
    Value(Bytes),
    Error(ErrorObject),
}

impl ObjectPayload {
    pub fn is_error(&self) -> bool {
        matches!(self, ObjectPayload::Error(_))
    }

    /// Size in bytes of the carried data, for store accounting.
    pub fn len(&self) -> usize {
        match self {
            ObjectPayload::Value(bytes) => bytes.len(),
            ObjectPayload::Error(err) => err.message.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::ErrorKind;

    #[test]
    fn value_round_trip() {
        let payload = serialize_value(&vec![0u64, 1, 4, 9, 16]).unwrap();
        let back: Vec<u64> = deserialize_value(&payload).unwrap();
        assert_eq!(back, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn truncated_payload_is_a_value_error() {
        let payload = serialize_value(&true).unwrap();
        let err = deserialize_value::<u64>(&payload).unwrap_err();
        assert!(err.is_value_error());
    }

    #[test]
    fn error_payload_round_trips() {
        let original = ObjectPayload::Error(ErrorObject::new(ErrorKind::TaskExecution, "boom"));
        let bytes = serialize_value(&original).unwrap();
        let back: ObjectPayload = deserialize_value(&bytes).unwrap();
        assert_eq!(original, back);
    }
}
