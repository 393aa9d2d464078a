//! # Skein Protocol Codec
//!
//! The "rules" layer of Skein: everything about how bytes are shaped, nothing
//! about how they move.
//!
//! - **Value serialization**: an explicit capability (`serialize_value` /
//!   `deserialize_value`) bound on every cross-process payload. A value that
//!   cannot be encoded fails its own task with a serialization error, never
//!   the process.
//! - **Wire messages**: the closed operation set exchanged between the
//!   controller and workers.
//! - **Framing**: large payloads are split into bounded, checksummed frames
//!   and reassembled before anything above the transport can observe them.
//!
//! ## What This Crate Does NOT Contain
//! - Transport connections or channels (`skein-network`)
//! - Scheduling or execution logic (`skein-engine`)

pub mod error;
pub mod framing;
pub mod serializer;
pub mod wire;

pub use error::{CodecError, Result};
pub use framing::{split_frames, Frame, FrameHeader, Reassembler, DEFAULT_MAX_FRAME_PAYLOAD};
pub use serializer::{deserialize_value, serialize_value, ObjectPayload};
pub use wire::WireMessage;
