//! # Skein Communication Layer
//!
//! Send/receive primitives between the fixed-identity processes of a Skein
//! process group: point-to-point and broadcast, with message framing handled
//! below the `WireMessage` surface.
//!
//! The engine assumes the substrate delivers reliably and in order per
//! sender/receiver pair and never reimplements retransmission. The reference
//! substrate here is `ChannelMesh`, an in-process mesh of ordered channels
//! with deliberate failure injection for worker-loss testing. Other
//! substrates plug in behind the `Transport` trait.

pub mod error;
pub mod mesh;
pub mod transport;

pub use error::{Result, TransportError};
pub use mesh::{ChannelMesh, MeshEndpoint};
pub use transport::Transport;
