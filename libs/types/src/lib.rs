//! # Skein Unified Types Library
//!
//! Pure data structures shared by every Skein crate: process/object/task/actor
//! identifiers, cross-process reference encodings, task descriptors, and the
//! serializable failure object attached to errored results.
//!
//! ## Design Philosophy
//!
//! - **Leaf crate**: no async, no I/O, no transport logic. Encoding rules live
//!   in `skein-codec`, connections in `skein-network`.
//! - **Identity is explicit**: every id embeds the rank that allocated it, so
//!   ids are globally unique without coordination and the owner of an object
//!   is recoverable from its reference encoding.
//! - **Monotonic status**: reference status only moves forward
//!   (pending → ready/error → released); transitions are checked at the type
//!   level where practical.
//!
//! ## Architecture Role
//!
//! ```text
//! skein-types → skein-codec → skein-network
//!      ↑              ↓            ↓
//!  Pure Data    Wire Encoding   Transport
//! ```

pub mod failure;
pub mod ids;
pub mod refs;
pub mod task;
pub mod worker;

pub use failure::{ErrorKind, ErrorObject};
pub use ids::{ActorId, IdAllocator, ObjectId, ProcessId, TaskId};
pub use refs::{ActorStatus, RefStatus, WireActorRef, WireRef};
pub use task::{FunctionDescriptor, TaskArg, TaskSpec, TaskTarget};
pub use worker::{WorkerInfo, WorkerStatus};
