//! # Skein Execution Engine
//!
//! The message-passing core of Skein: one controller process coordinating a
//! fixed group of worker processes over the communication layer, with no
//! shared memory between ranks.
//!
//! - The **controller** (rank 0) owns all coordination metadata: the object
//!   directory (ownership and status of every object), the task scheduler
//!   (dependency table and idle-worker assignment), actor placement, and the
//!   heartbeat monitor. Workers never make placement decisions.
//! - **Workers** execute one pool task or actor call at a time, host their
//!   shard of the object store, park tasks whose inputs are not yet local,
//!   and serve fetch requests from their peers.
//! - The **registries** close the serialization surface: functions and actor
//!   types are registered by descriptor on every rank, and only descriptors
//!   cross the wire.

pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod worker;

pub use config::EngineConfig;
pub use controller::{Controller, ControllerHandle};
pub use error::{EngineError, Result};
pub use registry::{
    ActorFactory, ActorTypeRegistry, FunctionRegistry, Invocation, RemoteActor, RemoteFunction,
};
pub use worker::WorkerProcess;
