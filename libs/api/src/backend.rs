//! The uniform backend contract.

use async_trait::async_trait;
use bytes::Bytes;
use skein_engine::Result;
use skein_types::{
    ActorId, ActorStatus, FunctionDescriptor, ObjectId, TaskArg, WireActorRef, WireRef, WorkerInfo,
};
use std::time::Duration;

/// Operation set every interchangeable backend implements identically from
/// the caller's perspective. The typed [`crate::Runtime`] layer sits on top;
/// this trait works in serialized payloads and wire references.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit a pool task; one reference per declared return.
    async fn submit(
        &self,
        function: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>>;

    /// Create an actor pinned to one execution context for its lifetime.
    async fn create_actor(
        &self,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> Result<WireActorRef>;

    /// Call a method on an actor; calls execute in submission order.
    async fn call_actor_method(
        &self,
        handle: WireActorRef,
        method: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>>;

    /// Resolve a reference to its payload bytes. Blocks the calling logical
    /// thread until the value is ready; re-raises a captured failure; the
    /// timeout bounds only this wait.
    async fn get(&self, object: ObjectId, timeout: Option<Duration>) -> Result<Bytes>;

    /// Split into (resolved, unresolved), waiting for at least `num_ready`
    /// or the timeout, whichever comes first.
    async fn wait(
        &self,
        objects: &[ObjectId],
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectId>, Vec<ObjectId>)>;

    /// Store a driver-local value.
    fn put(&self, payload: Bytes) -> Result<WireRef>;

    /// Drop one driver-held reference. Fire-and-forget; safe from `Drop`.
    fn release(&self, object: ObjectId);

    /// Kill an actor: queued and future calls fail, the executing call
    /// completes.
    async fn kill_actor(&self, handle: WireActorRef) -> Result<()>;

    fn actor_status(&self, actor: ActorId) -> Option<ActorStatus>;

    /// Worker states, rank-ordered.
    fn cluster_resources(&self) -> Vec<WorkerInfo>;

    /// Tear the backend down; idempotent.
    async fn shutdown(&self);
}
