//! The `Runtime` context object: the typed execution interface.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use skein_codec::{deserialize_value, serialize_value};
use skein_engine::{ActorFactory, ActorTypeRegistry, FunctionRegistry, RemoteFunction, Result};
use skein_types::{ActorStatus, FunctionDescriptor, ObjectId, TaskArg, WorkerInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::Backend;
use crate::backends::message_passing::MessagePassingBackend;
use crate::config::RuntimeConfig;
use crate::dispatcher;
use crate::handles::{ActorHandle, ObjectRef};

/// Mixed positional and keyword arguments for a remote call. Values are
/// serialized eagerly (a value that cannot be encoded fails the submission,
/// not the process); references are passed through untouched.
#[derive(Debug, Default, Clone)]
pub struct Args {
    args: Vec<TaskArg>,
    kwargs: Vec<(String, TaskArg)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an inline value.
    pub fn value<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.args.push(TaskArg::Inline(serialize_value(value)?));
        Ok(self)
    }

    /// Append an object reference; the engine resolves it before invocation.
    pub fn reference(mut self, reference: &ObjectRef) -> Self {
        self.args.push(TaskArg::Ref(reference.wire()));
        self
    }

    /// Append a named inline value.
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.kwargs
            .push((name.into(), TaskArg::Inline(serialize_value(value)?)));
        Ok(self)
    }

    /// Append a named object reference.
    pub fn kwarg_reference(mut self, name: impl Into<String>, reference: &ObjectRef) -> Self {
        self.kwargs
            .push((name.into(), TaskArg::Ref(reference.wire())));
        self
    }

    fn into_parts(self) -> (Vec<TaskArg>, Vec<(String, TaskArg)>) {
        (self.args, self.kwargs)
    }
}

/// Builder: register callables, pick the backend, start the runtime.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    functions: Arc<FunctionRegistry>,
    actor_types: Arc<ActorTypeRegistry>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            functions: Arc::new(FunctionRegistry::new()),
            actor_types: Arc::new(ActorTypeRegistry::new()),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a single-argument function under `name`.
    pub fn register_function<A, R>(
        self,
        name: impl Into<String>,
        f: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
    {
        self.functions.register1(name, f);
        self
    }

    /// Register a two-argument function under `name`.
    pub fn register_function2<A, B, R>(
        self,
        name: impl Into<String>,
        f: impl Fn(A, B) -> R + Send + Sync + 'static,
    ) -> Self
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        R: Serialize,
    {
        self.functions.register2(name, f);
        self
    }

    /// Register a raw payload-level callable for anything the typed helpers
    /// do not cover (multiple returns, kwargs, custom decoding).
    pub fn register_raw(self, name: impl Into<String>, f: impl RemoteFunction + 'static) -> Self {
        self.functions.register(name, f);
        self
    }

    /// Register an actor type under `name`.
    pub fn register_actor(self, name: impl Into<String>, factory: impl ActorFactory + 'static) -> Self {
        self.actor_types.register(name, factory);
        self
    }

    pub async fn build(self) -> Result<Runtime> {
        let (backend, message_passing) = dispatcher::dispatch(
            &self.config,
            Arc::clone(&self.functions),
            Arc::clone(&self.actor_types),
        )
        .await?;

        // Drop-based releases funnel through one channel so handle drops
        // never touch the backend directly.
        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<ObjectId>();
        let gc = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                while let Some(object) = release_rx.recv().await {
                    backend.release(object);
                }
            })
        };

        info!(backend = ?self.config.backend, "runtime started");
        Ok(Runtime {
            backend,
            message_passing,
            release_tx,
            gc: Mutex::new(Some(gc)),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit runtime context: created once at startup, passed to every call,
/// torn down by [`Runtime::shutdown`]. No global state.
pub struct Runtime {
    backend: Arc<dyn Backend>,
    /// Set when the message-passing backend is active; used by failure
    /// injection in tests.
    message_passing: Option<Arc<MessagePassingBackend>>,
    release_tx: mpsc::UnboundedSender<ObjectId>,
    gc: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Store a value and return an owning reference to it.
    pub fn put<T: Serialize>(&self, value: &T) -> Result<ObjectRef> {
        let wire = self.backend.put(serialize_value(value)?)?;
        Ok(ObjectRef::new(wire, self.release_tx.clone()))
    }

    /// Submit a single-result task.
    pub async fn submit(
        &self,
        function: impl Into<FunctionDescriptor>,
        args: Args,
    ) -> Result<ObjectRef> {
        let mut refs = self.submit_n(function, args, 1).await?;
        Ok(refs.remove(0))
    }

    /// Submit a task with `num_returns` results. Zero returns is allowed
    /// for fire-and-forget submissions.
    pub async fn submit_n(
        &self,
        function: impl Into<FunctionDescriptor>,
        args: Args,
        num_returns: usize,
    ) -> Result<Vec<ObjectRef>> {
        let (args, kwargs) = args.into_parts();
        let wires = self
            .backend
            .submit(function.into(), args, kwargs, num_returns)
            .await?;
        Ok(self.wrap_refs(wires))
    }

    /// Resolve a reference, blocking until it is ready or errored. A
    /// captured failure is re-raised here; `timeout` bounds only the wait.
    pub async fn get<T: DeserializeOwned>(
        &self,
        reference: &ObjectRef,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let payload = self.backend.get(reference.id(), timeout).await?;
        Ok(deserialize_value(&payload)?)
    }

    /// Resolve several references under one shared timeout.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        references: &[ObjectRef],
        timeout: Option<Duration>,
    ) -> Result<Vec<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut values = Vec::with_capacity(references.len());
        for reference in references {
            let remaining = match deadline {
                Some(deadline) => Some(
                    deadline
                        .checked_duration_since(Instant::now())
                        .unwrap_or(Duration::ZERO),
                ),
                None => None,
            };
            values.push(self.get(reference, remaining).await?);
        }
        Ok(values)
    }

    /// Split references into (ready, not ready), waiting for at least
    /// `num_ready` or the timeout. Never blocks past the timeout; never
    /// reports fewer than `num_ready` if that many are already resolved.
    pub async fn wait(
        &self,
        references: &[ObjectRef],
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectRef>, Vec<ObjectRef>)> {
        let ids: Vec<ObjectId> = references.iter().map(|r| r.id()).collect();
        let (ready_ids, _) = self.backend.wait(&ids, num_ready, timeout).await?;
        let (ready, not_ready) = references
            .iter()
            .cloned()
            .partition(|r| ready_ids.contains(&r.id()));
        Ok((ready, not_ready))
    }

    /// Create an actor from a registered type.
    pub async fn create_actor(
        &self,
        type_name: impl Into<FunctionDescriptor>,
        args: Args,
    ) -> Result<ActorHandle> {
        let (args, kwargs) = args.into_parts();
        let wire = self.backend.create_actor(type_name.into(), args, kwargs).await?;
        Ok(ActorHandle::new(wire))
    }

    /// Call an actor method; calls execute in submission order across all
    /// callers.
    pub async fn call_actor(
        &self,
        handle: &ActorHandle,
        method: impl Into<FunctionDescriptor>,
        args: Args,
    ) -> Result<ObjectRef> {
        let (args, kwargs) = args.into_parts();
        let mut wires = self
            .backend
            .call_actor_method(handle.wire(), method.into(), args, kwargs, 1)
            .await?;
        Ok(ObjectRef::new(wires.remove(0), self.release_tx.clone()))
    }

    /// Explicitly drop a reference. Equivalent to letting the last clone go
    /// out of scope.
    pub fn release(&self, reference: ObjectRef) {
        drop(reference);
    }

    /// Kill an actor: queued and future calls fail with an actor-dead
    /// error; an executing call completes first.
    pub async fn kill(&self, handle: &ActorHandle) -> Result<()> {
        self.backend.kill_actor(handle.wire()).await
    }

    pub fn actor_status(&self, handle: &ActorHandle) -> Option<ActorStatus> {
        self.backend.actor_status(handle.id())
    }

    /// Worker states, rank-ordered.
    pub fn cluster_resources(&self) -> Vec<WorkerInfo> {
        self.backend.cluster_resources()
    }

    /// The message-passing backend, when active. Tests use this for
    /// worker-loss injection.
    pub fn message_passing(&self) -> Option<&Arc<MessagePassingBackend>> {
        self.message_passing.as_ref()
    }

    /// Tear everything down. Idempotent; outstanding references become
    /// inert.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
        if let Some(gc) = self.gc.lock().take() {
            gc.abort();
        }
        info!("runtime stopped");
    }

    fn wrap_refs(&self, wires: Vec<skein_types::WireRef>) -> Vec<ObjectRef> {
        wires
            .into_iter()
            .map(|wire| ObjectRef::new(wire, self.release_tx.clone()))
            .collect()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.backend.cluster_resources().len())
            .finish()
    }
}
