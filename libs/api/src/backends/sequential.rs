//! Sequential in-process backend.
//!
//! Every task executes immediately inside `submit`; actor calls execute
//! inside `call_actor_method`. Ordering and fail-fast semantics are
//! trivially identical to the distributed core because nothing ever runs
//! concurrently. Useful for tests, debugging, and single-threaded hosts.

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use skein_codec::ObjectPayload;
use skein_engine::{
    ActorTypeRegistry, EngineError, FunctionRegistry, Invocation, RemoteActor, Result,
};
use skein_store::ObjectStore;
use skein_types::{
    ActorId, ActorStatus, ErrorKind, ErrorObject, FunctionDescriptor, IdAllocator, ObjectId,
    ProcessId, TaskArg, WireActorRef, WireRef, WorkerInfo,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::Backend;

enum ActorSlot {
    Alive(Box<dyn RemoteActor>),
    Dead,
}

pub struct SequentialBackend {
    store: ObjectStore,
    ids: IdAllocator,
    functions: Arc<FunctionRegistry>,
    actor_types: Arc<ActorTypeRegistry>,
    actors: Mutex<HashMap<ActorId, ActorSlot>>,
    stopped: AtomicBool,
}

impl SequentialBackend {
    pub fn start(
        functions: Arc<FunctionRegistry>,
        actor_types: Arc<ActorTypeRegistry>,
    ) -> Arc<Self> {
        info!("sequential backend started");
        Arc::new(Self {
            store: ObjectStore::new(ProcessId::CONTROLLER),
            ids: IdAllocator::new(ProcessId::CONTROLLER),
            functions,
            actor_types,
            actors: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(EngineError::unavailable("backend is shut down"))
        } else {
            Ok(())
        }
    }

    /// Resolve arguments against the local store. A reference to a stored
    /// failure yields the dependency error instead of an invocation.
    fn materialize(
        &self,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> std::result::Result<Invocation, ErrorObject> {
        let mut call = Invocation::default();
        let mut resolve = |arg: TaskArg| -> std::result::Result<Bytes, ErrorObject> {
            match arg {
                TaskArg::Inline(bytes) => Ok(bytes),
                TaskArg::Ref(wire) => match self.store.lookup(wire.object) {
                    Some(ObjectPayload::Value(bytes)) => Ok(bytes),
                    Some(ObjectPayload::Error(error)) => Err(ErrorObject::new(
                        ErrorKind::Dependency,
                        format!("input {} failed: {}", wire.object, error.message),
                    )),
                    None => Err(ErrorObject::new(
                        ErrorKind::Dependency,
                        format!("input {} is not available", wire.object),
                    )),
                },
            }
        };
        for arg in args {
            call.args.push(resolve(arg)?);
        }
        for (name, arg) in kwargs {
            call.kwargs.push((name, resolve(arg)?));
        }
        Ok(call)
    }

    /// Seal an outcome under freshly allocated output ids.
    fn seal(
        &self,
        num_returns: usize,
        outcome: std::result::Result<Vec<Bytes>, ErrorObject>,
    ) -> Vec<WireRef> {
        let outputs: Vec<ObjectId> = (0..num_returns).map(|_| self.ids.next_object_id()).collect();
        let outcome = outcome.and_then(|values| {
            if values.len() == num_returns {
                Ok(values)
            } else {
                Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("task returned {} values, {} declared", values.len(), num_returns),
                ))
            }
        });
        match outcome {
            Ok(values) => {
                for (output, value) in outputs.iter().zip(values) {
                    let _ = self.store.put(*output, ObjectPayload::Value(value));
                }
            }
            Err(error) => {
                debug!(error = %error, "sealing failure");
                for output in &outputs {
                    let _ = self.store.put(*output, ObjectPayload::Error(error.clone()));
                }
            }
        }
        outputs
            .into_iter()
            .map(|object| WireRef::new(object, ProcessId::CONTROLLER))
            .collect()
    }
}

#[async_trait]
impl Backend for SequentialBackend {
    async fn submit(
        &self,
        function: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.ensure_running()?;
        let outcome = self.materialize(args, kwargs).and_then(|call| {
            let callable = self.functions.get(function.as_str()).ok_or_else(|| {
                ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("function '{}' is not registered", function),
                )
            })?;
            catch_unwind(AssertUnwindSafe(|| callable.invoke(call))).unwrap_or_else(|_| {
                Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("function '{}' panicked", function),
                ))
            })
        });
        Ok(self.seal(num_returns, outcome))
    }

    async fn create_actor(
        &self,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> Result<WireActorRef> {
        self.ensure_running()?;
        let actor = self.ids.next_actor_id();
        let instance = self
            .materialize(args, kwargs)
            .and_then(|call| {
                let factory = self.actor_types.get(type_name.as_str()).ok_or_else(|| {
                    ErrorObject::new(
                        ErrorKind::TaskExecution,
                        format!("actor type '{}' is not registered", type_name),
                    )
                })?;
                factory.create(call)
            })
            .map_err(EngineError::Failed)?;
        self.actors.lock().await.insert(actor, ActorSlot::Alive(instance));
        Ok(WireActorRef::new(actor, ProcessId::CONTROLLER))
    }

    async fn call_actor_method(
        &self,
        handle: WireActorRef,
        method: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.ensure_running()?;
        let mut actors = self.actors.lock().await;
        let outcome = match actors.get_mut(&handle.actor) {
            None => Err(ErrorObject::new(
                ErrorKind::ActorDead,
                format!("unknown actor {}", handle.actor),
            )),
            Some(ActorSlot::Dead) => Err(ErrorObject::new(
                ErrorKind::ActorDead,
                format!("call to dead actor {}", handle.actor),
            )),
            Some(ActorSlot::Alive(instance)) => match self.materialize(args, kwargs) {
                Err(error) => Err(error),
                Ok(call) => AssertUnwindSafe(instance.call(method.as_str(), call))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(ErrorObject::new(
                            ErrorKind::TaskExecution,
                            format!("actor method '{}' panicked", method),
                        ))
                    }),
            },
        };
        Ok(self.seal(num_returns, outcome))
    }

    async fn get(&self, object: ObjectId, _timeout: Option<Duration>) -> Result<Bytes> {
        match self.store.lookup(object) {
            Some(ObjectPayload::Value(bytes)) => Ok(bytes),
            Some(ObjectPayload::Error(error)) => Err(EngineError::Failed(error)),
            None => Err(EngineError::unavailable(format!(
                "object {} is unknown or released",
                object
            ))),
        }
    }

    async fn wait(
        &self,
        objects: &[ObjectId],
        _num_ready: usize,
        _timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectId>, Vec<ObjectId>)> {
        // Everything resolves before submit returns; the split is immediate.
        let (ready, not_ready) = objects
            .iter()
            .partition(|object| self.store.lookup(**object).is_some());
        Ok((ready, not_ready))
    }

    fn put(&self, payload: Bytes) -> Result<WireRef> {
        self.ensure_running()?;
        let object = self.ids.next_object_id();
        self.store.put(object, ObjectPayload::Value(payload))?;
        Ok(WireRef::new(object, ProcessId::CONTROLLER))
    }

    fn release(&self, object: ObjectId) {
        let _ = self.store.release(object, ProcessId::CONTROLLER);
    }

    async fn kill_actor(&self, handle: WireActorRef) -> Result<()> {
        if let Some(slot) = self.actors.lock().await.get_mut(&handle.actor) {
            *slot = ActorSlot::Dead;
        }
        Ok(())
    }

    fn actor_status(&self, actor: ActorId) -> Option<ActorStatus> {
        // Synchronous surface over an async-guarded map; contention is nil
        // in a sequential backend.
        self.actors
            .try_lock()
            .ok()
            .and_then(|actors| match actors.get(&actor) {
                Some(ActorSlot::Alive(_)) => Some(ActorStatus::Alive),
                Some(ActorSlot::Dead) => Some(ActorStatus::Dead),
                None => None,
            })
    }

    fn cluster_resources(&self) -> Vec<WorkerInfo> {
        vec![WorkerInfo::new(ProcessId::CONTROLLER)]
    }

    async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.store.clear();
        self.actors.lock().await.clear();
        info!("sequential backend stopped");
    }
}
