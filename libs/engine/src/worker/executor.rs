//! Shared task execution plumbing for the worker: argument materialization,
//! result sealing, completion reporting, and reference bookkeeping.

use bytes::Bytes;
use skein_codec::{ObjectPayload, WireMessage};
use skein_network::Transport;
use skein_store::ObjectStore;
use skein_types::{ErrorKind, ErrorObject, ObjectId, ProcessId, TaskArg, TaskSpec, WireRef};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::registry::{FunctionRegistry, Invocation, RemoteFunction};
use crate::worker::request_store::PendingRequestStore;

/// Everything a task needs to run and report, shared by the worker loop,
/// spawned pool executions and actor hosts.
pub(crate) struct TaskContext {
    pub rank: ProcessId,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<ObjectStore>,
    pub requests: Arc<PendingRequestStore>,
}

/// Result of trying to resolve a task's arguments from local data.
pub(crate) enum Materialized {
    /// All inputs local. A dependency that resolved to a stored failure is
    /// carried separately so the task can fail without invoking user code.
    Ready {
        call: Invocation,
        dep_failure: Option<ErrorObject>,
    },
    /// Some inputs have not arrived yet.
    Missing(Vec<WireRef>),
}

impl TaskContext {
    /// Resolve every argument from the local shard (owned or cached).
    pub fn materialize(&self, spec: &TaskSpec) -> Materialized {
        let mut call = Invocation::default();
        let mut missing = Vec::new();
        let mut dep_failure = None;

        let mut resolve = |arg: &TaskArg| -> Option<Bytes> {
            match arg {
                TaskArg::Inline(bytes) => Some(bytes.clone()),
                TaskArg::Ref(wire) => match self.store.lookup(wire.object) {
                    Some(ObjectPayload::Value(bytes)) => Some(bytes),
                    Some(ObjectPayload::Error(error)) => {
                        if dep_failure.is_none() {
                            dep_failure = Some(
                                ErrorObject::new(
                                    ErrorKind::Dependency,
                                    format!("input {} failed: {}", wire.object, error.message),
                                )
                                .with_context(format!("{}({})", spec.function, spec.task_id)),
                            );
                        }
                        Some(Bytes::new())
                    }
                    None => {
                        missing.push(*wire);
                        None
                    }
                },
            }
        };

        for arg in &spec.args {
            if let Some(bytes) = resolve(arg) {
                call.args.push(bytes);
            }
        }
        for (name, arg) in &spec.kwargs {
            if let Some(bytes) = resolve(arg) {
                call.kwargs.push((name.clone(), bytes));
            }
        }

        if missing.is_empty() {
            Materialized::Ready { call, dep_failure }
        } else {
            Materialized::Missing(missing)
        }
    }

    /// Ask owners for data we do not have yet, once per object.
    pub async fn request_missing(&self, missing: &[WireRef]) {
        for wire in missing {
            if !self.requests.mark_requested(wire.object) {
                continue;
            }
            trace!(object = %wire.object, owner = %wire.owner, "requesting remote data");
            if let Err(e) = self
                .transport
                .send(
                    wire.owner,
                    WireMessage::FetchObject {
                        object: wire.object,
                        requester: self.rank,
                    },
                )
                .await
            {
                warn!(object = %wire.object, error = %e, "fetch request failed");
            }
        }
    }

    /// Register this worker's references for a decoded task spec: one
    /// acquire per reference argument, released after execution.
    pub async fn acquire_deps(&self, spec: &TaskSpec) {
        for dep in spec.ref_dependencies() {
            if dep.owner == self.rank {
                if let Err(e) = self.store.acquire(dep.object, self.rank) {
                    debug!(object = %dep.object, error = %e, "local acquire on missing entry");
                }
            } else if let Err(e) = self
                .transport
                .send(
                    dep.owner,
                    WireMessage::AcquireRef {
                        object: dep.object,
                        holder: self.rank,
                    },
                )
                .await
            {
                warn!(object = %dep.object, error = %e, "acquire send failed");
            }
        }
    }

    async fn release_deps(&self, spec: &TaskSpec) {
        for dep in spec.ref_dependencies() {
            if dep.owner == self.rank {
                if let Err(e) = self.store.release(dep.object, self.rank) {
                    debug!(object = %dep.object, error = %e, "local release on missing entry");
                }
            } else if let Err(e) = self
                .transport
                .send(
                    dep.owner,
                    WireMessage::ReleaseRef {
                        object: dep.object,
                        holder: self.rank,
                    },
                )
                .await
            {
                warn!(object = %dep.object, error = %e, "release send failed");
            }
        }
    }

    /// Reserve output entries when a task is accepted; the submitter's
    /// reference accounts for the initial count.
    pub fn reserve_outputs(&self, spec: &TaskSpec) {
        for output in &spec.outputs {
            if let Err(e) = self.store.reserve(*output) {
                warn!(object = %output, error = %e, "output reservation failed");
            }
        }
    }

    /// Run a registered function, converting panics into captured failures.
    pub fn invoke_function(
        &self,
        registry: &FunctionRegistry,
        spec: &TaskSpec,
        call: Invocation,
    ) -> Result<Vec<Bytes>, ErrorObject> {
        let function = registry.get(spec.function.as_str()).ok_or_else(|| {
            ErrorObject::new(
                ErrorKind::TaskExecution,
                format!("function '{}' is not registered", spec.function),
            )
        })?;
        invoke_catching(spec, move || function.invoke(call))
    }

    /// Seal results (or the captured failure) under the task's output ids,
    /// answer parked fetches, report to the controller, and drop this
    /// worker's argument references.
    pub async fn finish(&self, spec: &TaskSpec, outcome: Result<Vec<Bytes>, ErrorObject>) {
        let outcome = outcome.and_then(|values| {
            if values.len() == spec.outputs.len() {
                Ok(values)
            } else {
                Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!(
                        "task returned {} values, {} declared",
                        values.len(),
                        spec.outputs.len()
                    ),
                )
                .with_context(format!("{}({})", spec.function, spec.task_id)))
            }
        });

        let report = match outcome {
            Ok(values) => {
                for (output, value) in spec.outputs.iter().zip(values) {
                    self.seal_output(*output, ObjectPayload::Value(value)).await;
                }
                debug!(task = %spec.task_id, "task done");
                WireMessage::TaskDone {
                    task: spec.task_id,
                    worker: self.rank,
                    outputs: spec.outputs.clone(),
                }
            }
            Err(error) => {
                let error = error.with_context(format!("{}", self.rank));
                for output in &spec.outputs {
                    self.seal_output(*output, ObjectPayload::Error(error.clone()))
                        .await;
                }
                debug!(task = %spec.task_id, error = %error, "task failed");
                WireMessage::TaskFailed {
                    task: spec.task_id,
                    worker: self.rank,
                    outputs: spec.outputs.clone(),
                    error,
                }
            }
        };

        self.release_deps(spec).await;
        if let Err(e) = self.transport.send(ProcessId::CONTROLLER, report).await {
            warn!(task = %spec.task_id, error = %e, "completion report failed");
        }
    }

    async fn seal_output(&self, object: ObjectId, payload: ObjectPayload) {
        match self.store.seal(object, payload.clone()) {
            Ok(()) => {}
            Err(e) => {
                // Every holder released the reference while the task was
                // still running; the value is simply dropped.
                debug!(object = %object, error = %e, "seal skipped");
                return;
            }
        }
        for requester in self.requests.take_waiters(object) {
            if let Err(e) = self
                .transport
                .send(
                    requester,
                    WireMessage::ObjectData {
                        object,
                        payload: payload.clone(),
                    },
                )
                .await
            {
                warn!(object = %object, requester = %requester, error = %e, "parked fetch reply failed");
            }
        }
    }

    /// Serve a peer's fetch for an object this worker owns.
    pub async fn serve_fetch(&self, object: ObjectId, requester: ProcessId) {
        if let Some(payload) = self.store.get_owned(object) {
            if let Err(e) = self
                .transport
                .send(requester, WireMessage::ObjectData { object, payload })
                .await
            {
                warn!(object = %object, requester = %requester, error = %e, "fetch reply failed");
            }
        } else {
            self.requests.park(object, requester);
        }
    }

    /// Inputs this worker still needs for `spec`, as a set of object ids.
    pub fn missing_set(missing: &[WireRef]) -> HashSet<ObjectId> {
        missing.iter().map(|wire| wire.object).collect()
    }
}

/// Run user code, turning a panic into a captured task failure.
pub(crate) fn invoke_catching<F>(spec: &TaskSpec, f: F) -> Result<Vec<Bytes>, ErrorObject>
where
    F: FnOnce() -> Result<Vec<Bytes>, ErrorObject>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(ErrorObject::new(
            ErrorKind::TaskExecution,
            format!("task panicked: {}", panic_message(&panic)),
        )
        .with_context(format!("{}({})", spec.function, spec.task_id))),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
