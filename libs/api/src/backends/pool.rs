//! Thread-pool backend: the local-process-pool analog.
//!
//! Pool tasks run on a fixed set of OS threads over a shared store; actors
//! each get a dedicated thread so their call order is the channel order. The
//! observable semantics match the message-passing core: dependency-gated
//! dispatch, fail-fast on errored inputs for pool tasks, in-sequence failure
//! for actor calls, kill fails queued calls while the executing one
//! completes.

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use skein_codec::ObjectPayload;
use skein_engine::{
    ActorTypeRegistry, EngineError, FunctionRegistry, Invocation, RemoteActor, Result,
};
use skein_store::ObjectStore;
use skein_types::{
    ActorId, ActorStatus, ErrorKind, ErrorObject, FunctionDescriptor, IdAllocator, ObjectId,
    ProcessId, RefStatus, TaskArg, WireActorRef, WireRef, WorkerInfo,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::RuntimeConfig;

#[derive(Debug, Clone)]
struct Job {
    function: FunctionDescriptor,
    args: Vec<TaskArg>,
    kwargs: Vec<(String, TaskArg)>,
    outputs: Vec<ObjectId>,
    target: JobTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobTarget {
    Pool,
    Actor { actor: ActorId, seq: u64 },
}

enum ActorMsg {
    Run(Job),
    Kill,
}

struct ActorSlot {
    tx: Sender<ActorMsg>,
    dead: Arc<AtomicBool>,
    next_seq: u64,
}

#[derive(Default)]
struct PoolState {
    statuses: HashMap<ObjectId, RefStatus>,
    waiting: Vec<(Job, HashSet<ObjectId>)>,
    actors: HashMap<ActorId, ActorSlot>,
}

struct PoolShared {
    store: ObjectStore,
    ids: IdAllocator,
    functions: Arc<FunctionRegistry>,
    actor_types: Arc<ActorTypeRegistry>,
    state: Mutex<PoolState>,
    job_tx: Mutex<Option<Sender<Job>>>,
    version: watch::Sender<u64>,
}

pub struct ThreadPoolBackend {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ThreadPoolBackend {
    pub fn start(
        config: &RuntimeConfig,
        functions: Arc<FunctionRegistry>,
        actor_types: Arc<ActorTypeRegistry>,
    ) -> Result<Arc<Self>> {
        let workers = config.workers.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (version, _) = watch::channel(0);

        let shared = Arc::new(PoolShared {
            store: ObjectStore::new(ProcessId::CONTROLLER),
            ids: IdAllocator::new(ProcessId::CONTROLLER),
            functions,
            actor_types,
            state: Mutex::new(PoolState::default()),
            job_tx: Mutex::new(Some(job_tx)),
            version,
        });

        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let job_rx: Receiver<Job> = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("skein-pool-{}", index))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        shared.run_pool_job(job);
                    }
                })
                .map_err(|e| {
                    EngineError::unavailable(format!("pool thread spawn failed: {}", e))
                })?;
            threads.push(handle);
        }

        info!(workers, "thread-pool backend started");
        Ok(Arc::new(Self {
            shared,
            threads: Mutex::new(threads),
            stopped: AtomicBool::new(false),
        }))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(EngineError::unavailable("backend is shut down"))
        } else {
            Ok(())
        }
    }
}

impl PoolShared {
    fn allocate_outputs(&self, num_returns: usize) -> Vec<ObjectId> {
        let outputs: Vec<ObjectId> = (0..num_returns).map(|_| self.ids.next_object_id()).collect();
        let mut state = self.state.lock();
        for output in &outputs {
            state.statuses.insert(*output, RefStatus::Pending);
        }
        outputs
    }

    /// Queue a job, parking it if inputs are still pending. Pool jobs with
    /// errored inputs fail here; actor jobs proceed and fail in order.
    fn enqueue(&self, job: Job) {
        let is_actor = matches!(job.target, JobTarget::Actor { .. });
        let mut failed = false;
        let remaining: HashSet<ObjectId> = {
            let state = self.state.lock();
            job.args
                .iter()
                .chain(job.kwargs.iter().map(|(_, arg)| arg))
                .filter_map(TaskArg::as_ref)
                .filter_map(|wire| match state.statuses.get(&wire.object) {
                    Some(RefStatus::Pending) => Some(wire.object),
                    Some(RefStatus::Error) if !is_actor => {
                        failed = true;
                        None
                    }
                    _ => None,
                })
                .collect()
        };

        if failed {
            let error = ErrorObject::new(
                ErrorKind::Dependency,
                format!("input of '{}' failed upstream", job.function),
            );
            self.seal_failure(&job.outputs, error);
            return;
        }
        if remaining.is_empty() {
            self.dispatch(job);
        } else {
            self.state.lock().waiting.push((job, remaining));
        }
    }

    fn dispatch(&self, job: Job) {
        match job.target {
            JobTarget::Pool => {
                let tx = self.job_tx.lock();
                if let Some(tx) = tx.as_ref() {
                    let _ = tx.send(job);
                }
            }
            JobTarget::Actor { actor, .. } => {
                let tx = {
                    let state = self.state.lock();
                    state.actors.get(&actor).map(|slot| slot.tx.clone())
                };
                match tx {
                    Some(tx) => {
                        let _ = tx.send(ActorMsg::Run(job));
                    }
                    None => {
                        let error = ErrorObject::new(
                            ErrorKind::ActorDead,
                            format!("actor {} has no live instance", actor),
                        );
                        self.seal_failure(&job.outputs, error);
                    }
                }
            }
        }
    }

    fn run_pool_job(&self, job: Job) {
        let outcome = self.materialize(&job).and_then(|call| {
            let callable = self.functions.get(job.function.as_str()).ok_or_else(|| {
                ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("function '{}' is not registered", job.function),
                )
            })?;
            catch_unwind(AssertUnwindSafe(|| callable.invoke(call))).unwrap_or_else(|_| {
                Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("function '{}' panicked", job.function),
                ))
            })
        });
        self.seal_outcome(&job.outputs, outcome);
    }

    /// Resolve inputs from the shared store; an errored input becomes the
    /// job's failure.
    fn materialize(&self, job: &Job) -> std::result::Result<Invocation, ErrorObject> {
        let mut call = Invocation::default();
        let mut resolve = |arg: &TaskArg| -> std::result::Result<Bytes, ErrorObject> {
            match arg {
                TaskArg::Inline(bytes) => Ok(bytes.clone()),
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
        for arg in &job.args {
            call.args.push(resolve(arg)?);
        }
        for (name, arg) in &job.kwargs {
            call.kwargs.push((name.clone(), resolve(arg)?));
        }
        Ok(call)
    }

    fn seal_outcome(
        &self,
        outputs: &[ObjectId],
        outcome: std::result::Result<Vec<Bytes>, ErrorObject>,
    ) {
        let outcome = outcome.and_then(|values| {
            if values.len() == outputs.len() {
                Ok(values)
            } else {
                Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("task returned {} values, {} declared", values.len(), outputs.len()),
                ))
            }
        });
        match outcome {
            Ok(values) => {
                for (output, value) in outputs.iter().zip(values) {
                    let _ = self.store.put(*output, ObjectPayload::Value(value));
                }
                self.resolve(outputs, RefStatus::Ready);
            }
            Err(error) => self.seal_failure(outputs, error),
        }
    }

    fn seal_failure(&self, outputs: &[ObjectId], error: ErrorObject) {
        debug!(error = %error, "sealing failure");
        for output in outputs {
            let _ = self.store.put(*output, ObjectPayload::Error(error.clone()));
        }
        self.resolve(outputs, RefStatus::Error);
    }

    /// Record resolutions and drain newly unblocked jobs. Iterative so a
    /// chain of dependency failures cannot recurse.
    fn resolve(&self, outputs: &[ObjectId], status: RefStatus) {
        let mut worklist: Vec<(ObjectId, RefStatus)> =
            outputs.iter().map(|output| (*output, status)).collect();

        while let Some((object, status)) = worklist.pop() {
            let (runnable, failed) = {
                let mut state = self.state.lock();
                state.statuses.insert(object, status);

                let mut runnable = Vec::new();
                let mut failed = Vec::new();
                let mut kept = Vec::new();
                for (job, mut remaining) in state.waiting.drain(..) {
                    let watched = remaining.remove(&object);
                    let is_actor = matches!(job.target, JobTarget::Actor { .. });
                    if watched && status == RefStatus::Error && !is_actor {
                        failed.push(job);
                    } else if remaining.is_empty() {
                        runnable.push(job);
                    } else {
                        kept.push((job, remaining));
                    }
                }
                state.waiting = kept;
                (runnable, failed)
            };

            for job in failed {
                let error = ErrorObject::new(
                    ErrorKind::Dependency,
                    format!("input {} of '{}' failed upstream", object, job.function),
                );
                for output in &job.outputs {
                    let _ = self.store.put(*output, ObjectPayload::Error(error.clone()));
                    worklist.push((*output, RefStatus::Error));
                }
            }
            for job in runnable {
                self.dispatch(job);
            }
        }
        self.version.send_modify(|v| *v += 1);
    }

    fn run_actor_thread(
        self: &Arc<Self>,
        actor: ActorId,
        mut instance: Box<dyn RemoteActor>,
        rx: Receiver<ActorMsg>,
        dead: Arc<AtomicBool>,
    ) {
        let mut next_seq: u64 = 0;
        let mut buffered: BTreeMap<u64, Job> = BTreeMap::new();

        while let Ok(message) = rx.recv() {
            match message {
                ActorMsg::Kill => {
                    for (_, job) in std::mem::take(&mut buffered) {
                        self.fail_actor_job(&job, actor);
                    }
                }
                ActorMsg::Run(job) => {
                    if dead.load(Ordering::Acquire) {
                        self.fail_actor_job(&job, actor);
                        continue;
                    }
                    let JobTarget::Actor { seq, .. } = job.target else {
                        unreachable!("pool job routed to actor thread");
                    };
                    buffered.insert(seq, job);
                    while let Some(job) = buffered.remove(&next_seq) {
                        if dead.load(Ordering::Acquire) {
                            self.fail_actor_job(&job, actor);
                        } else {
                            self.run_actor_job(&mut instance, job);
                        }
                        next_seq += 1;
                    }
                }
            }
        }
    }

    fn run_actor_job(&self, instance: &mut Box<dyn RemoteActor>, job: Job) {
        let outcome = match self.materialize(&job) {
            Err(error) => Err(error),
            Ok(call) => {
                // Actor methods are futures; the dedicated thread drives
                // each to completion before the next call starts.
                catch_unwind(AssertUnwindSafe(|| {
                    futures::executor::block_on(instance.call(job.function.as_str(), call))
                }))
                .unwrap_or_else(|_| {
                    Err(ErrorObject::new(
                        ErrorKind::TaskExecution,
                        format!("actor method '{}' panicked", job.function),
                    ))
                })
            }
        };
        self.seal_outcome(&job.outputs, outcome);
    }

    fn fail_actor_job(&self, job: &Job, actor: ActorId) {
        let error = ErrorObject::new(
            ErrorKind::ActorDead,
            format!("actor {} is dead; call dropped", actor),
        );
        self.seal_failure(&job.outputs, error);
    }
}

#[async_trait]
impl Backend for ThreadPoolBackend {
    async fn submit(
        &self,
        function: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.ensure_running()?;
        let outputs = self.shared.allocate_outputs(num_returns);
        self.shared.enqueue(Job {
            function,
            args,
            kwargs,
            outputs: outputs.clone(),
            target: JobTarget::Pool,
        });
        Ok(outputs
            .into_iter()
            .map(|object| WireRef::new(object, ProcessId::CONTROLLER))
            .collect())
    }

    async fn create_actor(
        &self,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> Result<WireActorRef> {
        self.ensure_running()?;
        let call = self
            .shared
            .materialize(&Job {
                function: type_name.clone(),
                args,
                kwargs,
                outputs: vec![],
                target: JobTarget::Pool,
            })
            .map_err(EngineError::Failed)?;
        let factory = self
            .shared
            .actor_types
            .get(type_name.as_str())
            .ok_or_else(|| {
                EngineError::Failed(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("actor type '{}' is not registered", type_name),
                ))
            })?;
        let instance = factory.create(call).map_err(EngineError::Failed)?;

        let actor = self.shared.ids.next_actor_id();
        let (tx, rx) = crossbeam_channel::unbounded();
        let dead = Arc::new(AtomicBool::new(false));
        {
            let shared = Arc::clone(&self.shared);
            let thread_dead = Arc::clone(&dead);
            let handle = std::thread::Builder::new()
                .name(format!("skein-actor-{}", actor))
                .spawn(move || shared.run_actor_thread(actor, instance, rx, thread_dead))
                .map_err(|e| EngineError::unavailable(format!("actor thread spawn failed: {}", e)))?;
            self.threads.lock().push(handle);
        }
        self.shared.state.lock().actors.insert(
            actor,
            ActorSlot {
                tx,
                dead,
                next_seq: 0,
            },
        );
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
        let outputs = self.shared.allocate_outputs(num_returns);
        let seq = {
            let mut state = self.shared.state.lock();
            match state.actors.get_mut(&handle.actor) {
                Some(slot) if !slot.dead.load(Ordering::Acquire) => {
                    let seq = slot.next_seq;
                    slot.next_seq += 1;
                    Some(seq)
                }
                _ => None,
            }
        };

        match seq {
            Some(seq) => self.shared.enqueue(Job {
                function: method,
                args,
                kwargs,
                outputs: outputs.clone(),
                target: JobTarget::Actor {
                    actor: handle.actor,
                    seq,
                },
            }),
            None => {
                let error = ErrorObject::new(
                    ErrorKind::ActorDead,
                    format!("call to dead actor {}", handle.actor),
                );
                self.shared.seal_failure(&outputs, error);
            }
        }
        Ok(outputs
            .into_iter()
            .map(|object| WireRef::new(object, ProcessId::CONTROLLER))
            .collect())
    }

    async fn get(&self, object: ObjectId, timeout: Option<Duration>) -> Result<Bytes> {
        let mut version = self.shared.version.subscribe();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let status = self.shared.state.lock().statuses.get(&object).copied();
            match status {
                None => {
                    // Driver puts are sealed without a status record.
                    return match self.shared.store.lookup(object) {
                        Some(ObjectPayload::Value(bytes)) => Ok(bytes),
                        Some(ObjectPayload::Error(error)) => Err(EngineError::Failed(error)),
                        None => Err(EngineError::unavailable(format!(
                            "object {} is unknown or released",
                            object
                        ))),
                    };
                }
                Some(RefStatus::Ready) | Some(RefStatus::Error) => {
                    return match self.shared.store.lookup(object) {
                        Some(ObjectPayload::Value(bytes)) => Ok(bytes),
                        Some(ObjectPayload::Error(error)) => Err(EngineError::Failed(error)),
                        None => Err(EngineError::unavailable(format!(
                            "object {} was released",
                            object
                        ))),
                    };
                }
                Some(RefStatus::Released) => {
                    return Err(EngineError::unavailable(format!(
                        "object {} has been released",
                        object
                    )))
                }
                Some(RefStatus::Pending) => match deadline {
                    Some(deadline) => {
                        if tokio::time::timeout_at(deadline, version.changed())
                            .await
                            .is_err()
                        {
                            return Err(EngineError::timeout(
                                "get",
                                timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                            ));
                        }
                    }
                    None => {
                        if version.changed().await.is_err() {
                            return Err(EngineError::unavailable("backend stopped"));
                        }
                    }
                },
            }
        }
    }

    async fn wait(
        &self,
        objects: &[ObjectId],
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectId>, Vec<ObjectId>)> {
        let mut version = self.shared.version.subscribe();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let (ready, not_ready): (Vec<ObjectId>, Vec<ObjectId>) = {
                let state = self.shared.state.lock();
                objects.iter().partition(|object| {
                    match state.statuses.get(*object) {
                        Some(status) => status.is_resolved(),
                        // No status record means a sealed driver put.
                        None => self.shared.store.lookup(**object).is_some(),
                    }
                })
            };
            if ready.len() >= num_ready.min(objects.len()) {
                return Ok((ready, not_ready));
            }
            let expired = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, version.changed())
                    .await
                    .is_err(),
                None => version.changed().await.is_err(),
            };
            if expired {
                return Ok((ready, not_ready));
            }
        }
    }

    fn put(&self, payload: Bytes) -> Result<WireRef> {
        self.ensure_running()?;
        let object = self.shared.ids.next_object_id();
        self.shared.store.put(object, ObjectPayload::Value(payload))?;
        Ok(WireRef::new(object, ProcessId::CONTROLLER))
    }

    fn release(&self, object: ObjectId) {
        let _ = self.shared.store.release(object, ProcessId::CONTROLLER);
    }

    async fn kill_actor(&self, handle: WireActorRef) -> Result<()> {
        let state = self.shared.state.lock();
        if let Some(slot) = state.actors.get(&handle.actor) {
            slot.dead.store(true, Ordering::Release);
            let _ = slot.tx.send(ActorMsg::Kill);
        }
        Ok(())
    }

    fn actor_status(&self, actor: ActorId) -> Option<ActorStatus> {
        let state = self.shared.state.lock();
        state.actors.get(&actor).map(|slot| {
            if slot.dead.load(Ordering::Acquire) {
                ActorStatus::Dead
            } else {
                ActorStatus::Alive
            }
        })
    }

    fn cluster_resources(&self) -> Vec<WorkerInfo> {
        let threads = self.threads.lock().len();
        (1..=threads as u32)
            .map(|rank| WorkerInfo::new(ProcessId(rank)))
            .collect()
    }

    async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Disconnect the channels so every thread's recv loop ends.
        self.shared.job_tx.lock().take();
        {
            let mut state = self.shared.state.lock();
            for slot in state.actors.values() {
                slot.dead.store(true, Ordering::Release);
            }
            state.actors.clear();
            state.waiting.clear();
        }
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let _ = tokio::task::spawn_blocking(move || {
            for thread in threads {
                if thread.join().is_err() {
                    warn!("pool thread panicked during shutdown");
                }
            }
        })
        .await;
        self.shared.store.clear();
        info!("thread-pool backend stopped");
    }
}
