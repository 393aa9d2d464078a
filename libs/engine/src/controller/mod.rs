//! The controller: rank 0 of the process group.
//!
//! Single source of truth for object ownership, actor placement and worker
//! state. The driver (application code on rank 0) calls the public methods;
//! the event loop in [`Controller::run`] consumes worker messages and the
//! heartbeat clock. Workers never decide placement themselves.

pub mod directory;
pub mod scheduler;
pub mod workers;

use bytes::Bytes;
use skein_codec::{ObjectPayload, WireMessage};
use skein_network::Transport;
use skein_store::ObjectStore;
use skein_types::{
    ActorId, ActorStatus, ErrorKind, ErrorObject, FunctionDescriptor, IdAllocator, ObjectId,
    ProcessId, RefStatus, TaskArg, TaskId, TaskSpec, TaskTarget, WireActorRef, WireRef, WorkerInfo,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use directory::ObjectDirectory;
use scheduler::{DepState, SubmitOutcome, TaskScheduler};
use workers::WorkerTable;

pub use directory::ObjectState;

/// Shared controller handle; cheap to clone, passed to every driver call.
pub type ControllerHandle = Arc<Controller>;

#[derive(Debug)]
struct ActorRecord {
    home: ProcessId,
    status: ActorStatus,
    /// Next submission sequence number; defines the call order every caller
    /// observes.
    next_seq: u64,
}

pub struct Controller {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    /// Rank-0 store shard: driver `put`s and locally sealed failures.
    store: Arc<ObjectStore>,
    ids: IdAllocator,
    directory: ObjectDirectory,
    scheduler: TaskScheduler,
    workers: WorkerTable,
    actors: Mutex<HashMap<ActorId, ActorRecord>>,
    /// Driver fetches awaiting an `ObjectData` reply, keyed by object.
    pending_fetches: Mutex<HashMap<ObjectId, Vec<oneshot::Sender<ObjectPayload>>>>,
    /// Remote fetch requests for controller-owned objects not yet sealed.
    parked_requests: Mutex<HashMap<ObjectId, Vec<ProcessId>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Controller {
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> ControllerHandle {
        let group_size = transport.group_size();
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            transport,
            store: Arc::new(ObjectStore::new(ProcessId::CONTROLLER)),
            ids: IdAllocator::new(ProcessId::CONTROLLER),
            directory: ObjectDirectory::new(),
            scheduler: TaskScheduler::new(),
            workers: WorkerTable::new(group_size),
            actors: Mutex::new(HashMap::new()),
            pending_fetches: Mutex::new(HashMap::new()),
            parked_requests: Mutex::new(HashMap::new()),
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Driver-facing operations
    // ------------------------------------------------------------------

    /// Store a driver-local value; the controller owns the entry.
    pub fn put_object(&self, payload: Bytes) -> Result<WireRef> {
        let object = self.ids.next_object_id();
        self.store.put(object, ObjectPayload::Value(payload))?;
        self.directory.register_sealed(object, ProcessId::CONTROLLER);
        debug!(object = %object, "put");
        Ok(WireRef::new(object, ProcessId::CONTROLLER))
    }

    /// Submit a pool task. Returns one reference per declared result.
    pub async fn submit_task(
        &self,
        function: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.ensure_running()?;
        let task_id = self.ids.next_task_id();
        let outputs: Vec<ObjectId> = (0..num_returns).map(|_| self.ids.next_object_id()).collect();
        for output in &outputs {
            self.directory.register_pending(*output, task_id);
        }

        let spec = TaskSpec {
            task_id,
            function,
            args,
            kwargs,
            outputs: outputs.clone(),
            target: TaskTarget::Pool,
        };
        debug!(task = %task_id, function = %spec.function, returns = num_returns, "submit");

        self.acquire_task_deps(&spec).await;
        match self
            .scheduler
            .submit(spec.clone(), |object| self.dep_state(object))
        {
            SubmitOutcome::Ready => self.pump().await,
            SubmitOutcome::Waiting => {}
            SubmitOutcome::FailedDependency { failed } => {
                let error = dependency_failure(&spec, &failed);
                self.fail_task_locally(&spec, error).await;
                self.pump().await;
            }
        }

        Ok(outputs
            .into_iter()
            .map(|object| WireRef::new(object, ProcessId::CONTROLLER))
            .collect())
    }

    /// Create an actor, pinning it to a worker chosen by placement policy.
    /// Constructor arguments are shipped inline with the creation message.
    pub async fn create_actor(
        &self,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> Result<WireActorRef> {
        self.ensure_running()?;
        let home = self
            .workers
            .place_actor()
            .ok_or_else(|| EngineError::unavailable("no live worker to host the actor"))?;
        let actor = self.ids.next_actor_id();
        self.actors.lock().insert(
            actor,
            ActorRecord {
                home,
                status: ActorStatus::Alive,
                next_seq: 0,
            },
        );
        info!(actor = %actor, home = %home, type_name = %type_name, "actor created");
        self.transport
            .send(
                home,
                WireMessage::CreateActor {
                    actor,
                    type_name,
                    args,
                    kwargs,
                },
            )
            .await?;
        Ok(WireActorRef::new(actor, home))
    }

    /// Submit a method call on an actor. The controller assigns the call its
    /// position in the actor's order; every caller observes the same order.
    pub async fn submit_actor_call(
        &self,
        handle: WireActorRef,
        method: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.ensure_running()?;
        let (seq, home, dead) = {
            let mut actors = self.actors.lock();
            let record = actors.get_mut(&handle.actor).ok_or_else(|| {
                EngineError::unavailable(format!("unknown actor {}", handle.actor))
            })?;
            let seq = record.next_seq;
            record.next_seq += 1;
            let dead =
                record.status == ActorStatus::Dead || self.workers.is_dead(record.home);
            (seq, record.home, dead)
        };

        let task_id = self.ids.next_task_id();
        let outputs: Vec<ObjectId> = (0..num_returns).map(|_| self.ids.next_object_id()).collect();
        for output in &outputs {
            self.directory.register_pending(*output, task_id);
        }
        trace!(actor = %handle.actor, seq, method = %method, "actor call");

        let spec = TaskSpec {
            task_id,
            function: method,
            args,
            kwargs,
            outputs: outputs.clone(),
            target: TaskTarget::Actor {
                actor: handle.actor,
                seq,
            },
        };

        if dead {
            let error = ErrorObject::new(
                ErrorKind::ActorDead,
                format!("call to dead actor {}", handle.actor),
            )
            .with_context(format!("{}({})", spec.function, spec.task_id));
            self.fail_task_locally(&spec, error).await;
            self.pump().await;
        } else {
            self.acquire_task_deps(&spec).await;
            match self
                .scheduler
                .submit(spec, |object| self.dep_state(object))
            {
                SubmitOutcome::Ready => self.pump().await,
                SubmitOutcome::Waiting => {}
                // Actor tasks never fail-fast on dependencies; they fail in
                // sequence at the host.
                SubmitOutcome::FailedDependency { .. } => unreachable!(),
            }
        }

        Ok(outputs
            .into_iter()
            .map(|object| WireRef::new(object, home))
            .collect())
    }

    /// Resolve one object to its payload, fetching across processes if
    /// needed. `timeout` bounds only this wait, never the producing task.
    pub async fn get_payload(
        &self,
        object: ObjectId,
        timeout: Option<Duration>,
    ) -> Result<ObjectPayload> {
        let deadline = timeout.map(Deadline::after);
        let mut version = self.directory.subscribe();
        loop {
            let state = self
                .directory
                .state(object)
                .ok_or_else(|| EngineError::unavailable(format!("unknown object {}", object)))?;
            match state.status {
                RefStatus::Released => {
                    return Err(EngineError::unavailable(format!(
                        "object {} has been released",
                        object
                    )))
                }
                RefStatus::Ready | RefStatus::Error => {
                    if let Some(payload) = self.store.lookup(object) {
                        return Ok(payload);
                    }
                    if state.owner.is_controller() {
                        return Err(EngineError::unavailable(format!(
                            "object {} no longer in local store",
                            object
                        )));
                    }
                    if self.workers.is_dead(state.owner) {
                        return Ok(ObjectPayload::Error(
                            ErrorObject::new(
                                ErrorKind::WorkerLost,
                                format!("owner {} of {} is lost", state.owner, object),
                            ),
                        ));
                    }
                    return self.fetch_remote(object, state.owner, deadline).await;
                }
                RefStatus::Pending => {
                    self.await_version_change(&mut version, deadline, "get").await?;
                }
            }
        }
    }

    /// Split `objects` into (resolved, unresolved), waiting until at least
    /// `num_ready` are resolved or the timeout elapses. Returns immediately
    /// with the current split when enough are already resolved.
    pub async fn wait(
        &self,
        objects: &[ObjectId],
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectId>, Vec<ObjectId>)> {
        let deadline = timeout.map(Deadline::after);
        let mut version = self.directory.subscribe();
        loop {
            let mut ready = Vec::new();
            let mut not_ready = Vec::new();
            for object in objects {
                let resolved = self
                    .directory
                    .state(*object)
                    .map(|state| state.status.is_resolved())
                    .unwrap_or(false);
                if resolved {
                    ready.push(*object);
                } else {
                    not_ready.push(*object);
                }
            }
            if ready.len() >= num_ready.min(objects.len()) {
                return Ok((ready, not_ready));
            }
            if self
                .await_version_change(&mut version, deadline, "wait")
                .await
                .is_err()
            {
                // Timeout bounds the wait; return whatever is resolved now.
                return Ok((ready, not_ready));
            }
        }
    }

    /// Drop the driver's reference to an object.
    pub async fn release_object(&self, object: ObjectId) {
        match self.directory.note_release(object) {
            None => {} // deferred until resolution, or already gone
            Some(state) => self.forward_release(object, state.owner).await,
        }
    }

    /// Kill an actor: future calls fail immediately; queued calls are failed
    /// by the host; an executing call runs to completion first.
    pub async fn kill_actor(&self, handle: WireActorRef) -> Result<()> {
        let home = {
            let mut actors = self.actors.lock();
            let record = actors.get_mut(&handle.actor).ok_or_else(|| {
                EngineError::unavailable(format!("unknown actor {}", handle.actor))
            })?;
            if record.status == ActorStatus::Dead {
                return Ok(());
            }
            record.status = ActorStatus::Dead;
            record.home
        };
        info!(actor = %handle.actor, "kill requested");
        if !self.workers.is_dead(home) {
            self.transport
                .send(home, WireMessage::KillActor { actor: handle.actor })
                .await?;
        }
        Ok(())
    }

    pub fn actor_status(&self, actor: ActorId) -> Option<ActorStatus> {
        self.actors.lock().get(&actor).map(|record| record.status)
    }

    /// Worker states, rank-ordered.
    pub fn cluster_snapshot(&self) -> Vec<WorkerInfo> {
        self.workers.snapshot()
    }

    pub fn object_state(&self, object: ObjectId) -> Option<ObjectState> {
        self.directory.state(object)
    }

    /// Broadcast shutdown and stop the event loop. Idempotent.
    pub async fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        info!("controller shutting down");
        if let Err(e) = self.transport.broadcast(WireMessage::Shutdown).await {
            warn!(error = %e, "shutdown broadcast failed");
        }
        let _ = self.shutdown_tx.send(true);
        self.store.clear();
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            Err(EngineError::unavailable("engine is shut down"))
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Run the coordination loop until shutdown. Spawned once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so workers get a full
        // interval before accounting starts.
        heartbeat.tick().await;

        info!(group_size = self.transport.group_size(), "controller loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = heartbeat.tick() => self.check_liveness().await,
                received = self.transport.recv() => match received {
                    Ok((from, message)) => self.handle_message(from, message).await,
                    Err(e) => {
                        // Transport failure is fatal to this process.
                        error!(error = %e, "controller transport failed");
                        break;
                    }
                },
            }
        }
        info!("controller loop stopped");
    }

    async fn handle_message(&self, from: ProcessId, message: WireMessage) {
        trace!(from = %from, kind = message.kind_name(), "controller recv");
        match message {
            WireMessage::WorkerHeartbeat { worker } => self.workers.record_heartbeat(worker),
            WireMessage::TaskDone {
                task,
                worker,
                outputs,
            } => self.on_task_done(task, worker, outputs).await,
            WireMessage::TaskFailed {
                task,
                worker,
                outputs,
                error,
            } => self.on_task_failed(task, worker, outputs, error).await,
            WireMessage::FetchObject { object, requester } => {
                self.on_fetch_request(object, requester).await
            }
            WireMessage::ObjectData { object, payload } => {
                self.on_object_data(object, payload)
            }
            WireMessage::AcquireRef { object, holder } => {
                if let Err(e) = self.store.acquire(object, holder) {
                    debug!(object = %object, error = %e, "acquire on missing entry");
                }
            }
            WireMessage::ReleaseRef { object, holder } => {
                match self.store.release(object, holder) {
                    Ok(true) => self.directory.mark_released(object),
                    Ok(false) => {}
                    Err(e) => debug!(object = %object, error = %e, "release on missing entry"),
                }
            }
            WireMessage::ActorDied { actor, error } => {
                warn!(actor = %actor, error = %error, "actor died");
                let home = {
                    let mut actors = self.actors.lock();
                    actors.get_mut(&actor).map(|record| {
                        record.status = ActorStatus::Dead;
                        record.home
                    })
                };
                if let Some(home) = home {
                    self.workers.actor_torn_down(home);
                }
            }
            other => warn!(from = %from, kind = other.kind_name(), "unexpected message at controller"),
        }
    }

    async fn on_task_done(&self, task: TaskId, worker: ProcessId, outputs: Vec<ObjectId>) {
        debug!(task = %task, worker = %worker, "task done");
        let in_flight = self.scheduler.completed(task);
        if matches!(
            in_flight.as_ref().map(|t| &t.spec.target),
            Some(TaskTarget::Pool)
        ) {
            self.workers.mark_idle(worker);
        }
        for object in outputs {
            let deferred = self.directory.mark_ready(object, worker);
            self.forward_deferred(object, worker, deferred).await;
            self.scheduler.on_object_ready(object);
        }
        if let Some(task) = in_flight {
            self.release_task_deps(&task.spec).await;
        }
        self.pump().await;
    }

    async fn on_task_failed(
        &self,
        task: TaskId,
        worker: ProcessId,
        outputs: Vec<ObjectId>,
        error: ErrorObject,
    ) {
        debug!(task = %task, worker = %worker, error = %error, "task failed");
        let in_flight = self.scheduler.completed(task);
        if matches!(
            in_flight.as_ref().map(|t| &t.spec.target),
            Some(TaskTarget::Pool)
        ) {
            self.workers.mark_idle(worker);
        }
        // The worker sealed the failure under each output id; propagate.
        for object in outputs {
            self.propagate_error(object, worker).await;
        }
        if let Some(task) = in_flight {
            self.release_task_deps(&task.spec).await;
        }
        self.pump().await;
    }

    async fn on_fetch_request(&self, object: ObjectId, requester: ProcessId) {
        if let Some(payload) = self.store.get_owned(object) {
            self.send_object_data(requester, object, payload).await;
        } else {
            trace!(object = %object, requester = %requester, "parking fetch request");
            self.parked_requests
                .lock()
                .entry(object)
                .or_default()
                .push(requester);
        }
    }

    fn on_object_data(&self, object: ObjectId, payload: ObjectPayload) {
        self.store.cache_remote(object, payload.clone());
        let waiters = self.pending_fetches.lock().remove(&object);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(payload.clone());
            }
        }
    }

    async fn send_object_data(&self, to: ProcessId, object: ObjectId, payload: ObjectPayload) {
        if let Err(e) = self
            .transport
            .send(to, WireMessage::ObjectData { object, payload })
            .await
        {
            warn!(object = %object, to = %to, error = %e, "object data send failed");
        }
    }

    // ------------------------------------------------------------------
    // Failure propagation and liveness
    // ------------------------------------------------------------------

    /// Mark `object` errored (payload sealed at `owner`) and fail every
    /// dependent pool task transitively, without executing any of them.
    async fn propagate_error(&self, object: ObjectId, owner: ProcessId) {
        let mut queue = vec![(object, owner)];
        while let Some((object, owner)) = queue.pop() {
            let deferred = self.directory.mark_error(object, owner);
            self.forward_deferred(object, owner, deferred).await;

            for spec in self.scheduler.on_object_error(object) {
                let error = dependency_failure(&spec, &[object]);
                debug!(task = %spec.task_id, source = %object, "failing dependent task");
                for output in &spec.outputs {
                    if self
                        .store
                        .put(*output, ObjectPayload::Error(error.clone()))
                        .is_ok()
                    {
                        self.serve_parked_requests(*output).await;
                        queue.push((*output, ProcessId::CONTROLLER));
                    }
                }
                self.release_task_deps(&spec).await;
            }
        }
    }

    /// Fail a task that never reached a worker: seal the error locally and
    /// propagate through its outputs.
    async fn fail_task_locally(&self, spec: &TaskSpec, error: ErrorObject) {
        for output in &spec.outputs {
            if self
                .store
                .put(*output, ObjectPayload::Error(error.clone()))
                .is_ok()
            {
                self.propagate_error(*output, ProcessId::CONTROLLER).await;
                self.serve_parked_requests(*output).await;
            }
        }
        self.release_task_deps(spec).await;
    }

    async fn serve_parked_requests(&self, object: ObjectId) {
        let waiters = self.parked_requests.lock().remove(&object);
        let Some(waiters) = waiters else { return };
        if let Some(payload) = self.store.get_owned(object) {
            for requester in waiters {
                self.send_object_data(requester, object, payload.clone()).await;
            }
        }
    }

    async fn check_liveness(&self) {
        for rank in self.workers.tick(self.config.heartbeat_miss_limit) {
            self.on_worker_lost(rank).await;
        }
    }

    async fn on_worker_lost(&self, rank: ProcessId) {
        warn!(worker = %rank, "worker lost; failing its assigned work");

        // Every task assigned to the worker fails with WorkerLost; the
        // authoritative error entry is resealed on the controller because the
        // worker's shard is gone.
        for in_flight in self.scheduler.drain_worker(rank) {
            let error = ErrorObject::new(
                ErrorKind::WorkerLost,
                format!("worker {} lost while running {}", rank, in_flight.spec.task_id),
            )
            .with_context(format!(
                "{}({})",
                in_flight.spec.function, in_flight.spec.task_id
            ));
            for output in &in_flight.spec.outputs {
                if self
                    .store
                    .put(*output, ObjectPayload::Error(error.clone()))
                    .is_ok()
                {
                    self.propagate_error(*output, ProcessId::CONTROLLER).await;
                }
            }
            self.release_task_deps(&in_flight.spec).await;
        }

        // Actors homed on the worker die with it.
        let dead_actors: Vec<ActorId> = {
            let mut actors = self.actors.lock();
            actors
                .iter_mut()
                .filter(|(_, record)| record.home == rank && record.status == ActorStatus::Alive)
                .map(|(actor, record)| {
                    record.status = ActorStatus::Dead;
                    *actor
                })
                .collect()
        };
        for actor in dead_actors {
            warn!(actor = %actor, worker = %rank, "actor dead with its worker");
        }

        // Driver fetches addressed to the lost worker will never answer.
        let mut stranded = Vec::new();
        {
            let mut fetches = self.pending_fetches.lock();
            let objects: Vec<ObjectId> = fetches.keys().copied().collect();
            for object in objects {
                let owned_by_dead = self
                    .directory
                    .state(object)
                    .map(|state| state.owner == rank)
                    .unwrap_or(false);
                if owned_by_dead {
                    if let Some(waiters) = fetches.remove(&object) {
                        stranded.push((object, waiters));
                    }
                }
            }
        }
        for (object, waiters) in stranded {
            let payload = ObjectPayload::Error(ErrorObject::new(
                ErrorKind::WorkerLost,
                format!("owner {} of {} is lost", rank, object),
            ));
            for waiter in waiters {
                let _ = waiter.send(payload.clone());
            }
        }

        self.pump().await;
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Push ready work to workers: actor calls straight to their homes, pool
    /// tasks FIFO to idle workers.
    async fn pump(&self) {
        while let Some(spec) = self.scheduler.pop_ready_actor() {
            self.dispatch_actor_task(spec).await;
        }
        loop {
            let Some(spec) = self.scheduler.pop_ready_pool() else { break };
            match self.workers.claim_first_idle(spec.task_id) {
                Some(worker) => self.dispatch(spec, worker).await,
                None => {
                    self.scheduler.requeue_pool_front(spec);
                    break;
                }
            }
        }
    }

    async fn dispatch_actor_task(&self, spec: TaskSpec) {
        let TaskTarget::Actor { actor, .. } = spec.target else {
            unreachable!("actor queue only holds actor tasks");
        };
        let (home, dead) = {
            let actors = self.actors.lock();
            match actors.get(&actor) {
                Some(record) => (
                    record.home,
                    record.status == ActorStatus::Dead || self.workers.is_dead(record.home),
                ),
                None => (ProcessId::CONTROLLER, true),
            }
        };
        if dead {
            let error = ErrorObject::new(
                ErrorKind::ActorDead,
                format!("actor {} died before call {} ran", actor, spec.task_id),
            );
            self.fail_task_locally(&spec, error).await;
            return;
        }
        self.dispatch(spec, home).await;
    }

    async fn dispatch(&self, spec: TaskSpec, worker: ProcessId) {
        let spec = self.rewrite_ref_owners(spec);
        trace!(task = %spec.task_id, worker = %worker, "dispatch");
        self.scheduler.dispatched(spec.clone(), worker);
        if let Err(e) = self
            .transport
            .send(worker, WireMessage::SubmitTask { spec })
            .await
        {
            // The heartbeat monitor converts a dead destination into
            // WorkerLost failures; nothing more to do here.
            warn!(worker = %worker, error = %e, "dispatch send failed");
        }
    }

    /// Stamp every reference argument with its authoritative owner so the
    /// executing worker acquires from and fetches from the right shard.
    fn rewrite_ref_owners(&self, mut spec: TaskSpec) -> TaskSpec {
        let rewrite = |arg: &mut TaskArg, directory: &ObjectDirectory| {
            if let TaskArg::Ref(wire) = arg {
                if let Some(state) = directory.state(wire.object) {
                    wire.owner = state.owner;
                }
            }
        };
        for arg in spec.args.iter_mut() {
            rewrite(arg, &self.directory);
        }
        for (_, arg) in spec.kwargs.iter_mut() {
            rewrite(arg, &self.directory);
        }
        spec
    }

    // ------------------------------------------------------------------
    // Reference-count plumbing
    // ------------------------------------------------------------------

    /// Hold one reference per dependency for the lifetime of an in-flight
    /// task, so no input can be freed while the task may still read it.
    async fn acquire_task_deps(&self, spec: &TaskSpec) {
        for dep in spec.ref_dependencies() {
            match self.directory.note_acquire(dep.object) {
                None => {} // deferred until the object resolves
                Some(state) => self.forward_acquire(dep.object, state.owner).await,
            }
        }
    }

    async fn release_task_deps(&self, spec: &TaskSpec) {
        for dep in spec.ref_dependencies() {
            match self.directory.note_release(dep.object) {
                None => {}
                Some(state) => self.forward_release(dep.object, state.owner).await,
            }
        }
    }

    async fn forward_deferred(
        &self,
        object: ObjectId,
        owner: ProcessId,
        deferred: directory::DeferredRefOps,
    ) {
        for _ in 0..deferred.acquires {
            self.forward_acquire(object, owner).await;
        }
        for _ in 0..deferred.releases {
            self.forward_release(object, owner).await;
        }
    }

    async fn forward_acquire(&self, object: ObjectId, owner: ProcessId) {
        if owner.is_controller() {
            if let Err(e) = self.store.acquire(object, ProcessId::CONTROLLER) {
                debug!(object = %object, error = %e, "local acquire on missing entry");
            }
        } else if !self.workers.is_dead(owner) {
            if let Err(e) = self
                .transport
                .send(
                    owner,
                    WireMessage::AcquireRef {
                        object,
                        holder: ProcessId::CONTROLLER,
                    },
                )
                .await
            {
                warn!(object = %object, owner = %owner, error = %e, "acquire send failed");
            }
        }
    }

    async fn forward_release(&self, object: ObjectId, owner: ProcessId) {
        if owner.is_controller() {
            match self.store.release(object, ProcessId::CONTROLLER) {
                Ok(true) => self.directory.mark_released(object),
                Ok(false) => {}
                Err(e) => debug!(object = %object, error = %e, "local release on missing entry"),
            }
        } else if !self.workers.is_dead(owner) {
            if let Err(e) = self
                .transport
                .send(
                    owner,
                    WireMessage::ReleaseRef {
                        object,
                        holder: ProcessId::CONTROLLER,
                    },
                )
                .await
            {
                warn!(object = %object, owner = %owner, error = %e, "release send failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Fetch plumbing
    // ------------------------------------------------------------------

    async fn fetch_remote(
        &self,
        object: ObjectId,
        owner: ProcessId,
        deadline: Option<Deadline>,
    ) -> Result<ObjectPayload> {
        let (tx, rx) = oneshot::channel();
        self.pending_fetches
            .lock()
            .entry(object)
            .or_default()
            .push(tx);
        self.transport
            .send(
                owner,
                WireMessage::FetchObject {
                    object,
                    requester: ProcessId::CONTROLLER,
                },
            )
            .await?;

        let received = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline.at.into(), rx)
                .await
                .map_err(|_| deadline.expired("get"))?,
            None => rx.await,
        };
        received.map_err(|_| EngineError::unavailable("fetch abandoned during shutdown"))
    }

    async fn await_version_change(
        &self,
        version: &mut watch::Receiver<u64>,
        deadline: Option<Deadline>,
        operation: &str,
    ) -> Result<()> {
        let changed = version.changed();
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline.at.into(), changed)
                .await
                .map_err(|_| deadline.expired(operation))?,
            None => changed.await,
        }
        .map_err(|_| EngineError::unavailable("directory closed"))
    }

    fn dep_state(&self, object: ObjectId) -> DepState {
        match self.directory.state(object) {
            Some(state) => match state.status {
                RefStatus::Ready => DepState::Ready,
                RefStatus::Pending => DepState::Pending,
                RefStatus::Error | RefStatus::Released => DepState::Error,
            },
            None => DepState::Error,
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("group_size", &self.transport.group_size())
            .field("in_flight", &self.scheduler.in_flight_count())
            .field("waiting", &self.scheduler.waiting_count())
            .finish()
    }
}

fn dependency_failure(spec: &TaskSpec, failed: &[ObjectId]) -> ErrorObject {
    let objects = failed
        .iter()
        .map(|object| object.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    ErrorObject::new(
        ErrorKind::Dependency,
        format!("input {} failed upstream", objects),
    )
    .with_context(format!("{}({})", spec.function, spec.task_id))
}

/// A deadline that remembers the wait it was derived from, so timeout errors
/// report the caller's bound.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout_ms: u64,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn expired(&self, operation: &str) -> EngineError {
        EngineError::timeout(operation, self.timeout_ms)
    }
}
