//! Worker process: task execution and store hosting for one rank.

mod actor_host;
mod executor;
pub mod request_store;
pub mod task_store;

use skein_codec::WireMessage;
use skein_network::Transport;
use skein_store::ObjectStore;
use skein_types::{
    ActorId, ErrorKind, ErrorObject, ProcessId, TaskArg, TaskSpec, TaskTarget,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::registry::{ActorTypeRegistry, FunctionRegistry, Invocation};
use actor_host::{ActorHost, ReadyCall};
use executor::{Materialized, TaskContext};
use request_store::PendingRequestStore;
use task_store::PendingTaskStore;

/// One worker rank: an event loop over the transport plus a local store
/// shard. Executes one pool task or actor call at a time; parks work whose
/// input data has not arrived; serves peers' fetch requests.
pub struct WorkerProcess {
    config: EngineConfig,
    ctx: Arc<TaskContext>,
    functions: Arc<FunctionRegistry>,
    actor_types: Arc<ActorTypeRegistry>,
    task_store: PendingTaskStore,
    hosts: HashMap<ActorId, ActorHost>,
    /// Worker-wide execution slot: one task or actor call in flight.
    exec_slot: Arc<Mutex<()>>,
}

impl WorkerProcess {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        functions: Arc<FunctionRegistry>,
        actor_types: Arc<ActorTypeRegistry>,
    ) -> Self {
        let rank = transport.rank();
        assert!(!rank.is_controller(), "rank 0 is the controller");
        Self {
            config,
            ctx: Arc::new(TaskContext {
                rank,
                transport,
                store: Arc::new(ObjectStore::new(rank)),
                requests: Arc::new(PendingRequestStore::new()),
            }),
            functions,
            actor_types,
            task_store: PendingTaskStore::new(),
            hosts: HashMap::new(),
            exec_slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn rank(&self) -> ProcessId {
        self.ctx.rank
    }

    pub fn store(&self) -> Arc<ObjectStore> {
        Arc::clone(&self.ctx.store)
    }

    /// Run until shutdown. Consumes the worker; spawned once per rank.
    pub async fn run(mut self) {
        let heartbeat = {
            let transport = Arc::clone(&self.ctx.transport);
            let rank = self.ctx.rank;
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if transport
                        .send(ProcessId::CONTROLLER, WireMessage::WorkerHeartbeat { worker: rank })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        info!(rank = %self.ctx.rank, "worker loop started");
        loop {
            match self.ctx.transport.recv().await {
                Ok((from, message)) => {
                    trace!(rank = %self.ctx.rank, from = %from, kind = message.kind_name(), "worker recv");
                    if !self.handle_message(message).await {
                        break;
                    }
                }
                Err(e) => {
                    // Ordering can no longer be assumed; fatal to this rank.
                    error!(rank = %self.ctx.rank, error = %e, "worker transport failed");
                    break;
                }
            }
        }

        heartbeat.abort();
        for host in self.hosts.values() {
            host.abort();
        }
        self.ctx.store.clear();
        info!(rank = %self.ctx.rank, "worker loop stopped");
    }

    /// Returns `false` when the loop should stop.
    async fn handle_message(&mut self, message: WireMessage) -> bool {
        match message {
            WireMessage::SubmitTask { spec } => self.on_submit(spec).await,
            WireMessage::CreateActor {
                actor,
                type_name,
                args,
                kwargs,
            } => self.on_create_actor(actor, type_name.as_str(), args, kwargs).await,
            WireMessage::KillActor { actor } => self.on_kill_actor(actor).await,
            WireMessage::FetchObject { object, requester } => {
                self.ctx.serve_fetch(object, requester).await
            }
            WireMessage::ObjectData { object, payload } => {
                self.ctx.store.cache_remote(object, payload);
                self.ctx.requests.clear_requested(object);
                for spec in self.task_store.on_data(object) {
                    self.try_start(spec).await;
                }
            }
            WireMessage::AcquireRef { object, holder } => {
                if let Err(e) = self.ctx.store.acquire(object, holder) {
                    debug!(object = %object, error = %e, "acquire on missing entry");
                }
            }
            WireMessage::ReleaseRef { object, holder } => {
                if let Err(e) = self.ctx.store.release(object, holder) {
                    debug!(object = %object, error = %e, "release on missing entry");
                }
            }
            WireMessage::Shutdown => {
                debug!(rank = %self.ctx.rank, "shutdown received");
                return false;
            }
            other => {
                warn!(rank = %self.ctx.rank, kind = other.kind_name(), "unexpected message at worker")
            }
        }
        true
    }

    async fn on_submit(&mut self, spec: TaskSpec) {
        self.ctx.reserve_outputs(&spec);
        self.ctx.acquire_deps(&spec).await;
        self.try_start(spec).await;
    }

    async fn try_start(&mut self, spec: TaskSpec) {
        match self.ctx.materialize(&spec) {
            Materialized::Ready { call, dep_failure } => {
                self.launch(spec, call, dep_failure).await;
            }
            Materialized::Missing(missing) => {
                self.ctx.request_missing(&missing).await;
                self.task_store.park(spec, TaskContext::missing_set(&missing));
            }
        }
    }

    async fn launch(&mut self, spec: TaskSpec, call: Invocation, dep_failure: Option<ErrorObject>) {
        match spec.target {
            TaskTarget::Pool => {
                let ctx = Arc::clone(&self.ctx);
                let functions = Arc::clone(&self.functions);
                let slot = Arc::clone(&self.exec_slot);
                tokio::spawn(async move {
                    let _slot = slot.lock().await;
                    let outcome = match dep_failure {
                        Some(failure) => Err(failure),
                        None => ctx.invoke_function(&functions, &spec, call),
                    };
                    ctx.finish(&spec, outcome).await;
                });
            }
            TaskTarget::Actor { actor, .. } => match self.hosts.get(&actor) {
                Some(host) => host.submit(ReadyCall {
                    spec,
                    call,
                    dep_failure,
                }),
                None => {
                    // Constructor failed or never ran; the controller learns
                    // through the per-call failure.
                    let error = ErrorObject::new(
                        ErrorKind::ActorDead,
                        format!("actor {} has no live instance", actor),
                    );
                    self.ctx.finish(&spec, Err(error)).await;
                }
            },
        }
    }

    async fn on_create_actor(
        &mut self,
        actor: ActorId,
        type_name: &str,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) {
        let result = self
            .actor_types
            .get(type_name)
            .ok_or_else(|| {
                ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("actor type '{}' is not registered", type_name),
                )
            })
            .and_then(|factory| factory.create(constructor_invocation(args, kwargs)?));

        match result {
            Ok(instance) => {
                debug!(rank = %self.ctx.rank, actor = %actor, type_name, "actor instantiated");
                self.hosts.insert(
                    actor,
                    ActorHost::spawn(
                        actor,
                        instance,
                        Arc::clone(&self.ctx),
                        Arc::clone(&self.exec_slot),
                    ),
                );
            }
            Err(error) => {
                warn!(actor = %actor, error = %error, "actor construction failed");
                if let Err(e) = self
                    .ctx
                    .transport
                    .send(ProcessId::CONTROLLER, WireMessage::ActorDied { actor, error })
                    .await
                {
                    warn!(actor = %actor, error = %e, "actor death report failed");
                }
            }
        }
    }

    async fn on_kill_actor(&mut self, actor: ActorId) {
        // Calls still waiting for data die with the actor.
        for spec in self.task_store.drain_actor(actor) {
            let error = ErrorObject::new(
                ErrorKind::ActorDead,
                format!("actor {} killed before call {} ran", actor, spec.task_id),
            );
            self.ctx.finish(&spec, Err(error)).await;
        }
        if let Some(host) = self.hosts.get(&actor) {
            host.kill();
        }
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("rank", &self.ctx.rank)
            .field("parked_tasks", &self.task_store.len())
            .field("actors", &self.hosts.len())
            .finish()
    }
}

/// Constructor arguments travel inline with `CreateActor`; references would
/// need the full materialization path and are rejected up front.
fn constructor_invocation(
    args: Vec<TaskArg>,
    kwargs: Vec<(String, TaskArg)>,
) -> Result<Invocation, ErrorObject> {
    let mut call = Invocation::default();
    for arg in args {
        match arg {
            TaskArg::Inline(bytes) => call.args.push(bytes),
            TaskArg::Ref(wire) => {
                return Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("constructor arguments must be inline values, got reference {}", wire),
                ))
            }
        }
    }
    for (name, arg) in kwargs {
        match arg {
            TaskArg::Inline(bytes) => call.kwargs.push((name, bytes)),
            TaskArg::Ref(wire) => {
                return Err(ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("constructor arguments must be inline values, got reference {}", wire),
                ))
            }
        }
    }
    Ok(call)
}
