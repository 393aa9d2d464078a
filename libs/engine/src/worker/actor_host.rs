//! Per-actor execution host.
//!
//! One host per actor instance, running on its home worker. The host owns
//! the actor state and executes calls strictly in the controller-assigned
//! sequence order, one at a time. An async method may suspend cooperatively;
//! the next queued call cannot start until the suspended one finishes, so
//! suspension never reorders the actor's history.

use futures::FutureExt;
use skein_types::{ActorId, ErrorKind, ErrorObject, ProcessId, TaskSpec, TaskTarget};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::registry::{Invocation, RemoteActor};
use crate::worker::executor::{panic_message, TaskContext};

/// A materialized call ready for the actor.
pub(crate) struct ReadyCall {
    pub spec: TaskSpec,
    pub call: Invocation,
    /// Set when an input reference resolved to a stored failure; the call
    /// fails in sequence without touching the actor.
    pub dep_failure: Option<ErrorObject>,
}

pub(crate) enum HostCommand {
    Call(ReadyCall),
    /// Fail everything queued; the in-flight call (if any) completes first.
    Kill,
}

/// Handle held by the worker loop.
pub(crate) struct ActorHost {
    actor: ActorId,
    tx: mpsc::UnboundedSender<HostCommand>,
    /// Set the moment the kill arrives, ahead of the command queue, so a
    /// call already queued never starts once the actor is condemned.
    dead: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ActorHost {
    /// Spawn the host loop around a freshly constructed instance.
    pub fn spawn(
        actor: ActorId,
        instance: Box<dyn RemoteActor>,
        ctx: Arc<TaskContext>,
        exec_slot: Arc<Mutex<()>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dead = Arc::new(AtomicBool::new(false));
        let join = tokio::spawn(host_loop(
            actor,
            instance,
            rx,
            ctx,
            exec_slot,
            Arc::clone(&dead),
        ));
        Self {
            actor,
            tx,
            dead,
            join,
        }
    }

    pub fn submit(&self, call: ReadyCall) {
        // Host gone means the actor died; the controller already knows.
        let _ = self.tx.send(HostCommand::Call(call));
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::Release);
        let _ = self.tx.send(HostCommand::Kill);
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

async fn host_loop(
    actor: ActorId,
    mut instance: Box<dyn RemoteActor>,
    mut rx: mpsc::UnboundedReceiver<HostCommand>,
    ctx: Arc<TaskContext>,
    exec_slot: Arc<Mutex<()>>,
    dead: Arc<AtomicBool>,
) {
    let mut next_seq: u64 = 0;
    let mut buffered: BTreeMap<u64, ReadyCall> = BTreeMap::new();

    info!(actor = %actor, "actor host started");
    while let Some(command) = rx.recv().await {
        match command {
            HostCommand::Call(call) => {
                let seq = call_seq(&call.spec);
                if dead.load(Ordering::Acquire) {
                    fail_call(&ctx, call, &actor).await;
                    continue;
                }
                trace!(actor = %actor, seq, next_seq, "call queued");
                buffered.insert(seq, call);

                // Run every consecutively-sequenced call that has arrived.
                // Data for call n+1 may land before call n; the gap keeps
                // n+1 buffered until n has run. The kill flag is re-checked
                // per call: a kill lands mid-burst and the rest must fail.
                while let Some(call) = buffered.remove(&next_seq) {
                    if dead.load(Ordering::Acquire) {
                        fail_call(&ctx, call, &actor).await;
                    } else {
                        execute_call(&mut instance, &ctx, &exec_slot, call).await;
                    }
                    next_seq += 1;
                }
            }
            HostCommand::Kill => {
                debug!(actor = %actor, queued = buffered.len(), "actor killed");
                for (_, call) in std::mem::take(&mut buffered) {
                    fail_call(&ctx, call, &actor).await;
                }
                let error = ErrorObject::new(
                    ErrorKind::ActorDead,
                    format!("actor {} killed", actor),
                );
                if let Err(e) = ctx
                    .transport
                    .send(
                        ProcessId::CONTROLLER,
                        skein_codec::WireMessage::ActorDied { actor, error },
                    )
                    .await
                {
                    tracing::warn!(actor = %actor, error = %e, "actor death report failed");
                }
            }
        }
    }
    info!(actor = %actor, "actor host stopped");
}

fn call_seq(spec: &TaskSpec) -> u64 {
    match spec.target {
        TaskTarget::Actor { seq, .. } => seq,
        TaskTarget::Pool => unreachable!("pool task routed to actor host"),
    }
}

async fn execute_call(
    instance: &mut Box<dyn RemoteActor>,
    ctx: &Arc<TaskContext>,
    exec_slot: &Arc<Mutex<()>>,
    call: ReadyCall,
) {
    // One task or actor call in flight at a time on this worker.
    let _slot = exec_slot.lock().await;

    if let Some(failure) = call.dep_failure {
        ctx.finish(&call.spec, Err(failure)).await;
        return;
    }

    let spec = call.spec;
    let outcome = std::panic::AssertUnwindSafe(
        instance.call(spec.function.as_str(), call.call),
    )
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
        Err(ErrorObject::new(
            ErrorKind::TaskExecution,
            format!("actor method panicked: {}", panic_message(&panic)),
        )
        .with_context(format!("{}({})", spec.function, spec.task_id)))
    });
    ctx.finish(&spec, outcome).await;
}

async fn fail_call(ctx: &Arc<TaskContext>, call: ReadyCall, actor: &ActorId) {
    let error = ErrorObject::new(
        ErrorKind::ActorDead,
        format!("actor {} is dead; call {} dropped", actor, call.spec.task_id),
    );
    ctx.finish(&call.spec, Err(error)).await;
}
