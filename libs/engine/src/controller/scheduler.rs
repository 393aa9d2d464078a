//! Task scheduler: dependency table and ready queues.
//!
//! A task is *ready* once every object reference it depends on has resolved.
//! Pool tasks fail fast at the scheduler when any dependency errors (no
//! partial execution). Actor-targeted tasks are different: an errored
//! dependency still counts as *resolved* so the call reaches its home worker
//! and fails there in sequence. Skipping it at the controller would leave a
//! hole in the actor's call order.

use parking_lot::Mutex;
use skein_types::{ObjectId, ProcessId, TaskId, TaskSpec};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Dependency status as seen by the directory at scheduling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepState {
    Ready,
    Pending,
    Error,
}

/// Outcome of submitting one task to the scheduler.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// All dependencies resolved; the task is queued for dispatch.
    Ready,
    /// Parked until the listed dependencies resolve.
    Waiting,
    /// A pool task had an errored dependency; it never executes.
    FailedDependency { failed: Vec<ObjectId> },
}

#[derive(Debug)]
struct WaitingTask {
    spec: TaskSpec,
    submit_seq: u64,
    remaining: HashSet<ObjectId>,
}

/// A task handed to a worker and not yet reported complete.
#[derive(Debug, Clone)]
pub struct InFlightTask {
    pub spec: TaskSpec,
    pub worker: ProcessId,
}

#[derive(Debug, Default)]
struct SchedState {
    next_seq: u64,
    waiting: HashMap<TaskId, WaitingTask>,
    dep_index: HashMap<ObjectId, Vec<TaskId>>,
    /// FIFO by readiness time; simultaneous readiness ordered by submission.
    ready_pool: VecDeque<TaskSpec>,
    ready_actor: VecDeque<TaskSpec>,
    in_flight: HashMap<TaskId, InFlightTask>,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    state: Mutex<SchedState>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a task, classifying each dependency through `dep_state`.
    pub fn submit(
        &self,
        spec: TaskSpec,
        dep_state: impl Fn(ObjectId) -> DepState,
    ) -> SubmitOutcome {
        let mut state = self.state.lock();
        let submit_seq = state.next_seq;
        state.next_seq += 1;

        let is_actor = spec.is_actor_task();
        let mut remaining = HashSet::new();
        let mut failed = Vec::new();
        for dep in spec.ref_dependencies() {
            match dep_state(dep.object) {
                DepState::Ready => {}
                DepState::Pending => {
                    remaining.insert(dep.object);
                }
                DepState::Error => {
                    if is_actor {
                        // Resolved for ordering purposes; fails at the host.
                    } else {
                        failed.push(dep.object);
                    }
                }
            }
        }

        if !failed.is_empty() {
            debug!(task = %spec.task_id, deps = failed.len(), "fail-fast on errored dependencies");
            return SubmitOutcome::FailedDependency { failed };
        }

        if remaining.is_empty() {
            trace!(task = %spec.task_id, "ready at submission");
            Self::push_ready(&mut state, spec);
            return SubmitOutcome::Ready;
        }

        let task_id = spec.task_id;
        for dep in &remaining {
            state.dep_index.entry(*dep).or_default().push(task_id);
        }
        trace!(task = %task_id, pending = remaining.len(), "parked on dependencies");
        state.waiting.insert(
            task_id,
            WaitingTask {
                spec,
                submit_seq,
                remaining,
            },
        );
        SubmitOutcome::Waiting
    }

    fn push_ready(state: &mut SchedState, spec: TaskSpec) {
        if spec.is_actor_task() {
            state.ready_actor.push_back(spec);
        } else {
            state.ready_pool.push_back(spec);
        }
    }

    /// An object resolved `Ready`: move tasks whose last dependency this was
    /// into the ready queues, in submission order.
    pub fn on_object_ready(&self, object: ObjectId) {
        let mut state = self.state.lock();
        let Some(waiters) = state.dep_index.remove(&object) else {
            return;
        };

        let mut now_ready = Vec::new();
        for task_id in waiters {
            if let Some(task) = state.waiting.get_mut(&task_id) {
                task.remaining.remove(&object);
                if task.remaining.is_empty() {
                    let task = state.waiting.remove(&task_id).unwrap();
                    now_ready.push(task);
                }
            }
        }

        now_ready.sort_by_key(|task| task.submit_seq);
        for task in now_ready {
            trace!(task = %task.spec.task_id, "dependencies satisfied");
            Self::push_ready(&mut state, task.spec);
        }
    }

    /// An object resolved `Error`: pool tasks waiting on it fail fast and
    /// are returned; actor tasks treat the dependency as satisfied.
    pub fn on_object_error(&self, object: ObjectId) -> Vec<TaskSpec> {
        let mut state = self.state.lock();
        let Some(waiters) = state.dep_index.remove(&object) else {
            return Vec::new();
        };

        let mut failed = Vec::new();
        let mut now_ready = Vec::new();
        for task_id in waiters {
            let Some(task) = state.waiting.get_mut(&task_id) else {
                continue;
            };
            if task.spec.is_actor_task() {
                task.remaining.remove(&object);
                if task.remaining.is_empty() {
                    now_ready.push(state.waiting.remove(&task_id).unwrap());
                }
            } else {
                let task = state.waiting.remove(&task_id).unwrap();
                // Unhook the task from its other pending dependencies.
                for dep in &task.remaining {
                    if let Some(index) = state.dep_index.get_mut(dep) {
                        index.retain(|id| *id != task_id);
                    }
                }
                failed.push(task.spec);
            }
        }

        now_ready.sort_by_key(|task| task.submit_seq);
        for task in now_ready {
            Self::push_ready(&mut state, task.spec);
        }
        failed
    }

    pub fn pop_ready_pool(&self) -> Option<TaskSpec> {
        self.state.lock().ready_pool.pop_front()
    }

    /// Put a popped pool task back at the head (no idle worker was
    /// available), preserving FIFO order.
    pub fn requeue_pool_front(&self, spec: TaskSpec) {
        self.state.lock().ready_pool.push_front(spec);
    }

    pub fn pop_ready_actor(&self) -> Option<TaskSpec> {
        self.state.lock().ready_actor.pop_front()
    }

    /// Record a dispatched task.
    pub fn dispatched(&self, spec: TaskSpec, worker: ProcessId) {
        let mut state = self.state.lock();
        state
            .in_flight
            .insert(spec.task_id, InFlightTask { spec, worker });
    }

    /// A worker reported the task done or failed.
    pub fn completed(&self, task: TaskId) -> Option<InFlightTask> {
        self.state.lock().in_flight.remove(&task)
    }

    /// Drain every task in flight on a lost worker.
    pub fn drain_worker(&self, worker: ProcessId) -> Vec<InFlightTask> {
        let mut state = self.state.lock();
        let task_ids: Vec<_> = state
            .in_flight
            .iter()
            .filter(|(_, task)| task.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        task_ids
            .into_iter()
            .filter_map(|id| state.in_flight.remove(&id))
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::{FunctionDescriptor, TaskArg, TaskTarget, WireRef};

    fn oid(seq: u64) -> ObjectId {
        ObjectId::new(ProcessId::CONTROLLER, seq)
    }

    fn pool_spec(task_seq: u64, deps: &[ObjectId]) -> TaskSpec {
        TaskSpec {
            task_id: TaskId::new(ProcessId::CONTROLLER, task_seq),
            function: FunctionDescriptor::new("f"),
            args: deps
                .iter()
                .map(|dep| TaskArg::Ref(WireRef::new(*dep, ProcessId::CONTROLLER)))
                .collect(),
            kwargs: vec![],
            outputs: vec![oid(1000 + task_seq)],
            target: TaskTarget::Pool,
        }
    }

    #[test]
    fn no_deps_means_ready_at_submission() {
        let scheduler = TaskScheduler::new();
        let outcome = scheduler.submit(pool_spec(0, &[]), |_| DepState::Ready);
        assert!(matches!(outcome, SubmitOutcome::Ready));
        assert!(scheduler.pop_ready_pool().is_some());
        assert!(scheduler.pop_ready_pool().is_none());
    }

    #[test]
    fn task_waits_for_pending_dep_then_becomes_ready() {
        let scheduler = TaskScheduler::new();
        let dep = oid(1);
        let outcome = scheduler.submit(pool_spec(0, &[dep]), |_| DepState::Pending);
        assert!(matches!(outcome, SubmitOutcome::Waiting));
        assert!(scheduler.pop_ready_pool().is_none());

        scheduler.on_object_ready(dep);
        let spec = scheduler.pop_ready_pool().unwrap();
        assert_eq!(spec.task_id, TaskId::new(ProcessId::CONTROLLER, 0));
    }

    #[test]
    fn simultaneous_readiness_preserves_submission_order() {
        let scheduler = TaskScheduler::new();
        let dep = oid(1);
        scheduler.submit(pool_spec(5, &[dep]), |_| DepState::Pending);
        scheduler.submit(pool_spec(3, &[dep]), |_| DepState::Pending);
        scheduler.on_object_ready(dep);

        let first = scheduler.pop_ready_pool().unwrap();
        let second = scheduler.pop_ready_pool().unwrap();
        assert_eq!(first.task_id.seq, 5);
        assert_eq!(second.task_id.seq, 3);
    }

    #[test]
    fn errored_dep_fails_waiting_pool_task_without_running() {
        let scheduler = TaskScheduler::new();
        let dep_bad = oid(1);
        let dep_other = oid(2);
        scheduler.submit(pool_spec(0, &[dep_bad, dep_other]), |_| DepState::Pending);

        let failed = scheduler.on_object_error(dep_bad);
        assert_eq!(failed.len(), 1);
        assert_eq!(scheduler.waiting_count(), 0);
        // The other dependency resolving later must not resurrect the task.
        scheduler.on_object_ready(dep_other);
        assert!(scheduler.pop_ready_pool().is_none());
    }

    #[test]
    fn errored_dep_counts_as_resolved_for_actor_tasks() {
        let scheduler = TaskScheduler::new();
        let dep = oid(1);
        let actor = skein_types::ActorId::new(ProcessId::CONTROLLER, 0);
        let mut spec = pool_spec(0, &[dep]);
        spec.target = TaskTarget::Actor { actor, seq: 0 };

        scheduler.submit(spec, |_| DepState::Pending);
        let failed = scheduler.on_object_error(dep);
        assert!(failed.is_empty());
        assert!(scheduler.pop_ready_actor().is_some());
    }

    #[test]
    fn drain_worker_returns_only_its_tasks() {
        let scheduler = TaskScheduler::new();
        scheduler.dispatched(pool_spec(0, &[]), ProcessId(1));
        scheduler.dispatched(pool_spec(1, &[]), ProcessId(2));

        let drained = scheduler.drain_worker(ProcessId(1));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].worker, ProcessId(1));
        assert_eq!(scheduler.in_flight_count(), 1);
    }
}
