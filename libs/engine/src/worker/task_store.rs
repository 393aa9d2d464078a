//! Parked tasks: assigned to this worker but waiting for input data.
//!
//! The controller only dispatches a task once its dependencies have
//! resolved, so parking here is purely about data locality: the values exist
//! somewhere in the cluster, they just have not arrived yet.

use parking_lot::Mutex;
use skein_types::{ActorId, ObjectId, TaskSpec, TaskTarget};
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug)]
struct ParkedTask {
    spec: TaskSpec,
    missing: HashSet<ObjectId>,
}

#[derive(Debug, Default)]
pub struct PendingTaskStore {
    parked: Mutex<Vec<ParkedTask>>,
}

impl PendingTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, spec: TaskSpec, missing: HashSet<ObjectId>) {
        debug_assert!(!missing.is_empty());
        trace!(task = %spec.task_id, missing = missing.len(), "parking task for data");
        self.parked.lock().push(ParkedTask { spec, missing });
    }

    /// Data for `object` is now local; returns every task that has all of
    /// its inputs, in the order they were parked.
    pub fn on_data(&self, object: ObjectId) -> Vec<TaskSpec> {
        let mut parked = self.parked.lock();
        let mut ready = Vec::new();
        parked.retain_mut(|task| {
            task.missing.remove(&object);
            if task.missing.is_empty() {
                ready.push(task.spec.clone());
                false
            } else {
                true
            }
        });
        ready
    }

    /// Drop every parked call targeting `actor`, returning them so the
    /// caller can fail their outputs.
    pub fn drain_actor(&self, actor: ActorId) -> Vec<TaskSpec> {
        let mut parked = self.parked.lock();
        let mut drained = Vec::new();
        parked.retain(|task| match task.spec.target {
            TaskTarget::Actor { actor: target, .. } if target == actor => {
                drained.push(task.spec.clone());
                false
            }
            _ => true,
        });
        drained
    }

    pub fn len(&self) -> usize {
        self.parked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::{FunctionDescriptor, ProcessId, TaskId};

    fn oid(seq: u64) -> ObjectId {
        ObjectId::new(ProcessId(0), seq)
    }

    fn spec(task_seq: u64) -> TaskSpec {
        TaskSpec {
            task_id: TaskId::new(ProcessId(0), task_seq),
            function: FunctionDescriptor::new("f"),
            args: vec![],
            kwargs: vec![],
            outputs: vec![],
            target: TaskTarget::Pool,
        }
    }

    #[test]
    fn task_unparks_when_last_input_arrives() {
        let store = PendingTaskStore::new();
        store.park(spec(0), [oid(1), oid(2)].into_iter().collect());

        assert!(store.on_data(oid(1)).is_empty());
        let ready = store.on_data(oid(2));
        assert_eq!(ready.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn drain_actor_removes_only_matching_calls() {
        let store = PendingTaskStore::new();
        let actor = ActorId::new(ProcessId(0), 0);
        let mut actor_spec = spec(1);
        actor_spec.target = TaskTarget::Actor { actor, seq: 0 };
        store.park(actor_spec, [oid(1)].into_iter().collect());
        store.park(spec(2), [oid(1)].into_iter().collect());

        let drained = store.drain_actor(actor);
        assert_eq!(drained.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
