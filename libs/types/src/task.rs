//! Task descriptors: what to run, with which arguments, targeting whom.

use crate::ids::{ActorId, ObjectId, TaskId};
use crate::refs::WireRef;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a registered remote function or actor method.
///
/// Skein never ships code across the wire; both sides agree on a registry of
/// callables keyed by descriptor. This keeps the serialization surface closed
/// and makes `SerializationError` a per-task failure rather than a protocol
/// hazard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDescriptor(pub String);

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One task argument: either a value serialized inline or a reference to an
/// object somewhere in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskArg {
    /// Serialized value shipped with the task itself.
    Inline(Bytes),
    /// Reference the executing worker must resolve to a concrete value
    /// before invocation, fetching across processes if necessary.
    Ref(WireRef),
}

impl TaskArg {
    pub fn as_ref(&self) -> Option<&WireRef> {
        match self {
            TaskArg::Ref(wire) => Some(wire),
            TaskArg::Inline(_) => None,
        }
    }
}

/// Where a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskTarget {
    /// Any idle worker, chosen by the controller.
    Pool,
    /// A specific actor; `seq` is the controller-assigned position in that
    /// actor's call order, identical for every caller.
    Actor { actor: ActorId, seq: u64 },
}

/// Immutable description of a submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub function: FunctionDescriptor,
    pub args: Vec<TaskArg>,
    pub kwargs: Vec<(String, TaskArg)>,
    /// Output object ids, pre-allocated by the submitter. Length equals
    /// `num_returns`; empty for fire-and-forget submissions.
    pub outputs: Vec<ObjectId>,
    pub target: TaskTarget,
}

impl TaskSpec {
    /// Object ids this task still depends on, in argument order.
    pub fn ref_dependencies(&self) -> impl Iterator<Item = &WireRef> {
        self.args
            .iter()
            .chain(self.kwargs.iter().map(|(_, arg)| arg))
            .filter_map(TaskArg::as_ref)
    }

    pub fn num_returns(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_actor_task(&self) -> bool {
        matches!(self.target, TaskTarget::Actor { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProcessId;

    #[test]
    fn ref_dependencies_cover_args_and_kwargs() {
        let controller = ProcessId::CONTROLLER;
        let dep_a = WireRef::new(ObjectId::new(controller, 1), controller);
        let dep_b = WireRef::new(ObjectId::new(controller, 2), controller);
        let spec = TaskSpec {
            task_id: TaskId::new(controller, 0),
            function: "add".into(),
            args: vec![TaskArg::Ref(dep_a), TaskArg::Inline(Bytes::from_static(b"x"))],
            kwargs: vec![("rhs".into(), TaskArg::Ref(dep_b))],
            outputs: vec![ObjectId::new(controller, 3)],
            target: TaskTarget::Pool,
        };

        let deps: Vec<_> = spec.ref_dependencies().copied().collect();
        assert_eq!(deps, vec![dep_a, dep_b]);
        assert_eq!(spec.num_returns(), 1);
        assert!(!spec.is_actor_task());
    }
}
