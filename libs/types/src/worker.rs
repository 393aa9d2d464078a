//! Worker state as tracked by the controller.

use crate::ids::{ProcessId, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker process.
///
/// Mutated only by the controller, driven by messages from the worker:
/// `Idle → Busy` on assignment, back to `Idle` on completion, `Dead` on
/// missed heartbeats. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Idle,
    Busy,
    Dead,
}

/// Controller-side record of one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub process_id: ProcessId,
    pub status: WorkerStatus,
    /// The pool task currently executing, if any. Actor calls are tracked by
    /// the actor host, not here.
    pub current_task_id: Option<TaskId>,
}

impl WorkerInfo {
    pub fn new(process_id: ProcessId) -> Self {
        Self {
            process_id,
            status: WorkerStatus::Idle,
            current_task_id: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Idle
    }
}
