//! Serializable failure object attached to errored results.
//!
//! When a task faults, the worker stores an `ErrorObject` in place of the
//! value, under the same object id. The error is inert until a caller
//! observes it through `get`; it never crashes the controller or another
//! worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The submitted function raised or faulted during execution.
    TaskExecution,
    /// An input reference was itself in error state; the dependent task was
    /// failed without executing.
    Dependency,
    /// The worker the task or actor was placed on stopped responding.
    WorkerLost,
    /// A call was issued to a killed or lost actor.
    ActorDead,
    /// A value could not be encoded or decoded for transfer. Fatal to the
    /// task, not to the process.
    Serialization,
    /// Transport-level failure. Fatal to the owning process because ordering
    /// guarantees no longer hold.
    Communication,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TaskExecution => "task execution error",
            ErrorKind::Dependency => "dependency error",
            ErrorKind::WorkerLost => "worker lost",
            ErrorKind::ActorDead => "actor dead",
            ErrorKind::Serialization => "serialization error",
            ErrorKind::Communication => "communication error",
        };
        f.write_str(name)
    }
}

/// A captured failure, serializable so it can be stored in the object store
/// and re-raised at `get` time on another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub kind: ErrorKind,
    pub message: String,
    /// Traceback-equivalent context: the chain of locations the failure
    /// passed through (function descriptor, task id, worker rank).
    pub context: Vec<String>,
}

impl ErrorObject {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Append one frame of context, preserving the original failure.
    pub fn with_context(mut self, frame: impl Into<String>) -> Self {
        self.context.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.context {
            write!(f, "\n  at {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorObject {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_frames_accumulate_in_order() {
        let err = ErrorObject::new(ErrorKind::TaskExecution, "divide by zero")
            .with_context("div(task-0.4)")
            .with_context("rank-2");
        assert_eq!(err.context.len(), 2);
        let rendered = err.to_string();
        assert!(rendered.contains("divide by zero"));
        assert!(rendered.contains("rank-2"));
    }

    #[test]
    fn error_object_survives_serialization() {
        let err = ErrorObject::new(ErrorKind::WorkerLost, "rank-3 missed heartbeats");
        let bytes = bincode::serialize(&err).unwrap();
        let back: ErrorObject = bincode::deserialize(&bytes).unwrap();
        assert_eq!(err, back);
    }
}
