//! Process, object, task and actor identifiers.
//!
//! All ids are `(origin, seq)` pairs: the rank that allocated the id plus a
//! per-rank monotone counter. Two processes can never mint the same id, so no
//! round-trip to the controller is needed at allocation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable rank of a process in the fixed process group.
///
/// Rank 0 is the controller for the lifetime of the run; ranks `1..n` are
/// workers. Dynamic join/leave is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// The distinguished coordinating process.
    pub const CONTROLLER: ProcessId = ProcessId(0);

    pub fn is_controller(&self) -> bool {
        *self == Self::CONTROLLER
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank-{}", self.0)
    }
}

macro_rules! origin_seq_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name {
            pub origin: ProcessId,
            pub seq: u64,
        }

        impl $name {
            pub fn new(origin: ProcessId, seq: u64) -> Self {
                Self { origin, seq }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}.{}"), self.origin.0, self.seq)
            }
        }
    };
}

origin_seq_id!(
    /// Identifier of a value in the distributed object store.
    ObjectId,
    "obj"
);
origin_seq_id!(
    /// Identifier of a submitted task.
    TaskId,
    "task"
);
origin_seq_id!(
    /// Identifier of an actor instance.
    ActorId,
    "actor"
);

/// Per-process allocator for rank-prefixed ids.
///
/// One allocator per process; each id family draws from its own counter so id
/// streams stay dense and log output stays readable.
#[derive(Debug)]
pub struct IdAllocator {
    origin: ProcessId,
    next_object: AtomicU64,
    next_task: AtomicU64,
    next_actor: AtomicU64,
}

impl IdAllocator {
    pub fn new(origin: ProcessId) -> Self {
        Self {
            origin,
            next_object: AtomicU64::new(0),
            next_task: AtomicU64::new(0),
            next_actor: AtomicU64::new(0),
        }
    }

    pub fn origin(&self) -> ProcessId {
        self.origin
    }

    pub fn next_object_id(&self) -> ObjectId {
        ObjectId::new(self.origin, self.next_object.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_task_id(&self) -> TaskId {
        TaskId::new(self.origin, self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_actor_id(&self) -> ActorId {
        ActorId::new(self.origin, self.next_actor.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_allocator() {
        let alloc = IdAllocator::new(ProcessId(3));
        let a = alloc.next_object_id();
        let b = alloc.next_object_id();
        assert_ne!(a, b);
        assert_eq!(a.origin, ProcessId(3));
        assert_eq!(b.seq, a.seq + 1);
    }

    #[test]
    fn ids_from_different_ranks_never_collide() {
        let a = IdAllocator::new(ProcessId(1)).next_object_id();
        let b = IdAllocator::new(ProcessId(2)).next_object_id();
        assert_ne!(a, b);
    }

    #[test]
    fn display_formats() {
        assert_eq!(ObjectId::new(ProcessId(0), 7).to_string(), "obj-0.7");
        assert_eq!(ProcessId(2).to_string(), "rank-2");
    }
}
