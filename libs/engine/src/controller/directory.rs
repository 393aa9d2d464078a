//! Object directory: the controller's authoritative view of every object.
//!
//! Tracks, per object id: current status, the rank owning the authoritative
//! store entry, and reference-count operations that arrived while the object
//! was still pending. The directory is metadata only; payloads live in the
//! per-process stores.

use parking_lot::Mutex;
use skein_types::{ObjectId, ProcessId, RefStatus, TaskId};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Reference-count operations deferred until an object resolves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeferredRefOps {
    pub acquires: u32,
    pub releases: u32,
}

#[derive(Debug)]
struct ObjectRecord {
    status: RefStatus,
    /// Rank holding the authoritative entry. Provisional (controller) until
    /// the producing task completes somewhere.
    owner: ProcessId,
    producer: Option<TaskId>,
    deferred: DeferredRefOps,
}

/// Snapshot of one object's coordination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectState {
    pub status: RefStatus,
    pub owner: ProcessId,
}

#[derive(Debug)]
pub struct ObjectDirectory {
    records: Mutex<HashMap<ObjectId, ObjectRecord>>,
    /// Version counter bumped on every resolution; `get`/`wait` loops watch
    /// it instead of polling.
    version_tx: watch::Sender<u64>,
}

impl ObjectDirectory {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            records: Mutex::new(HashMap::new()),
            version_tx,
        }
    }

    /// Record a new pending object produced by `producer`.
    pub fn register_pending(&self, object: ObjectId, producer: TaskId) {
        let mut records = self.records.lock();
        let prior = records.insert(
            object,
            ObjectRecord {
                status: RefStatus::Pending,
                owner: ProcessId::CONTROLLER,
                producer: Some(producer),
                deferred: DeferredRefOps::default(),
            },
        );
        debug_assert!(prior.is_none(), "object ids are never reused");
        trace!(object = %object, producer = %producer, "registered pending object");
    }

    /// Record an object sealed at creation time (driver `put`).
    pub fn register_sealed(&self, object: ObjectId, owner: ProcessId) {
        self.records.lock().insert(
            object,
            ObjectRecord {
                status: RefStatus::Ready,
                owner,
                producer: None,
                deferred: DeferredRefOps::default(),
            },
        );
    }

    pub fn state(&self, object: ObjectId) -> Option<ObjectState> {
        self.records.lock().get(&object).map(|r| ObjectState {
            status: r.status,
            owner: r.owner,
        })
    }

    /// Transition to `Ready` with the true owner; returns ref-count
    /// operations that were waiting for resolution.
    pub fn mark_ready(&self, object: ObjectId, owner: ProcessId) -> DeferredRefOps {
        self.resolve(object, RefStatus::Ready, owner)
    }

    /// Transition to `Error`; `owner` is whichever rank sealed the failure.
    pub fn mark_error(&self, object: ObjectId, owner: ProcessId) -> DeferredRefOps {
        self.resolve(object, RefStatus::Error, owner)
    }

    fn resolve(&self, object: ObjectId, status: RefStatus, owner: ProcessId) -> DeferredRefOps {
        let deferred = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(&object) else {
                warn!(object = %object, "resolution for unknown object");
                return DeferredRefOps::default();
            };
            if !record.status.can_transition_to(status) {
                // A task can only complete once; a second resolution means a
                // duplicate completion report and is ignored.
                warn!(object = %object, from = ?record.status, to = ?status, "ignoring non-monotonic transition");
                return DeferredRefOps::default();
            }
            record.status = status;
            record.owner = owner;
            std::mem::take(&mut record.deferred)
        };
        self.version_tx.send_modify(|v| *v += 1);
        trace!(object = %object, ?status, owner = %owner, "object resolved");
        deferred
    }

    /// Mark a reference released. Returns the object's state if it was
    /// resolved (caller forwards the release to the owner), or `None` if the
    /// release was deferred or the object is unknown.
    pub fn note_release(&self, object: ObjectId) -> Option<ObjectState> {
        let mut records = self.records.lock();
        let record = records.get_mut(&object)?;
        match record.status {
            RefStatus::Pending => {
                record.deferred.releases += 1;
                None
            }
            RefStatus::Released => None,
            _ => Some(ObjectState {
                status: record.status,
                owner: record.owner,
            }),
        }
    }

    /// Register an acquire on behalf of an in-flight task. Returns the
    /// resolved state if the acquire must be forwarded now, `None` if it was
    /// deferred until resolution.
    pub fn note_acquire(&self, object: ObjectId) -> Option<ObjectState> {
        let mut records = self.records.lock();
        let record = records.get_mut(&object)?;
        match record.status {
            RefStatus::Pending => {
                record.deferred.acquires += 1;
                None
            }
            _ => Some(ObjectState {
                status: record.status,
                owner: record.owner,
            }),
        }
    }

    /// Mark fully released, once the owner has freed the entry.
    pub fn mark_released(&self, object: ObjectId) {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(&object) {
            if record.status.can_transition_to(RefStatus::Released) {
                record.status = RefStatus::Released;
            }
        }
    }

    pub fn producer(&self, object: ObjectId) -> Option<TaskId> {
        self.records.lock().get(&object).and_then(|r| r.producer)
    }

    /// Subscribe to resolution events for await loops.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}
