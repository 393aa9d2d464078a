//! Pending-request bookkeeping for one worker.
//!
//! Two concerns, both request-shaped:
//! - fetch requests from peers for objects this worker owns but has not
//!   sealed yet (served on seal);
//! - the request-once cache for this worker's own outgoing data fetches, so
//!   repeated dependency checks never flood the owner with duplicates.

use parking_lot::Mutex;
use skein_types::{ObjectId, ProcessId};
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Debug, Default)]
pub struct PendingRequestStore {
    /// Peers waiting for an object of ours to seal.
    parked: Mutex<HashMap<ObjectId, Vec<ProcessId>>>,
    /// Objects we have already asked an owner for.
    requested: Mutex<HashSet<ObjectId>>,
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a peer's fetch until the object seals.
    pub fn park(&self, object: ObjectId, requester: ProcessId) {
        trace!(object = %object, requester = %requester, "parking fetch request");
        self.parked.lock().entry(object).or_default().push(requester);
    }

    /// Everyone waiting on `object`, drained.
    pub fn take_waiters(&self, object: ObjectId) -> Vec<ProcessId> {
        self.parked.lock().remove(&object).unwrap_or_default()
    }

    /// Record an outgoing fetch; returns `false` if one is already in
    /// flight for this object.
    pub fn mark_requested(&self, object: ObjectId) -> bool {
        self.requested.lock().insert(object)
    }

    /// The data arrived (or the fetch is moot); allow future requests.
    pub fn clear_requested(&self, object: ObjectId) {
        self.requested.lock().remove(&object);
    }
}
