//! Typed handles held by application code.

use skein_types::{ActorId, ObjectId, WireActorRef, WireRef};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Owning reference to a (possibly not yet computed) value.
///
/// Clones share one reference-count unit: the count the creating process
/// holds on the store entry. When the last clone drops, a release is sent to
/// the owner; `Runtime::release` is the explicit form of the same thing.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    wire: WireRef,
    _guard: Arc<ReleaseGuard>,
}

impl ObjectRef {
    pub(crate) fn new(wire: WireRef, release_tx: mpsc::UnboundedSender<ObjectId>) -> Self {
        Self {
            wire,
            _guard: Arc::new(ReleaseGuard {
                object: wire.object,
                release_tx,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.wire.object
    }

    /// Wire encoding for crossing a process boundary.
    pub fn wire(&self) -> WireRef {
        self.wire
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire)
    }
}

#[derive(Debug)]
struct ReleaseGuard {
    object: ObjectId,
    release_tx: mpsc::UnboundedSender<ObjectId>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        trace!(object = %self.object, "last reference dropped");
        // Runtime already shut down means nothing left to release.
        let _ = self.release_tx.send(self.object);
    }
}

/// Handle to a stateful remote object pinned to one process.
///
/// Cloneable and freely shareable; actor lifetime is explicit (`kill`), not
/// reference-counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorHandle {
    wire: WireActorRef,
}

impl ActorHandle {
    pub(crate) fn new(wire: WireActorRef) -> Self {
        Self { wire }
    }

    pub fn id(&self) -> ActorId {
        self.wire.actor
    }

    pub fn wire(&self) -> WireActorRef {
        self.wire
    }
}

impl std::fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::ProcessId;

    #[test]
    fn release_fires_once_after_last_clone() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let wire = WireRef::new(ObjectId::new(ProcessId(0), 1), ProcessId(0));

        let a = ObjectRef::new(wire, tx);
        let b = a.clone();
        drop(a);
        assert!(rx.try_recv().is_err());

        drop(b);
        assert_eq!(rx.try_recv().unwrap(), ObjectId::new(ProcessId(0), 1));
        assert!(rx.try_recv().is_err());
    }
}
