//! Cross-process reference encodings and status machines.

use crate::ids::{ActorId, ObjectId, ProcessId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an object reference.
///
/// Transitions are monotonic: `Pending → {Ready | Error} → Released`. A
/// released reference never becomes observable again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefStatus {
    /// The producing task has not completed yet.
    Pending,
    /// The value is sealed in the owner's store.
    Ready,
    /// The producing task failed; the store holds an `ErrorObject`.
    Error,
    /// The last holder released the reference; the entry is freed.
    Released,
}

impl RefStatus {
    /// Whether a transition to `next` respects the monotonic order.
    pub fn can_transition_to(self, next: RefStatus) -> bool {
        use RefStatus::*;
        matches!(
            (self, next),
            (Pending, Ready) | (Pending, Error) | (Ready, Released) | (Error, Released)
        )
    }

    /// A ref is resolved once it is `Ready` or `Error`.
    pub fn is_resolved(self) -> bool {
        matches!(self, RefStatus::Ready | RefStatus::Error)
    }
}

/// Wire encoding of an object reference crossing a process boundary.
///
/// Carries exactly the fields the receiving side needs: the object id and the
/// rank that owns the authoritative store entry. Decoding a `WireRef` must
/// register an acquire with the owner before the reference is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireRef {
    pub object: ObjectId,
    pub owner: ProcessId,
}

impl WireRef {
    pub fn new(object: ObjectId, owner: ProcessId) -> Self {
        Self { object, owner }
    }
}

impl fmt::Display for WireRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object, self.owner)
    }
}

/// Status of an actor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorStatus {
    Alive,
    Dead,
}

/// Wire encoding of an actor handle crossing a process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireActorRef {
    pub actor: ActorId,
    /// The worker the actor is pinned to for its entire lifetime.
    pub home: ProcessId,
}

impl WireActorRef {
    pub fn new(actor: ActorId, home: ProcessId) -> Self {
        Self { actor, home }
    }
}

impl fmt::Display for WireActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectId;

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(RefStatus::Pending.can_transition_to(RefStatus::Ready));
        assert!(RefStatus::Pending.can_transition_to(RefStatus::Error));
        assert!(RefStatus::Ready.can_transition_to(RefStatus::Released));
        assert!(!RefStatus::Ready.can_transition_to(RefStatus::Pending));
        assert!(!RefStatus::Released.can_transition_to(RefStatus::Ready));
        assert!(!RefStatus::Error.can_transition_to(RefStatus::Ready));
    }

    #[test]
    fn wire_ref_round_trips_through_bincode() {
        let wire = WireRef::new(ObjectId::new(ProcessId(2), 41), ProcessId(2));
        let bytes = bincode::serialize(&wire).unwrap();
        let back: WireRef = bincode::deserialize(&bytes).unwrap();
        assert_eq!(wire, back);
    }
}
