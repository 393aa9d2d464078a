//! Wire messages exchanged between the controller and workers.
//!
//! This is the complete, closed operation set of the message-passing runtime.
//! Actor method calls travel as `SubmitTask` with an actor target, so call
//! routing and sequencing share one code path with pool tasks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skein_types::{
    ActorId, ErrorObject, FunctionDescriptor, ObjectId, ProcessId, TaskArg, TaskId, TaskSpec,
};

use crate::error::{CodecError, Result};
use crate::serializer::ObjectPayload;

/// One protocol message. Delivery is reliable and ordered per sender/receiver
/// pair; the engine does not implement retransmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Controller → worker: run this task (pool task or sequenced actor call).
    SubmitTask { spec: TaskSpec },

    /// Worker → controller: task completed, outputs sealed in the worker's
    /// store shard.
    TaskDone {
        task: TaskId,
        worker: ProcessId,
        outputs: Vec<ObjectId>,
    },

    /// Worker → controller: task failed; every output id now holds `error`.
    TaskFailed {
        task: TaskId,
        worker: ProcessId,
        outputs: Vec<ObjectId>,
        error: ErrorObject,
    },

    /// Any → owner: send me this object's payload.
    FetchObject {
        object: ObjectId,
        requester: ProcessId,
    },

    /// Owner → requester: the payload (or stored failure) for an object.
    ObjectData {
        object: ObjectId,
        payload: ObjectPayload,
    },

    /// Holder → owner: a new reference to this object now lives on `holder`.
    AcquireRef { object: ObjectId, holder: ProcessId },

    /// Holder → owner: a reference was dropped; decrement the count.
    ReleaseRef { object: ObjectId, holder: ProcessId },

    /// Controller → worker: instantiate an actor pinned to this worker.
    CreateActor {
        actor: ActorId,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    },

    /// Controller → worker: fail queued and future calls, tear the actor
    /// down after any in-flight call finishes.
    KillActor { actor: ActorId },

    /// Worker → controller: the actor is gone (constructor fault, kill, or
    /// worker-local failure). Queued calls have been failed with `error`.
    ActorDied { actor: ActorId, error: ErrorObject },

    /// Worker → controller: liveness beacon, sent on a fixed interval.
    WorkerHeartbeat { worker: ProcessId },

    /// Controller → all: stop the event loop after draining in-flight work.
    Shutdown,
}

impl WireMessage {
    /// Stable operation name for structured logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            WireMessage::SubmitTask { .. } => "SUBMIT_TASK",
            WireMessage::TaskDone { .. } => "TASK_DONE",
            WireMessage::TaskFailed { .. } => "TASK_FAILED",
            WireMessage::FetchObject { .. } => "FETCH_OBJECT",
            WireMessage::ObjectData { .. } => "OBJECT_DATA",
            WireMessage::AcquireRef { .. } => "ACQUIRE_REF",
            WireMessage::ReleaseRef { .. } => "RELEASE_REF",
            WireMessage::CreateActor { .. } => "CREATE_ACTOR",
            WireMessage::KillActor { .. } => "KILL_ACTOR",
            WireMessage::ActorDied { .. } => "ACTOR_DIED",
            WireMessage::WorkerHeartbeat { .. } => "WORKER_HEARTBEAT",
            WireMessage::Shutdown => "SHUTDOWN",
        }
    }

    /// Encode for transport.
    pub fn encode(&self) -> Result<Bytes> {
        let encoded = bincode::serialize(self).map_err(|e| CodecError::wire(e.to_string()))?;
        Ok(Bytes::from(encoded))
    }

    /// Decode a reassembled message body.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CodecError::wire(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::TaskTarget;

    #[test]
    fn submit_task_round_trips() {
        let controller = ProcessId::CONTROLLER;
        let msg = WireMessage::SubmitTask {
            spec: TaskSpec {
                task_id: TaskId::new(controller, 9),
                function: "square".into(),
                args: vec![TaskArg::Inline(Bytes::from_static(b"\x03"))],
                kwargs: vec![],
                outputs: vec![ObjectId::new(controller, 10)],
                target: TaskTarget::Pool,
            },
        };

        let bytes = msg.encode().unwrap();
        let back = WireMessage::decode(&bytes).unwrap();
        assert_eq!(back.kind_name(), "SUBMIT_TASK");
        match back {
            WireMessage::SubmitTask { spec } => {
                assert_eq!(spec.task_id, TaskId::new(controller, 9));
                assert_eq!(spec.outputs.len(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn garbage_bytes_are_a_wire_error() {
        let err = WireMessage::decode(&[0xff; 3]).unwrap_err();
        assert!(!err.is_value_error());
    }
}
