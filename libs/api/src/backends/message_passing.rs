//! The message-passing backend: the engine core behind the uniform contract.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use skein_codec::ObjectPayload;
use skein_engine::{
    ActorTypeRegistry, Controller, ControllerHandle, EngineError, FunctionRegistry, Result,
    WorkerProcess,
};
use skein_network::ChannelMesh;
use skein_types::{
    ActorId, ActorStatus, FunctionDescriptor, ObjectId, ProcessId, TaskArg, WireActorRef, WireRef,
    WorkerInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::RuntimeConfig;

/// Controller + N workers over the in-process channel mesh.
pub struct MessagePassingBackend {
    controller: ControllerHandle,
    mesh: ChannelMesh,
    release_tx: mpsc::UnboundedSender<ObjectId>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessagePassingBackend {
    /// Wire the process group and start every rank.
    pub async fn start(
        config: &RuntimeConfig,
        functions: Arc<FunctionRegistry>,
        actor_types: Arc<ActorTypeRegistry>,
    ) -> Result<Arc<Self>> {
        let workers = config.workers.max(1) as u32;
        let (mesh, mut endpoints) = ChannelMesh::connect(workers + 1);
        let controller_endpoint = endpoints.remove(0);

        let controller = Controller::new(config.engine.clone(), Arc::new(controller_endpoint));
        let mut tasks = vec![tokio::spawn(Arc::clone(&controller).run())];

        for endpoint in endpoints {
            let worker = WorkerProcess::new(
                config.engine.clone(),
                Arc::new(endpoint),
                Arc::clone(&functions),
                Arc::clone(&actor_types),
            );
            tasks.push(tokio::spawn(worker.run()));
        }

        // Drop-based releases arrive on a channel so `Drop` never blocks.
        let (release_tx, mut release_rx) = mpsc::unbounded_channel();
        {
            let controller = Arc::clone(&controller);
            tasks.push(tokio::spawn(async move {
                while let Some(object) = release_rx.recv().await {
                    controller.release_object(object).await;
                }
            }));
        }

        info!(workers, "message-passing backend started");
        Ok(Arc::new(Self {
            controller,
            mesh,
            release_tx,
            tasks: Mutex::new(tasks),
        }))
    }

    /// Failure injection for tests: cut a worker out of the group. Its
    /// traffic stops; the controller discovers the loss via heartbeats.
    pub fn kill_worker(&self, rank: ProcessId) {
        debug!(worker = %rank, "simulated worker kill");
        self.mesh.sever(rank);
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }
}

#[async_trait]
impl Backend for MessagePassingBackend {
    async fn submit(
        &self,
        function: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.controller
            .submit_task(function, args, kwargs, num_returns)
            .await
    }

    async fn create_actor(
        &self,
        type_name: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
    ) -> Result<WireActorRef> {
        self.controller.create_actor(type_name, args, kwargs).await
    }

    async fn call_actor_method(
        &self,
        handle: WireActorRef,
        method: FunctionDescriptor,
        args: Vec<TaskArg>,
        kwargs: Vec<(String, TaskArg)>,
        num_returns: usize,
    ) -> Result<Vec<WireRef>> {
        self.controller
            .submit_actor_call(handle, method, args, kwargs, num_returns)
            .await
    }

    async fn get(&self, object: ObjectId, timeout: Option<Duration>) -> Result<Bytes> {
        match self.controller.get_payload(object, timeout).await? {
            ObjectPayload::Value(bytes) => Ok(bytes),
            ObjectPayload::Error(error) => Err(EngineError::Failed(error)),
        }
    }

    async fn wait(
        &self,
        objects: &[ObjectId],
        num_ready: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<ObjectId>, Vec<ObjectId>)> {
        self.controller.wait(objects, num_ready, timeout).await
    }

    fn put(&self, payload: Bytes) -> Result<WireRef> {
        self.controller.put_object(payload)
    }

    fn release(&self, object: ObjectId) {
        let _ = self.release_tx.send(object);
    }

    async fn kill_actor(&self, handle: WireActorRef) -> Result<()> {
        self.controller.kill_actor(handle).await
    }

    fn actor_status(&self, actor: ActorId) -> Option<ActorStatus> {
        self.controller.actor_status(actor)
    }

    fn cluster_resources(&self) -> Vec<WorkerInfo> {
        self.controller.cluster_snapshot()
    }

    async fn shutdown(&self) {
        self.controller.shutdown().await;
        // Workers exit on the shutdown broadcast; severed ranks and the
        // release forwarder are stopped directly.
        tokio::task::yield_now().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("message-passing backend stopped");
    }
}
