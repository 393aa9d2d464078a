//! In-process channel mesh: the reference substrate for the process group.
//!
//! Every pair of ranks is connected by an ordered channel, so the mesh gives
//! exactly the delivery guarantees the engine assumes from a real transport
//! (reliable, ordered per pair) while keeping the whole group inside one OS
//! process. Worker-loss tests sever a rank; its traffic silently stops, and
//! the controller discovers the death through missed heartbeats, the same
//! way it would with real processes.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex as SyncMutex, RwLock};
use skein_codec::{split_frames, Frame, Reassembler, WireMessage, DEFAULT_MAX_FRAME_PAYLOAD};
use skein_types::ProcessId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::transport::Transport;

/// Builder/handle for a fixed-size in-process process group.
#[derive(Debug, Clone)]
pub struct ChannelMesh {
    group_size: u32,
    /// Ranks severed by failure injection. Shared by every endpoint.
    dead: Arc<RwLock<HashSet<ProcessId>>>,
}

impl ChannelMesh {
    /// Wire up a group of `group_size` endpoints, one per rank, rank 0 first.
    pub fn connect(group_size: u32) -> (Self, Vec<MeshEndpoint>) {
        assert!(group_size >= 1, "process group needs at least one rank");

        let dead = Arc::new(RwLock::new(HashSet::new()));
        let mut senders = Vec::with_capacity(group_size as usize);
        let mut receivers = Vec::with_capacity(group_size as usize);
        for _ in 0..group_size {
            // Frames are already bounded in size; the channel itself stays
            // unbounded so a slow rank cannot deadlock its peers.
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }

        let endpoints = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| MeshEndpoint {
                rank: ProcessId(rank as u32),
                group_size,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (ProcessId(peer as u32), tx.clone()))
                    .collect(),
                rx: Mutex::new(rx),
                reassembly: SyncMutex::new(HashMap::new()),
                next_stream: AtomicU64::new(0),
                dead: Arc::clone(&dead),
            })
            .collect();

        let mesh = Self { group_size, dead };
        debug!(group_size, "channel mesh connected");
        (mesh, endpoints)
    }

    /// Failure injection: cut a rank out of the group. Messages to and from
    /// it are dropped from now on; the rank itself is not notified.
    pub fn sever(&self, rank: ProcessId) {
        debug!(rank = %rank, "severing rank from mesh");
        self.dead.write().insert(rank);
    }

    pub fn is_severed(&self, rank: ProcessId) -> bool {
        self.dead.read().contains(&rank)
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }
}

/// One rank's endpoint in the mesh.
pub struct MeshEndpoint {
    rank: ProcessId,
    group_size: u32,
    peers: HashMap<ProcessId, mpsc::UnboundedSender<(ProcessId, Bytes)>>,
    rx: Mutex<mpsc::UnboundedReceiver<(ProcessId, Bytes)>>,
    /// Per-sender reassembly state. Streams from different senders never mix.
    reassembly: SyncMutex<HashMap<ProcessId, Reassembler>>,
    next_stream: AtomicU64,
    dead: Arc<RwLock<HashSet<ProcessId>>>,
}

impl std::fmt::Debug for MeshEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshEndpoint")
            .field("rank", &self.rank)
            .field("group_size", &self.group_size)
            .finish()
    }
}

#[async_trait]
impl Transport for MeshEndpoint {
    async fn send(&self, to: ProcessId, message: WireMessage) -> Result<()> {
        let sender = self.peers.get(&to).ok_or(TransportError::UnknownPeer {
            rank: to,
            group_size: self.group_size,
        })?;

        {
            let dead = self.dead.read();
            if dead.contains(&to) || dead.contains(&self.rank) {
                // A severed rank neither sends nor receives; the loss is
                // surfaced by the heartbeat monitor, not here.
                trace!(from = %self.rank, to = %to, kind = message.kind_name(), "dropping message to severed rank");
                return Ok(());
            }
        }

        let encoded = message.encode()?;
        let stream_id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        trace!(
            from = %self.rank,
            to = %to,
            kind = message.kind_name(),
            bytes = encoded.len(),
            "mesh send"
        );
        for frame in split_frames(stream_id, &encoded, DEFAULT_MAX_FRAME_PAYLOAD) {
            sender
                .send((self.rank, frame.to_bytes()))
                .map_err(|_| TransportError::closed(format!("channel to {} closed", to)))?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(ProcessId, WireMessage)> {
        let mut rx = self.rx.lock().await;
        loop {
            let (from, buf) = rx
                .recv()
                .await
                .ok_or_else(|| TransportError::closed("all senders dropped"))?;

            if self.dead.read().contains(&from) {
                // Frames already in flight from a severed rank are dropped
                // so a dead process cannot keep mutating cluster state.
                continue;
            }

            let frame = Frame::from_bytes(&buf)?;
            let complete = self
                .reassembly
                .lock()
                .entry(from)
                .or_insert_with(Reassembler::new)
                .accept(frame)?;

            if let Some(body) = complete {
                let message = WireMessage::decode(&body)?;
                trace!(at = %self.rank, from = %from, kind = message.kind_name(), "mesh recv");
                return Ok((from, message));
            }
        }
    }

    fn rank(&self) -> ProcessId {
        self.rank
    }

    fn group_size(&self) -> u32 {
        self.group_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::{ObjectId, ProcessId};

    fn heartbeat(worker: u32) -> WireMessage {
        WireMessage::WorkerHeartbeat {
            worker: ProcessId(worker),
        }
    }

    #[tokio::test]
    async fn point_to_point_delivery_preserves_order() {
        let (_mesh, endpoints) = ChannelMesh::connect(2);
        let (a, b) = {
            let mut it = endpoints.into_iter();
            (it.next().unwrap(), it.next().unwrap())
        };

        for seq in 0..10u64 {
            a.send(
                ProcessId(1),
                WireMessage::ReleaseRef {
                    object: ObjectId::new(ProcessId(0), seq),
                    holder: ProcessId(0),
                },
            )
            .await
            .unwrap();
        }

        for seq in 0..10u64 {
            let (from, msg) = b.recv().await.unwrap();
            assert_eq!(from, ProcessId(0));
            match msg {
                WireMessage::ReleaseRef { object, .. } => assert_eq!(object.seq, seq),
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_other_rank() {
        let (_mesh, mut endpoints) = ChannelMesh::connect(4);
        let controller = endpoints.remove(0);
        controller.broadcast(WireMessage::Shutdown).await.unwrap();

        for endpoint in &endpoints {
            let (from, msg) = endpoint.recv().await.unwrap();
            assert_eq!(from, ProcessId::CONTROLLER);
            assert!(matches!(msg, WireMessage::Shutdown));
        }
    }

    #[tokio::test]
    async fn large_message_is_chunked_and_reassembled() {
        let (_mesh, endpoints) = ChannelMesh::connect(2);
        let payload = Bytes::from(vec![0x5a; 3 * DEFAULT_MAX_FRAME_PAYLOAD + 17]);
        let msg = WireMessage::ObjectData {
            object: ObjectId::new(ProcessId(1), 0),
            payload: skein_codec::ObjectPayload::Value(payload.clone()),
        };

        endpoints[0].send(ProcessId(1), msg).await.unwrap();
        let (_, received) = endpoints[1].recv().await.unwrap();
        match received {
            WireMessage::ObjectData { payload: skein_codec::ObjectPayload::Value(data), .. } => {
                assert_eq!(data, payload);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn severed_rank_goes_silent() {
        let (mesh, endpoints) = ChannelMesh::connect(3);
        mesh.sever(ProcessId(2));

        // To the severed rank: swallowed.
        endpoints[0].send(ProcessId(2), heartbeat(0)).await.unwrap();
        // From the severed rank: swallowed.
        endpoints[2].send(ProcessId(0), heartbeat(2)).await.unwrap();
        // Healthy pair still works.
        endpoints[1].send(ProcessId(0), heartbeat(1)).await.unwrap();

        let (from, msg) = endpoints[0].recv().await.unwrap();
        assert_eq!(from, ProcessId(1));
        assert!(matches!(msg, WireMessage::WorkerHeartbeat { worker } if worker == ProcessId(1)));
    }
}
