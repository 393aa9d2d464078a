//! Unified transport trait for process-group substrates.

use async_trait::async_trait;
use skein_codec::WireMessage;
use skein_types::ProcessId;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// One endpoint of a reliable, ordered point-to-point substrate.
///
/// Implementations guarantee per-pair ordering and lossless delivery between
/// live processes; the engine layers no retransmission on top. Sending to a
/// dead process succeeds silently; liveness is the heartbeat monitor's job,
/// not the transport's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message to one peer.
    async fn send(&self, to: ProcessId, message: WireMessage) -> Result<()>;

    /// Deliver a message to every other member of the group.
    async fn broadcast(&self, message: WireMessage) -> Result<()> {
        for rank in 0..self.group_size() {
            let peer = ProcessId(rank);
            if peer != self.rank() {
                self.send(peer, message.clone()).await?;
            }
        }
        Ok(())
    }

    /// Receive the next whole message addressed to this process, with its
    /// sender. Blocks until one arrives or the substrate closes.
    async fn recv(&self) -> Result<(ProcessId, WireMessage)>;

    /// Receive with a deadline.
    async fn recv_timeout(&self, timeout: Duration) -> Result<(ProcessId, WireMessage)> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| TransportError::timeout("recv", timeout.as_millis() as u64))?
    }

    /// This endpoint's stable rank.
    fn rank(&self) -> ProcessId;

    /// Fixed number of processes in the group.
    fn group_size(&self) -> u32;
}
