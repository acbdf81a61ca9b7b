//! Per-connection worker task.
//!
//! A worker owns its `ConnectionHandle` outright. Other tasks can only
//! ask it to stop through the cancellation token kept in the registry.

use std::io;
use std::sync::Arc;

use hex_core::{is_shutdown_ack, Command, FAREWELL, GREETING};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::pool::WorkerPool;
use crate::processor::CommandProcessor;
use crate::registry::ClientRegistry;
use crate::types::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    /// Peer closed its side.
    PeerClosed,
    /// Client sent `exit`.
    ClientExit,
    /// This client's own command stopped the server.
    StopRequested,
    /// Closed from outside (server shutdown).
    Cancelled,
}

pub(crate) struct Worker {
    id: ClientId,
    conn: ConnectionHandle,
    cancel: CancellationToken,
    registry: Arc<ClientRegistry>,
    processor: Arc<dyn CommandProcessor>,
    state: WorkerState,
}

impl Worker {
    pub fn new(
        id: ClientId,
        conn: ConnectionHandle,
        cancel: CancellationToken,
        registry: Arc<ClientRegistry>,
        processor: Arc<dyn CommandProcessor>,
    ) -> Self {
        Self {
            id,
            conn,
            cancel,
            registry,
            processor,
            state: WorkerState::Created,
        }
    }

    /// Run until the client leaves or the worker is closed, then clean up.
    ///
    /// Cleanup runs on every path out of the loop, I/O errors included.
    pub async fn run(mut self, pool: WorkerPool) {
        let slot = self.wait_for_slot(&pool).await;
        let outcome = match slot {
            Some(_slot) => {
                self.transition(WorkerState::Running);
                self.serve().await
            }
            None => Ok(ExitReason::Cancelled),
        };

        match outcome {
            Ok(reason) => debug!("Client {} leaving: {:?}", self.id, reason),
            Err(e) => warn!("Error in client {}: {}", self.id, e),
        }

        self.shutdown().await;
    }

    async fn wait_for_slot(&self, pool: &WorkerPool) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            slot = pool.acquire() => slot,
        }
    }

    async fn serve(&mut self) -> io::Result<ExitReason> {
        if !self.send_or_cancel(GREETING).await? {
            return Ok(ExitReason::Cancelled);
        }

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(ExitReason::Cancelled),
                line = self.conn.read_line() => line?,
            };

            let Some(line) = line else {
                return Ok(ExitReason::PeerClosed);
            };
            debug!("Received from client {}: {}", self.id, line);

            if Command::parse(&line) == Command::Exit {
                if !self.send_or_cancel(FAREWELL).await? {
                    return Ok(ExitReason::Cancelled);
                }
                return Ok(ExitReason::ClientExit);
            }

            let response = self.processor.process(&line);
            if !self.send_or_cancel(&response).await? {
                return Ok(ExitReason::Cancelled);
            }

            if is_shutdown_ack(&response) {
                return Ok(ExitReason::StopRequested);
            }
        }
    }

    /// Write one line. Returns `false` if the worker was closed while the
    /// write was blocked on a full socket buffer.
    ///
    /// The write is polled first, so a line that fits in the buffer is
    /// always delivered, even if the close request is already pending.
    async fn send_or_cancel(&mut self, line: &str) -> io::Result<bool> {
        tokio::select! {
            biased;
            sent = self.conn.send_line(line) => sent.map(|()| true),
            _ = self.cancel.cancelled() => Ok(false),
        }
    }

    fn transition(&mut self, next: WorkerState) {
        debug!("Client {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    async fn shutdown(&mut self) {
        self.transition(WorkerState::Stopping);

        if self.conn.close().await {
            info!("Client {} disconnected: {}", self.id, self.conn.peer_addr());
        }
        self.registry.remove(self.id);

        self.transition(WorkerState::Stopped);
    }
}

impl Drop for Worker {
    // Covers a worker task that unwinds before reaching `shutdown`.
    // The socket closes with the dropped handle.
    fn drop(&mut self) {
        if self.state != WorkerState::Stopped {
            self.registry.remove(self.id);
        }
    }
}
