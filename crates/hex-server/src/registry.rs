//! Registry of active client workers.
//!
//! Every mutation happens under one `parking_lot::Mutex`. The lock is
//! never held across an `.await`; closing a worker only cancels its
//! token, and the worker task closes its own socket.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::types::ClientId;

/// What the registry keeps for one worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub peer_addr: SocketAddr,
    cancel: CancellationToken,
}

impl WorkerHandle {
    pub fn new(peer_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self { peer_addr, cancel }
    }

    /// Ask the worker to close its connection. Safe to call repeatedly.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<ClientId, WorkerHandle>,
    /// Set by `close_all`; no worker may join afterwards.
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker.
    ///
    /// Returns `false` (and stores nothing) if `id` is already present or
    /// the registry has been closed.
    pub fn add(&self, id: ClientId, handle: WorkerHandle) -> bool {
        let mut guard = self.inner.lock();
        if guard.closed || guard.clients.contains_key(&id) {
            return false;
        }
        guard.clients.insert(id, handle);
        true
    }

    /// Deregister a worker. Removing an absent id is a no-op returning `false`.
    pub fn remove(&self, id: ClientId) -> bool {
        self.inner.lock().clients.remove(&id).is_some()
    }

    /// Close every registered worker, clear the registry and refuse any
    /// later `add`. Returns how many workers were closed.
    pub fn close_all(&self) -> usize {
        let mut guard = self.inner.lock();
        guard.closed = true;

        let snapshot: Vec<(ClientId, WorkerHandle)> = guard.clients.drain().collect();
        for (_, handle) in &snapshot {
            handle.close();
        }
        snapshot.len()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.lock().clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
