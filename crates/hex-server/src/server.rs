//! TCP listener and server lifecycle.
//!
//! This module:
//! - Binds the listening socket and runs the accept loop.
//! - Assigns each connection a `ClientId` and registers it.
//! - Spawns a worker task per connection on the worker pool.
//! - Implements `stop()`, which may be triggered by a client's `stop`
//!   command, by the process signal handler, or by library code, any
//!   number of times from any task.
//!
//! The per-client loop lives in `worker`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::ConnectionHandle;
use crate::error::{Result, ServerError};
use crate::pool::WorkerPool;
use crate::processor::{CommandProcessor, ServerCommands};
use crate::registry::{ClientRegistry, WorkerHandle};
use crate::types::ClientId;
use crate::worker::Worker;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a `Server`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Listening,
    Stopped,
}

struct Inner {
    config: Config,
    state: watch::Sender<ServerState>,
    registry: Arc<ClientRegistry>,
    pool: WorkerPool,
    processor: Arc<dyn CommandProcessor>,
    /// Wakes the accept loop so it drops the listening socket.
    accept_shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    next_client_id: AtomicU64,
}

/// The server supervisor. Cheap to clone; clones share one server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

/// Trigger for `Server::stop` that does not keep the server alive.
#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Weak<Inner>,
}

impl StopHandle {
    /// Stop the server on the calling task. No-op if it is gone or stopped.
    pub fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            Server { inner }.stop();
        }
    }

    /// Stop the server from a fresh task, so the caller can finish what
    /// it is doing (e.g. answering the client that asked) first.
    pub fn stop_in_background(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            handle.stop();
        });
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .field("clients", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// A server using the built-in command set.
    pub fn new(config: Config) -> Self {
        Self::with_processor(config, ServerCommands::new)
    }

    /// A server whose commands are handled by the processor `make` builds.
    /// The processor gets a `StopHandle` for this server.
    pub fn with_processor<P, F>(config: Config, make: F) -> Self
    where
        P: CommandProcessor,
        F: FnOnce(StopHandle) -> P,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let processor = make(StopHandle {
                inner: weak.clone(),
            });
            let (state, _) = watch::channel(ServerState::NotStarted);

            Inner {
                pool: WorkerPool::new(config.max_workers),
                config,
                state,
                registry: Arc::new(ClientRegistry::new()),
                processor: Arc::new(processor),
                accept_shutdown: CancellationToken::new(),
                local_addr: Mutex::new(None),
                next_client_id: AtomicU64::new(1),
            }
        });

        Self { inner }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Address actually bound, once the server has started listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Number of registered client workers.
    pub fn client_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Wait until the server has left `NotStarted` and return the new state.
    pub async fn wait_listening(&self) -> ServerState {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|state| *state != ServerState::NotStarted)
            .await
            .map(|state| *state);
        state.unwrap_or(ServerState::Stopped)
    }

    /// Bind the listening socket and accept clients until `stop()`.
    ///
    /// Returns once the listening socket is closed and every worker has
    /// finished. Calling `start` on a server that already started or
    /// stopped does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.state() != ServerState::NotStarted {
            warn!("start() ignored: server is {:?}", self.state());
            return Ok(());
        }

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{}", e);
                self.stop();
                return Err(e);
            }
        };

        let entered = self.inner.state.send_if_modified(|state| {
            if *state == ServerState::NotStarted {
                *state = ServerState::Listening;
                true
            } else {
                false
            }
        });
        if !entered {
            debug!("Server stopped while binding; closing listening socket");
            return Ok(());
        }

        if let Some(addr) = self.local_addr() {
            info!("Server started on port {}", addr.port());
        }

        self.accept_loop(listener).await;

        self.inner.pool.wait().await;
        info!("All client workers finished");
        Ok(())
    }

    /// Stop the server. Idempotent and safe to call from any task.
    ///
    /// The state flips first so a late accept sees it, then every
    /// registered worker is closed, the pool stops handing out slots, and
    /// finally the accept loop is told to drop the listening socket.
    pub fn stop(&self) {
        let stopping = self.inner.state.send_if_modified(|state| {
            if *state == ServerState::Stopped {
                false
            } else {
                *state = ServerState::Stopped;
                true
            }
        });
        if !stopping {
            debug!("stop() ignored: server already stopped");
            return;
        }

        let closed = self.inner.registry.close_all();
        self.inner.pool.shutdown();
        self.inner.accept_shutdown.cancel();

        info!("Server stopped ({} client(s) closed)", closed);
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr = self.inner.config.socket_addr_string();

        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(e) => Err(e),
        };

        match bound {
            Ok((listener, local)) => {
                *self.inner.local_addr.lock() = Some(local);
                Ok(listener)
            }
            Err(source) => Err(ServerError::Bind { addr, source }),
        }
    }

    fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.accept_shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    if !self.is_listening() {
                        debug!("Dropping connection from {}: server stopping", peer_addr);
                        break;
                    }
                    self.spawn_worker(stream, peer_addr);
                }
                Err(e) => {
                    if !self.is_listening() {
                        break;
                    }
                    error!("Error accepting client connection: {}", e);
                    if !self.pause_after_accept_error().await {
                        break;
                    }
                }
            }
        }

        drop(listener);
        debug!("Listening socket closed");
    }

    /// Back off after a failed accept (e.g. out of file descriptors).
    /// Returns `false` if the server was stopped during the pause.
    async fn pause_after_accept_error(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.inner.accept_shutdown.cancelled() => false,
            _ = sleep(ACCEPT_ERROR_BACKOFF) => true,
        }
    }

    fn next_client_id(&self) -> ClientId {
        ClientId(self.inner.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register the connection, then hand it to its own task.
    fn spawn_worker(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let client_id = self.next_client_id();
        let cancel = CancellationToken::new();

        let handle = WorkerHandle::new(peer_addr, cancel.clone());
        if !self.inner.registry.add(client_id, handle) {
            // Registry already swept by stop(); dropping the stream closes it.
            debug!("Rejecting connection from {}: server stopping", peer_addr);
            return;
        }

        info!("New client connected: {} ({})", peer_addr, client_id);

        let worker = Worker::new(
            client_id,
            ConnectionHandle::new(stream, peer_addr),
            cancel,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.processor),
        );
        let pool = self.inner.pool.clone();
        self.inner.pool.spawn(worker.run(pool));
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}
