// crates/hex-server/tests/lifecycle.rs
//
// Drives a real server over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use hex_core::{FAREWELL, GREETING, SERVER_STOPPED};
use hex_server::processor::CommandProcessor;
use hex_server::{Config, Server, ServerState, StopHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn local_config(max_workers: usize) -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        max_workers,
    }
}

async fn launch(server: Server) -> (Server, JoinHandle<hex_server::Result<()>>, SocketAddr) {
    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };
    assert_eq!(server.wait_listening().await, ServerState::Listening);
    let addr = server.local_addr().expect("no local addr while listening");
    (server, running, addr)
}

async fn start_server(max_workers: usize) -> (Server, JoinHandle<hex_server::Result<()>>, SocketAddr) {
    launch(Server::new(local_config(max_workers))).await
}

async fn finished(running: JoinHandle<hex_server::Result<()>>) {
    timeout(WAIT, running)
        .await
        .expect("start() did not return after stop()")
        .expect("server task panicked")
        .expect("server returned an error");
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let waited = timeout(WAIT, async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    /// Connect without reading the greeting.
    async fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr).await;
        assert_eq!(client.recv().await.as_deref(), Some(GREETING));
        client
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .get_mut()
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("write failed");
    }

    /// Next line from the server, `None` once it has closed the connection.
    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(WAIT, self.stream.read_line(&mut line))
            .await
            .expect("timed out waiting for server");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    async fn request(&mut self, line: &str) -> Option<String> {
        self.send(line).await;
        self.recv().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_succeeds_while_listening() {
    let (server, running, addr) = start_server(4).await;

    let _client = Client::connect(addr).await;
    eventually("client registered", || server.client_count() == 1).await;

    server.stop();
    finished(running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hello_is_acknowledged() {
    let (server, running, addr) = start_server(4).await;

    let mut client = Client::connect(addr).await;
    assert_eq!(
        client.request("hello").await.as_deref(),
        Some("Server received the request: hello")
    );
    assert_eq!(
        client.request("place 3 4").await.as_deref(),
        Some("Server received the request: place 3 4")
    );

    server.stop();
    finished(running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_tracks_concurrent_clients() {
    const N: usize = 8;
    let (server, running, addr) = start_server(N).await;

    let mut clients = Vec::new();
    for _ in 0..N {
        clients.push(Client::connect(addr).await);
    }
    assert_eq!(server.client_count(), N);

    // Half leave with `exit`, half just drop their socket.
    let mut dropped = Vec::new();
    for (i, mut client) in clients.into_iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!(client.request("exit").await.as_deref(), Some(FAREWELL));
            assert_eq!(client.recv().await, None);
        } else {
            dropped.push(client);
        }
    }
    drop(dropped);

    eventually("registry empty", || server.client_count() == 0).await;
    assert_eq!(server.state(), ServerState::Listening);

    server.stop();
    finished(running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exit_closes_only_that_client() {
    let (server, running, addr) = start_server(4).await;

    let mut leaving = Client::connect(addr).await;
    let mut staying = Client::connect(addr).await;
    eventually("two clients", || server.client_count() == 2).await;

    assert_eq!(leaving.request("EXIT").await.as_deref(), Some(FAREWELL));
    assert_eq!(leaving.recv().await, None);
    eventually("leaving client removed", || server.client_count() == 1).await;

    assert_eq!(
        staying.request("still here").await.as_deref(),
        Some("Server received the request: still here")
    );

    // Still accepting.
    let mut late = Client::connect(addr).await;
    assert_eq!(
        late.request("hi").await.as_deref(),
        Some("Server received the request: hi")
    );

    server.stop();
    finished(running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_twice_matches_stop_once() {
    let (server, running, addr) = start_server(4).await;
    let mut client = Client::connect(addr).await;

    server.stop();
    server.stop();
    server.stop_handle().stop();

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.client_count(), 0);
    assert_eq!(client.recv().await, None);

    finished(running).await;
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_stops_are_safe() {
    let (server, running, addr) = start_server(4).await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::connect(addr).await);
    }

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let handle = server.stop_handle();
            tokio::spawn(async move { handle.stop() })
        })
        .collect();
    for racer in racers {
        racer.await.expect("stop() panicked");
    }

    for client in &mut clients {
        assert_eq!(client.recv().await, None);
    }
    assert_eq!(server.client_count(), 0);
    finished(running).await;
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_command_answers_then_shuts_everything_down() {
    let (server, running, addr) = start_server(4).await;

    let mut bystander = Client::connect(addr).await;
    let mut stopper = Client::connect(addr).await;

    assert_eq!(stopper.request("Stop").await.as_deref(), Some(SERVER_STOPPED));
    assert_eq!(stopper.recv().await, None);
    assert_eq!(bystander.recv().await, None);

    finished(running).await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.client_count(), 0);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_then_remote_stop_scenario() {
    let (server, running, addr) = start_server(10).await;

    let mut a = Client::connect(addr).await;
    assert_eq!(
        a.request("ping").await.as_deref(),
        Some("Server received the request: ping")
    );

    let mut b = Client::connect(addr).await;
    assert_eq!(b.request("stop").await.as_deref(), Some(SERVER_STOPPED));

    // A is closed by the server without any message.
    assert_eq!(a.recv().await, None);

    finished(running).await;
    assert!(TcpStream::connect(addr).await.is_err());
    assert_eq!(server.client_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_closes_client_that_never_reads() {
    let (server, running, addr) = start_server(4).await;

    let mut flooder = Client::connect(addr).await;
    let mut reader = Client::connect(addr).await;

    // Send requests without reading any reply until both socket buffers
    // are full and the worker is stuck writing a response.
    let request = format!("{}\n", "x".repeat(999));
    let mut blocked = false;
    for _ in 0..200_000 {
        let write = flooder.stream.get_mut().write_all(request.as_bytes());
        if timeout(Duration::from_millis(200), write).await.is_err() {
            blocked = true;
            break;
        }
    }
    assert!(blocked, "socket buffers never filled");

    server.stop();

    finished(running).await;
    assert_eq!(server.client_count(), 0);
    assert_eq!(reader.recv().await, None);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clients_beyond_pool_size_wait_for_a_slot() {
    let (server, running, addr) = start_server(1).await;

    let mut first = Client::connect(addr).await;
    let mut queued = Client::connect_raw(addr).await;

    // Tracked right away, but not served yet.
    eventually("queued client registered", || server.client_count() == 2).await;
    let mut line = String::new();
    let early = timeout(
        Duration::from_millis(200),
        queued.stream.read_line(&mut line),
    )
    .await;
    assert!(early.is_err(), "queued client was greeted early: {:?}", line);

    assert_eq!(first.request("exit").await.as_deref(), Some(FAREWELL));
    assert_eq!(queued.recv().await.as_deref(), Some(GREETING));
    assert_eq!(
        queued.request("ready").await.as_deref(),
        Some("Server received the request: ready")
    );

    server.stop();
    finished(running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_client_is_closed_on_stop() {
    let (server, running, addr) = start_server(1).await;

    let mut first = Client::connect(addr).await;
    let mut queued = Client::connect_raw(addr).await;
    eventually("queued client registered", || server.client_count() == 2).await;

    server.stop();

    assert_eq!(first.recv().await, None);
    assert_eq!(queued.recv().await, None);
    finished(running).await;
}

struct Upper {
    stop: StopHandle,
}

impl CommandProcessor for Upper {
    fn process(&self, command: &str) -> String {
        if command == "shutdown" {
            self.stop.stop_in_background();
            return SERVER_STOPPED.to_string();
        }
        command.to_uppercase()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn custom_processor_can_stop_the_server() {
    let server = Server::with_processor(local_config(4), |stop| Upper { stop });
    let (server, running, addr) = launch(server).await;

    let mut client = Client::connect(addr).await;
    assert_eq!(client.request("hex").await.as_deref(), Some("HEX"));
    // `exit` is handled by the worker before the processor sees it.
    let mut other = Client::connect(addr).await;
    assert_eq!(other.request("exit").await.as_deref(), Some(FAREWELL));

    assert_eq!(
        client.request("shutdown").await.as_deref(),
        Some(SERVER_STOPPED)
    );
    assert_eq!(client.recv().await, None);

    finished(running).await;
    assert_eq!(server.state(), ServerState::Stopped);
}
