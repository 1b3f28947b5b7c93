//! Test harness for relay integration tests.
//!
//! Provides helpers to spawn target services, start relays on free ports and
//! record notifier events.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;

use tcp_relay::{EventNotifier, RelayConfig, RelayServer};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(dead_code)]
pub struct TcpEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    /// Connections that reached EOF from the relay side.
    pub closed: Arc<AtomicU64>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TcpEchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicU64::new(0));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);
        let closed_clone = Arc::clone(&closed);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let bytes = Arc::clone(&bytes_clone);
                                let closed = Arc::clone(&closed_clone);
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                bytes.fetch_add(n as u64, Ordering::Relaxed);
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                    closed.fetch_add(1, Ordering::Relaxed);
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            bytes_received,
            closed,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn closed_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Drop for TcpEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Target that writes a fixed payload on connect and then closes.
#[allow(dead_code)]
pub struct GreetingBackend {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl GreetingBackend {
    pub async fn spawn(payload: Vec<u8>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                let payload = payload.clone();
                                tokio::spawn(async move {
                                    let _ = stream.write_all(&payload).await;
                                    let _ = stream.shutdown().await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Drop for GreetingBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Target that accepts connections and never reads from them.
#[allow(dead_code)]
pub struct StalledBackend {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl StalledBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => held.push(stream),
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Drop for StalledBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Loopback target whose accept queue is full, so new connects never
/// complete their handshake.
#[allow(dead_code)]
pub struct UnresponsiveTarget {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _held: Vec<TcpStream>,
}

#[allow(dead_code)]
impl UnresponsiveTarget {
    pub async fn spawn() -> io::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.bind("127.0.0.1:0".parse().unwrap())?;
        let listener = socket.listen(0)?;
        let addr = listener.local_addr()?;

        // Never accepted; connects past the backlog stall in SYN retries.
        let mut held = Vec::new();
        for _ in 0..4 {
            if let Ok(Ok(stream)) =
                tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
            {
                held.push(stream);
            }
        }

        Ok(Self {
            addr,
            _listener: listener,
            _held: held,
        })
    }
}

/// Notifier event, as seen by [`RecordingNotifier`].
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop,
    Request(Vec<u8>),
    Response(Vec<u8>),
    ServerReceive(Vec<u8>),
    ServerSend(Vec<u8>),
    ClientReceive(Vec<u8>),
    ClientSend(Vec<u8>),
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Events without the receive aliases, which always mirror
    /// request/response.
    pub fn primary_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::ServerReceive(_) | Event::ClientReceive(_)))
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }
}

impl EventNotifier for RecordingNotifier {
    fn on_start(&self) {
        self.push(Event::Start);
    }
    fn on_stop(&self) {
        self.push(Event::Stop);
    }
    fn on_request(&self, data: &[u8]) {
        self.push(Event::Request(data.to_vec()));
    }
    fn on_response(&self, data: &[u8]) {
        self.push(Event::Response(data.to_vec()));
    }
    fn on_server_receive(&self, data: &[u8]) {
        self.push(Event::ServerReceive(data.to_vec()));
    }
    fn on_server_send(&self, data: &[u8]) {
        self.push(Event::ServerSend(data.to_vec()));
    }
    fn on_client_receive(&self, data: &[u8]) {
        self.push(Event::ClientReceive(data.to_vec()));
    }
    fn on_client_send(&self, data: &[u8]) {
        self.push(Event::ClientSend(data.to_vec()));
    }
}

/// A port that was free a moment ago.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Relay config listening on a free loopback port and targeting `target`.
pub async fn relay_config(target: SocketAddr) -> RelayConfig {
    RelayConfig::new(free_port().await, target.ip().to_string(), target.port())
        .unwrap()
        .with_listen_addr("127.0.0.1".parse().unwrap())
}

pub async fn start_relay(config: RelayConfig, notifier: Arc<dyn EventNotifier>) -> RelayServer {
    RelayServer::start(config, notifier)
        .await
        .expect("relay should start")
}

/// Deterministic, non-text payload of `len` bytes.
#[allow(dead_code)]
pub fn pattern(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] passes.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Read until EOF or error; returns what was read before the close.
#[allow(dead_code)]
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}
