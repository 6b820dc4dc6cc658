#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test crate uses a different subset of these helpers"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_realtime::realtime::{Client, ClientEvent};
use agent_realtime::ws::{Config, ConnectionStatus};
use futures_util::{SinkExt as _, Stream, StreamExt as _};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Frames sent by the server right after every accepted connection, then optionally a close.
#[derive(Clone, Default)]
pub struct Script {
    pub delay: Duration,
    pub frames: Vec<Value>,
    pub close: bool,
}

#[derive(Clone, Debug)]
enum Command {
    Text(String),
    Close,
}

/// Mock WebSocket backend.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast to every open connection
    command_tx: broadcast::Sender<Command>,
    /// Text frames received from any client
    received_rx: mpsc::UnboundedReceiver<Value>,
    accepts: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        Self::start_scripted(Script::default()).await
    }

    /// Start on a random port; `script` runs on every accepted connection.
    pub async fn start_scripted(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<Value>();
        let accepts = Arc::new(AtomicUsize::new(0));
        let paths = Arc::new(Mutex::new(Vec::new()));

        let broadcast_tx = command_tx.clone();
        let accept_count = Arc::clone(&accepts);
        let seen_paths = Arc::clone(&paths);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_count.fetch_add(1, Ordering::SeqCst);
                let mut command_rx = broadcast_tx.subscribe();

                let record_path = Arc::clone(&seen_paths);
                let callback = move |request: &Request,
                                     response: Response|
                      -> Result<Response, ErrorResponse> {
                    record_path
                        .lock()
                        .unwrap()
                        .push(request.uri().path().to_owned());
                    Ok(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let Script {
                    delay,
                    frames,
                    close,
                } = script.clone();

                tokio::spawn(async move {
                    let scripted = async move {
                        tokio::time::sleep(delay).await;
                        frames
                    };
                    tokio::pin!(scripted);
                    let mut script_done = false;

                    loop {
                        tokio::select! {
                            frames = &mut scripted, if !script_done => {
                                script_done = true;
                                for frame in frames {
                                    if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                                        return;
                                    }
                                }
                                if close {
                                    _ = write.send(Message::Close(None)).await;
                                    return;
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                            drop(received_tx.send(value));
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) => {
                                        _ = write.send(Message::Close(None)).await;
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
            accepts,
            paths,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, target: &str) -> String {
        format!("ws://{}/v1/ws/{target}", self.addr)
    }

    /// Send a frame to every open connection.
    pub fn send(&self, frame: &Value) {
        drop(self.command_tx.send(Command::Text(frame.to_string())));
    }

    /// Close every open connection from the server side.
    pub fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    /// Next frame received from a client.
    pub async fn recv(&mut self) -> Option<Value> {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every frame received within `window`.
    pub async fn collect(&mut self, window: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) =
            tokio::time::timeout_at(deadline, self.received_rx.recv()).await
        {
            frames.push(frame);
        }
        frames
    }
}

/// TCP listener that accepts connections and immediately drops them, failing every handshake.
pub struct RefusingServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
}

impl RefusingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accept_count = Arc::clone(&accepts);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_count.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        Self { addr, accepts }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, target: &str) -> String {
        format!("ws://{}/v1/ws/{target}", self.addr)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// TCP listener that accepts connections and never answers the handshake.
pub struct SilentServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accept_count = Arc::clone(&accepts);

        tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                accept_count.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Self { addr, accepts }
    }

    pub fn ws_url(&self, target: &str) -> String {
        format!("ws://{}/v1/ws/{target}", self.addr)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// Millisecond-scale configuration so lifecycle tests finish quickly.
pub fn fast_config() -> Config {
    Config::builder()
        .reconnect_interval(Duration::from_millis(50))
        .reconnect_jitter(Duration::ZERO)
        .max_reconnect_delay(Duration::from_millis(200))
        .reconnect_cooldown(Duration::from_millis(300))
        .connection_timeout(Duration::from_millis(1_000))
        .message_delay(Duration::from_millis(20))
        .ping_interval(Duration::from_secs(30))
        .build()
}

/// Wait until `client` reports `status`.
pub async fn wait_for_status(client: &Client, status: ConnectionStatus, within: Duration) {
    let mut rx = client.status_receiver();
    timeout(within, rx.wait_for(|current| *current == status))
        .await
        .unwrap_or_else(|_| panic!("status never became {status}, last {}", client.status()))
        .unwrap();
}

/// Every event already buffered on `events`, without waiting for more.
pub async fn drain<S>(events: &mut S) -> Vec<ClientEvent>
where
    S: Stream<Item = agent_realtime::Result<ClientEvent>> + Unpin,
{
    let mut drained = Vec::new();
    while let Ok(Some(Ok(event))) = timeout(Duration::from_millis(20), events.next()).await {
        drained.push(event);
    }
    drained
}
