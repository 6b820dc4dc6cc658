use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::WsError;
use super::traits::SocketListener;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Ready state of a spawned socket.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// A close frame was queued
    Closing,
    /// The socket task has finished or is about to
    Closed,
}

impl ReadyState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            CONNECTING => Self::Connecting,
            OPEN => Self::Open,
            CLOSING => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Owning handle to one spawned WebSocket.
///
/// The socket runs in its own task and reports to a [`SocketListener`] held by weak
/// reference, so a socket never keeps its owner alive. Outgoing frames are queued
/// on an unbounded channel and written by that task.
#[derive(Debug)]
pub struct SocketHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    ready: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl SocketHandle {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_raw(self.ready.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queue a text frame. Fails unless the socket is open.
    pub fn send_text(&self, text: String) -> Result<(), WsError> {
        if !self.is_open() {
            return Err(WsError::ConnectionClosed);
        }

        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_e| WsError::ConnectionClosed)
    }

    /// Close the socket: a close frame when open, an abort while still connecting.
    ///
    /// An aborted socket reports nothing further to its listener.
    pub fn shutdown(&self) {
        match self.ready_state() {
            ReadyState::Connecting => self.task.abort(),
            ReadyState::Open => {
                self.ready.store(CLOSING, Ordering::Release);
                _ = self.outbound.send(Message::Close(None));
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }

    /// Stop the socket task immediately without a close handshake.
    pub fn abort(&self) {
        self.ready.store(CLOSED, Ordering::Release);
        self.task.abort();
    }
}

/// Open a WebSocket to `endpoint` in a background task.
///
/// Must be called from within a Tokio runtime.
pub fn spawn<L: SocketListener>(endpoint: String, generation: u64, listener: Weak<L>) -> SocketHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let ready = Arc::new(AtomicU8::new(CONNECTING));

    let task = tokio::spawn(run(
        endpoint,
        generation,
        listener,
        outbound_rx,
        Arc::clone(&ready),
    ));

    SocketHandle {
        generation,
        outbound,
        ready,
        task,
    }
}

async fn run<L: SocketListener>(
    endpoint: String,
    generation: u64,
    listener: Weak<L>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ready: Arc<AtomicU8>,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%endpoint, generation, "Opening WebSocket");

    let ws_stream = match connect_async(endpoint.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%endpoint, generation, error = %e, "Unable to connect");
            ready.store(CLOSED, Ordering::Release);
            if let Some(listener) = listener.upgrade() {
                listener.on_error(generation, WsError::Connection(e));
                listener.on_close(generation);
            }
            return;
        }
    };

    ready.store(OPEN, Ordering::Release);
    match listener.upgrade() {
        Some(listener) => listener.on_open(generation),
        None => return,
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            // Handle incoming frames
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, generation, "Received WebSocket text message");
                        let Some(listener) = listener.upgrade() else {
                            break;
                        };
                        listener.on_text(generation, text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?frame, generation, "Server closed WebSocket");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &frame;
                        break;
                    }
                    Some(Err(e)) => {
                        ready.store(CLOSED, Ordering::Release);
                        if let Some(listener) = listener.upgrade() {
                            listener.on_error(generation, WsError::Connection(e));
                        }
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {
                        // Protocol pings are answered by tungstenite; binary frames are not part of the protocol.
                    }
                }
            }

            // Handle outgoing frames
            out = outbound_rx.recv() => {
                match out {
                    Some(Message::Close(frame)) => {
                        ready.store(CLOSING, Ordering::Release);
                        _ = write.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(message) => {
                        if let Err(e) = write.send(message).await {
                            ready.store(CLOSED, Ordering::Release);
                            if let Some(listener) = listener.upgrade() {
                                listener.on_error(generation, WsError::Connection(e));
                            }
                            break;
                        }
                    }
                    None => {
                        // Handle dropped
                        _ = write.close().await;
                        break;
                    }
                }
            }
        }
    }

    ready.store(CLOSED, Ordering::Release);
    if let Some(listener) = listener.upgrade() {
        listener.on_close(generation);
    }
}
