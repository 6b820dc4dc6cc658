//! Core traits for generic WebSocket infrastructure.

use super::error::WsError;

/// Receives lifecycle events from a socket spawned by [`super::connection::spawn`].
///
/// Every callback carries the generation the socket was spawned with, so a listener
/// that has since opened a newer socket can ignore events from a detached one.
/// Callbacks for one socket are delivered sequentially, in transport order, from that
/// socket's task. They must not block.
pub trait SocketListener: Send + Sync + 'static {
    /// The WebSocket handshake completed.
    fn on_open(&self, generation: u64);

    /// A text frame arrived.
    fn on_text(&self, generation: u64, text: &str);

    /// The socket failed. Always followed by [`SocketListener::on_close`].
    fn on_error(&self, generation: u64, error: WsError);

    /// The socket is gone, whether it closed cleanly or failed.
    fn on_close(&self, generation: u64);
}
