//! Routing of inbound frames into client events.

use dashmap::{DashMap, DashSet};

use super::types::response::{Ack, ExecutionRecord, ServerFrame};
use crate::ws::ConnectionStatus;

/// Event published by a [`super::Client`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection status changed
    StatusChanged(ConnectionStatus),
    /// Keep-alive answer received
    Pong,
    /// The backend accepted the socket
    ConnectionEstablished(Ack),
    /// A `subscribe` was acknowledged
    Subscribed(Ack),
    /// An `unsubscribe` was acknowledged
    Unsubscribed(Ack),
    /// Any recognized inbound frame, before type-specific handling
    Message(ServerFrame),
    /// Merged record after an `update` frame
    Update(ExecutionRecord),
    /// First merged record reporting `is_complete`, sent once per id
    Completed(ExecutionRecord),
    /// Reconnection gave up and the client entered cooldown
    ReconnectFailed {
        /// Reconnect attempts made in the failed episode
        attempts: u32,
    },
}

/// Buffers merged execution records and turns frames into [`ClientEvent`]s.
#[derive(Debug, Default)]
pub struct Dispatcher {
    buffers: DashMap<String, ExecutionRecord>,
    completed: DashSet<String>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for one inbound frame, in publication order.
    ///
    /// Unknown frames and updates without a usable `message_id` produce nothing.
    pub fn apply(&self, frame: ServerFrame) -> Vec<ClientEvent> {
        match frame {
            ServerFrame::Unknown => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Dropping frame with unrecognized type");
                Vec::new()
            }
            ServerFrame::Update(ref update) => {
                let Some(id) = update.target() else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Dropping update frame without message_id");
                    return Vec::new();
                };

                let record = {
                    let mut entry = self
                        .buffers
                        .entry(id.to_owned())
                        .or_insert_with(|| ExecutionRecord::new(id));
                    entry.merge(&update.fields);
                    entry.clone()
                };

                let mut events = vec![
                    ClientEvent::Message(frame.clone()),
                    ClientEvent::Update(record.clone()),
                ];
                if record.is_complete() && self.completed.insert(record.message_id.clone()) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(message_id = %record.message_id, "Execution completed");
                    events.push(ClientEvent::Completed(record));
                }
                events
            }
            ServerFrame::Pong => vec![ClientEvent::Message(frame), ClientEvent::Pong],
            ServerFrame::ConnectionEstablished(ref ack) => {
                let ack = ack.clone();
                vec![
                    ClientEvent::Message(frame),
                    ClientEvent::ConnectionEstablished(ack),
                ]
            }
            ServerFrame::Subscription(ref ack) => {
                let ack = ack.clone();
                vec![ClientEvent::Message(frame), ClientEvent::Subscribed(ack)]
            }
            ServerFrame::Unsubscription(ref ack) => {
                let ack = ack.clone();
                vec![ClientEvent::Message(frame), ClientEvent::Unsubscribed(ack)]
            }
            ServerFrame::Ping | ServerFrame::Subscribe(_) | ServerFrame::Unsubscribe(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?frame, "Ignoring client-bound frame type from server");
                vec![ClientEvent::Message(frame)]
            }
        }
    }

    /// Latest merged record for `message_id`.
    #[must_use]
    pub fn snapshot(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.buffers.get(message_id).map(|entry| entry.clone())
    }

    #[must_use]
    pub fn is_completed(&self, message_id: &str) -> bool {
        self.completed.contains(message_id)
    }

    /// Drop the buffered record and completion mark for `message_id`.
    pub fn forget(&self, message_id: &str) {
        self.buffers.remove(message_id);
        self.completed.remove(message_id);
    }
}
