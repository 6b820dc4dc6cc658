use serde::Serialize;

/// Frame sent from the client to the backend.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keep-alive ping; the backend answers with `pong`
    Ping,
    /// Start receiving updates for `message_id` on this socket
    Subscribe { message_id: String },
    /// Stop receiving updates for `message_id`
    Unsubscribe { message_id: String },
}

impl ClientFrame {
    #[must_use]
    pub fn subscribe<S: Into<String>>(message_id: S) -> Self {
        Self::Subscribe {
            message_id: message_id.into(),
        }
    }

    #[must_use]
    pub fn unsubscribe<S: Into<String>>(message_id: S) -> Self {
        Self::Unsubscribe {
            message_id: message_id.into(),
        }
    }

    /// Serialize into the JSON text carried by a WebSocket frame.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
