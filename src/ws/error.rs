#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Why a real-time connection failed or refused a request.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// The handshake or the open socket failed
    Connection(tokio_tungstenite::tungstenite::Error),
    /// An inbound frame was not valid JSON
    MessageParse(serde_json::Error),
    /// The socket closed, or was never open, before the operation completed
    ConnectionClosed,
    /// Connection attempt did not open within the configured timeout
    Timeout(Duration),
    /// Client is in cooldown after repeated failures and refuses new attempts
    CoolingDown,
    /// A reconnection attempt is already in flight
    ReconnectInProgress,
    /// Too many connection attempts were made in a short window
    TooManyAttempts {
        /// Attempts observed inside the storm window
        attempts: u32,
    },
    /// A frame was well-formed JSON but not a protocol message
    InvalidMessage(String),
    /// An event stream fell behind the broadcast channel
    Lagged {
        /// Events dropped for this receiver
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "socket failed: {e}"),
            Self::MessageParse(e) => write!(f, "unparseable frame: {e}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Timeout(after) => write!(f, "socket did not open within {after:?}"),
            Self::CoolingDown => write!(
                f,
                "connection refused after repeated failures; retry once the cooldown ends"
            ),
            Self::ReconnectInProgress => write!(f, "a reconnection is already scheduled"),
            Self::TooManyAttempts { attempts } => write!(
                f,
                "{attempts} connection attempts in under a second; entering cooldown"
            ),
            Self::InvalidMessage(msg) => write!(f, "unexpected frame: {msg}"),
            Self::Lagged { count } => write!(f, "event stream lagged by {count} events"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
