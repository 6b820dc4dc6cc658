//! Core WebSocket infrastructure.
//!
//! This module holds the transport-agnostic pieces of a resilient real-time
//! connection; [`crate::realtime`] builds the execution update client on top of them.
//!
//! # Architecture
//!
//! - [`config::Config`]: per-connection options with documented defaults
//! - [`policy::ReconnectPolicy`]: backoff with jitter, and [`policy::StormGuard`]
//! - [`state::ConnectionState`]: the connection state machine, free of I/O
//! - [`connection::SocketHandle`]: one spawned socket reporting to a [`SocketListener`]

pub mod config;
pub mod connection;
pub mod error;
pub mod policy;
pub mod state;
pub mod traits;

pub use config::Config;
pub use connection::{ReadyState, SocketHandle};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use state::ConnectionStatus;
pub use traits::*;
