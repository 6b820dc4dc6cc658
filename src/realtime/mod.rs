//! Real-time execution update client.
//!
//! A [`Client`] owns one WebSocket to the backend for a primary execution id and
//! can multiplex further ids on it. [`Manager`] keeps one client per id.
//!
//! # Example
//!
//! ```no_run
//! use agent_realtime::realtime::{ClientEvent, Manager};
//! use futures::StreamExt as _;
//!
//! # async fn run() -> agent_realtime::Result<()> {
//! let manager = Manager::from_env()?;
//! let client = manager.get_client("exec-1", None)?;
//! let mut events = Box::pin(client.events());
//!
//! client.connect().await?;
//! while let Some(event) = events.next().await {
//!     if let ClientEvent::Completed(record) = event? {
//!         println!("{} finished: {:?}", record.message_id, record.status());
//!         break;
//!     }
//! }
//! manager.disconnect_all();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dispatch;
pub mod manager;
pub mod types;

pub use client::Client;
pub use dispatch::ClientEvent;
pub use manager::Manager;
