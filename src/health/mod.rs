//! REST health check for the agent backend.
//!
//! The non-streaming counterpart of the real-time channel: a plain `GET /health`,
//! optionally polled on an interval.

pub mod client;
pub mod types;

pub use client::Client;
