#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
#[cfg(feature = "health")]
pub mod health;
pub mod realtime;
pub(crate) mod serde_helpers;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the backend base URL, read by
/// [`realtime::Manager::from_env`].
pub const BASE_URL_VAR: &str = "AGENT_BACKEND_URL";

/// Backend base URL used when [`BASE_URL_VAR`] is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Reserved target id of the health-check channel.
pub const HEALTH_TARGET: &str = "health";
