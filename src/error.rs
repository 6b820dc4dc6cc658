//! Crate-wide error type.
//!
//! Every fallible operation returns [`crate::Result`]. The [`Kind`] says which layer
//! failed; the typed cause ([`crate::ws::WsError`], [`Validation`], [`Status`] or a
//! dependency error) is recovered with [`Error::downcast_ref`].

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::ws::WsError;

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Layer an [`Error`] originated from.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    /// The health endpoint answered with a non-success status
    Status,
    /// A caller-supplied id, URL or option was rejected
    Validation,
    /// A dependency failed: JSON, URL parsing or the HTTP stack
    Internal,
    /// The real-time connection failed or refused the request
    #[strum(serialize = "websocket")]
    WebSocket,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<BoxedSource>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Captured when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` is set.
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref::<E>()
    }

    /// The connection-level cause, when this is a [`Kind::WebSocket`] error.
    #[must_use]
    pub fn ws(&self) -> Option<&WsError> {
        self.downcast_ref::<WsError>()
    }

    pub fn validation<S: Into<String>>(reason: S) -> Self {
        Validation {
            reason: reason.into(),
        }
        .into()
    }

    #[cfg(feature = "health")]
    pub fn status<S: Into<String>>(
        status_code: reqwest::StatusCode,
        method: reqwest::Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{} error: {source}", self.kind),
            None => write!(f, "{} error", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

/// Non-success answer from the REST health endpoint.
#[cfg(feature = "health")]
#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: reqwest::StatusCode,
    pub method: reqwest::Method,
    pub path: String,
    /// Response body, possibly empty
    pub message: String,
}

#[cfg(feature = "health")]
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.path, self.status_code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

#[cfg(feature = "health")]
impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl StdError for Validation {}

#[cfg(feature = "health")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(e: Validation) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

#[cfg(feature = "health")]
impl From<Status> for Error {
    fn from(e: Status) -> Self {
        Error::with_source(Kind::Status, e)
    }
}
