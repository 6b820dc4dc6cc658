//! Per-connection state machine.
//!
//! [`ConnectionState`] holds every mutable field of one logical connection and
//! exposes its transitions as plain methods. It performs no I/O: the caller owns
//! sockets and timers and applies the decisions returned here, which keeps the
//! lifecycle rules testable with explicit [`Instant`]s.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;

use super::error::WsError;
use super::policy::{ReconnectPolicy, StormGuard};

/// Lifecycle status of a connection.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    /// No socket and nothing scheduled
    #[default]
    Disconnected,
    /// A socket is being opened
    Connecting,
    /// The socket is open
    Connected,
    /// Waiting for the backoff timer before the next attempt
    Reconnecting,
    /// The last attempt or the open socket failed
    Error,
    /// Cooling down after repeated failures; attempts are refused
    Failed,
}

impl ConnectionStatus {
    /// `connected` or `connecting`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }

    /// `disconnected` or `failed`: nothing left to tear down.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Who asked for a connection attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An external caller
    Caller,
    /// The reconnect timer
    Reconnect,
}

/// Outcome of [`ConnectionState::begin_connect`].
#[non_exhaustive]
#[derive(Debug)]
pub enum ConnectDecision {
    /// Already connected or connecting; resolve immediately
    AlreadyActive,
    /// Refuse the attempt
    Rejected(WsError),
    /// Attempt storm detected; enter cooldown and refuse
    Storm {
        /// Attempts counted in the storm window
        attempts: u32,
    },
    /// Open a new socket tagged with `generation`
    Proceed {
        /// Generation of the socket about to be opened
        generation: u64,
    },
}

/// Outcome of [`ConnectionState::begin_reconnect`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A reconnection is already running
    Skip,
    /// Attempts exhausted
    Cooldown,
    /// Arm the backoff timer for this attempt number
    Schedule {
        /// Attempt number used for the backoff computation
        attempt: u32,
    },
}

/// Outcome of [`ConnectionState::reconnect_failed`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Cooldown was entered independently; do nothing
    Stop,
    /// Attempts exhausted
    Cooldown,
    /// Schedule another reconnect
    Retry,
}

/// Mutable state of one logical connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ConnectionStatus,
    reconnect_attempts: u32,
    is_reconnecting: bool,
    reconnect_armed: bool,
    primary: String,
    subscriptions: BTreeSet<String>,
    storm: StormGuard,
    generation: u64,
    replayed_generation: Option<u64>,
    finished: bool,
}

impl ConnectionState {
    #[must_use]
    pub fn new(primary: &str) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            is_reconnecting: false,
            reconnect_armed: false,
            primary: primary.to_owned(),
            subscriptions: BTreeSet::from([primary.to_owned()]),
            storm: StormGuard::default(),
            generation: 0,
            replayed_generation: None,
            finished: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    /// Whether a backoff timer is armed and has not fired yet.
    #[must_use]
    pub fn is_reconnect_armed(&self) -> bool {
        self.reconnect_armed
    }

    #[must_use]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    #[must_use]
    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    /// Generation of the most recently opened socket.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether events tagged with `generation` belong to the current socket.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark the primary target complete; closes no longer schedule reconnects.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Guards and storm check for a connection attempt.
    pub fn begin_connect(&mut self, now: Instant, origin: Origin) -> ConnectDecision {
        if self.status.is_active() {
            return ConnectDecision::AlreadyActive;
        }
        if self.status == ConnectionStatus::Failed {
            return ConnectDecision::Rejected(WsError::CoolingDown);
        }
        match origin {
            Origin::Caller if self.is_reconnecting => {
                return ConnectDecision::Rejected(WsError::ReconnectInProgress);
            }
            // The reconnection was cancelled after its timer fired.
            Origin::Reconnect if !self.is_reconnecting => {
                return ConnectDecision::Rejected(WsError::ConnectionClosed);
            }
            Origin::Caller | Origin::Reconnect => {}
        }
        if self.storm.record(now) {
            return ConnectDecision::Storm {
                attempts: self.storm.consecutive_attempts(),
            };
        }

        if origin == Origin::Caller {
            self.finished = false;
        }
        self.generation = self.generation.wrapping_add(1);
        self.status = ConnectionStatus::Connecting;

        ConnectDecision::Proceed {
            generation: self.generation,
        }
    }

    /// Socket `generation` opened. Returns `false` for a detached socket.
    pub fn on_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.status != ConnectionStatus::Connecting {
            return false;
        }

        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        self.is_reconnecting = false;
        true
    }

    /// Socket `generation` reported an error. Returns `false` for a detached socket.
    pub fn on_error(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.status.is_settled() {
            return false;
        }

        self.status = ConnectionStatus::Error;
        true
    }

    /// Socket `generation` closed. Returns `true` when a reconnect should be scheduled.
    pub fn on_close(&mut self, generation: u64, auto_reconnect: bool) -> bool {
        if !self.is_current(generation) || self.status.is_settled() {
            return false;
        }

        self.status = ConnectionStatus::Disconnected;
        auto_reconnect && !self.is_reconnecting && !self.finished
    }

    /// The connection timeout for `generation` fired. Returns `true` when the
    /// attempt was still pending and is now failed.
    pub fn on_timeout(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.status != ConnectionStatus::Connecting {
            return false;
        }

        self.status = ConnectionStatus::Error;
        true
    }

    /// Returns `false` when there is nothing to disconnect.
    pub fn begin_disconnect(&mut self) -> bool {
        if self.status.is_settled() {
            return false;
        }

        self.status = ConnectionStatus::Disconnected;
        self.is_reconnecting = false;
        self.reconnect_armed = false;
        true
    }

    pub fn begin_reconnect(&mut self, policy: &ReconnectPolicy) -> ReconnectDecision {
        if self.is_reconnecting {
            return ReconnectDecision::Skip;
        }
        if policy.is_exhausted(self.reconnect_attempts) {
            return ReconnectDecision::Cooldown;
        }

        self.is_reconnecting = true;
        self.reconnect_armed = true;
        self.status = ConnectionStatus::Reconnecting;
        ReconnectDecision::Schedule {
            attempt: self.reconnect_attempts,
        }
    }

    /// The backoff timer fired.
    pub fn reconnect_fired(&mut self) {
        self.reconnect_armed = false;
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
    }

    /// The attempt started by the backoff timer failed.
    ///
    /// Stops when cooldown was entered meanwhile, a disconnect cleared the
    /// reconnection, or the socket opened and its close already armed the next timer.
    pub fn reconnect_failed(&mut self, policy: &ReconnectPolicy) -> RetryDecision {
        if self.status == ConnectionStatus::Failed
            || !self.is_reconnecting
            || self.reconnect_armed
        {
            return RetryDecision::Stop;
        }
        if policy.is_exhausted(self.reconnect_attempts) {
            return RetryDecision::Cooldown;
        }

        self.is_reconnecting = false;
        RetryDecision::Retry
    }

    /// Returns `false` when already cooling down.
    pub fn enter_cooldown(&mut self) -> bool {
        if self.status == ConnectionStatus::Failed {
            return false;
        }

        self.status = ConnectionStatus::Failed;
        self.reconnect_armed = false;
        true
    }

    pub fn clear_cooldown(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.reconnect_attempts = 0;
        self.is_reconnecting = false;
        self.reconnect_armed = false;
        self.storm.reset();
    }

    /// Add `target` to the subscription set. Returns `false` if it was present.
    pub fn add_subscription(&mut self, target: &str) -> bool {
        self.subscriptions.insert(target.to_owned())
    }

    /// Remove a secondary subscription. The primary target is never removed.
    pub fn remove_subscription(&mut self, target: &str) -> bool {
        if target == self.primary {
            return false;
        }
        self.subscriptions.remove(target)
    }

    /// Secondary subscriptions to replay on socket `generation`, at most once per socket.
    pub fn take_replay(&mut self, generation: u64) -> Vec<String> {
        if !self.is_current(generation) || self.replayed_generation == Some(generation) {
            return Vec::new();
        }

        self.replayed_generation = Some(generation);
        self.subscriptions
            .iter()
            .filter(|target| **target != self.primary)
            .cloned()
            .collect()
    }
}
