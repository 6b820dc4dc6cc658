//! Reconnection arithmetic and connection-attempt storm detection.

use std::time::{Duration, Instant};

use rand::Rng as _;

/// Window inside which consecutive connection attempts count towards a storm.
pub const STORM_WINDOW: Duration = Duration::from_secs(1);

/// Attempts tolerated inside [`STORM_WINDOW`]; one more trips the guard.
pub const STORM_THRESHOLD: u32 = 3;

/// Exponential backoff with additive jitter, capped at `max_delay`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay for attempt zero
    pub interval: Duration,
    /// Growth factor applied once per attempt
    pub backoff_multiplier: f64,
    /// Cap applied before jitter is added
    pub max_delay: Duration,
    /// Width of the uniform jitter window
    pub jitter: Duration,
    /// Failed reconnects tolerated before cooldown
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Deterministic part of the delay for `attempt`: `interval * multiplier^attempt`,
    /// capped at `max_delay`.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "Backoff growth is defined as a floating point power"
    )]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.interval.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());

        // NaN or negative products come from a nonsensical multiplier; fall back to the cap.
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay to wait before reconnect `attempt`, including jitter in
    /// `[0, jitter]` so that many clients do not retry in lockstep.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);

        if jitter_ms == 0 {
            return base;
        }

        let extra = rand::rng().random_range(0..=jitter_ms);
        base.saturating_add(Duration::from_millis(extra))
    }

    /// Whether `attempts` failed reconnects exhaust this policy.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Detects bursts of connection attempts.
///
/// Each attempt made less than [`STORM_WINDOW`] after the previous one extends the
/// current run; a slower attempt starts a new run. A run longer than
/// [`STORM_THRESHOLD`] is a storm.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct StormGuard {
    consecutive_attempts: u32,
    last_attempt: Option<Instant>,
}

impl StormGuard {
    /// Record an attempt made at `now`. Returns `true` when the attempt is part of a storm.
    pub fn record(&mut self, now: Instant) -> bool {
        let within_window = self
            .last_attempt
            .is_some_and(|last| now.saturating_duration_since(last) < STORM_WINDOW);

        self.consecutive_attempts = if within_window {
            self.consecutive_attempts.saturating_add(1)
        } else {
            1
        };
        self.last_attempt = Some(now);

        self.consecutive_attempts > STORM_THRESHOLD
    }

    /// Attempts counted in the current run.
    #[must_use]
    pub fn consecutive_attempts(&self) -> u32 {
        self.consecutive_attempts
    }

    pub fn reset(&mut self) {
        self.consecutive_attempts = 0;
        self.last_attempt = None;
    }
}
