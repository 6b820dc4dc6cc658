use std::time::Duration;

use bon::Builder;

use super::policy::ReconnectPolicy;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3_000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(30_000);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);
const DEFAULT_RECONNECT_JITTER: Duration = Duration::from_millis(1_000);
const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_millis(60_000);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_MESSAGE_DELAY: Duration = Duration::from_millis(500);

/// Configuration for a single real-time connection.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use agent_realtime::ws::config::Config;
///
/// let config = Config::builder()
///     .reconnect_interval(Duration::from_millis(250))
///     .max_reconnect_attempts(5)
///     .build();
///
/// assert!(config.auto_reconnect);
/// assert_eq!(config.max_reconnect_attempts, 5);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Schedule reconnects automatically after the socket closes or fails
    #[builder(default = true)]
    pub auto_reconnect: bool,
    /// Base delay before the first reconnection attempt
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub reconnect_interval: Duration,
    /// Failed reconnects tolerated before entering cooldown
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
    /// Interval between keep-alive `ping` frames while connected
    #[builder(default = DEFAULT_PING_INTERVAL)]
    pub ping_interval: Duration,
    /// Multiplier applied per attempt to the reconnect interval
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub reconnect_backoff_multiplier: f64,
    /// Upper bound for the backoff delay, before jitter
    #[builder(default = DEFAULT_MAX_RECONNECT_DELAY)]
    pub max_reconnect_delay: Duration,
    /// Width of the uniform random window added to every reconnect delay
    #[builder(default = DEFAULT_RECONNECT_JITTER)]
    pub reconnect_jitter: Duration,
    /// How long the client stays `failed` before accepting new attempts
    #[builder(default = DEFAULT_RECONNECT_COOLDOWN)]
    pub reconnect_cooldown: Duration,
    /// Deadline for the socket to open once a connection attempt starts
    #[builder(default = DEFAULT_CONNECTION_TIMEOUT)]
    pub connection_timeout: Duration,
    /// Settle delay between the socket opening and `connect()` resolving
    #[builder(default = DEFAULT_MESSAGE_DELAY)]
    pub message_delay: Duration,
    /// Keep reconnecting after the primary target reports completion.
    ///
    /// When `false`, a completed primary target marks the client finished and a later
    /// socket close does not schedule a reconnect.
    #[builder(default = true)]
    pub keep_alive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Reconnection policy derived from this configuration.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            backoff_multiplier: self.reconnect_backoff_multiplier,
            max_delay: self.max_reconnect_delay,
            jitter: self.reconnect_jitter,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}
