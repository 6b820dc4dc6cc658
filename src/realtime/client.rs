use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};

use super::dispatch::{ClientEvent, Dispatcher};
use super::types::request::ClientFrame;
use super::types::response::{ExecutionRecord, parse_frames};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::connection::{self, ReadyState, SocketHandle};
use crate::ws::error::WsError;
use crate::ws::policy::ReconnectPolicy;
use crate::ws::state::{
    ConnectDecision, ConnectionState, ConnectionStatus, Origin, ReconnectDecision, RetryDecision,
};
use crate::ws::traits::SocketListener;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Real-time client bound to one primary target.
///
/// Owns at most one WebSocket at a time and drives it through the connection
/// lifecycle: keep-alive pings while connected, backoff reconnects after the socket
/// drops, and a cooldown after repeated failures. Secondary targets can be
/// multiplexed on the same socket with [`Client::subscribe`].
///
/// Cloning is cheap; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use agent_realtime::realtime::Client;
/// use agent_realtime::ws::Config;
/// use futures::StreamExt as _;
///
/// # async fn run() -> agent_realtime::Result<()> {
/// let client = Client::new("exec-1", "ws://localhost:8000/v1/ws/exec-1", Config::default());
/// let mut updates = Box::pin(client.updates("exec-1"));
///
/// client.connect().await?;
/// while let Some(record) = updates.next().await {
///     let record = record?;
///     println!("{:?}", record.stdout());
///     if record.is_complete() {
///         break;
///     }
/// }
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.inner.target)
            .field("endpoint", &self.inner.endpoint)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    target: String,
    endpoint: String,
    config: Config,
    policy: ReconnectPolicy,
    shared: Mutex<Shared>,
    dispatcher: Dispatcher,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ClientEvent>,
    this: Weak<ClientInner>,
}

struct Shared {
    state: ConnectionState,
    socket: Option<SocketHandle>,
    pending: Option<Pending>,
    last_error: Option<WsError>,
    timers: Timers,
}

/// Reply slot of the `connect()` call waiting on socket `generation`.
struct Pending {
    generation: u64,
    reply: oneshot::Sender<std::result::Result<(), WsError>>,
}

#[derive(Default)]
struct Timers {
    connect_timeout: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    cooldown: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort(slot: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Timers tied to the current socket.
    fn cancel_socket(&mut self) {
        Self::abort(&mut self.connect_timeout);
        Self::abort(&mut self.settle);
        Self::abort(&mut self.keep_alive);
    }

    fn cancel_all(&mut self) {
        self.cancel_socket();
        Self::abort(&mut self.reconnect);
        Self::abort(&mut self.cooldown);
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl Client {
    /// Create a disconnected client for `target` that connects to `endpoint`.
    ///
    /// Nothing is spawned until [`Client::connect`] is called.
    #[must_use]
    pub fn new<T: Into<String>, E: Into<String>>(target: T, endpoint: E, config: Config) -> Self {
        let target = target.into();
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new_cyclic(|this| ClientInner {
            endpoint: endpoint.into(),
            policy: config.reconnect_policy(),
            shared: Mutex::new(Shared {
                state: ConnectionState::new(&target),
                socket: None,
                pending: None,
                last_error: None,
                timers: Timers::default(),
            }),
            target,
            config,
            dispatcher: Dispatcher::new(),
            status_tx,
            events_tx,
            this: this.clone(),
        });

        Self { inner }
    }

    /// Open the connection.
    ///
    /// Resolves once the socket is open and the settle delay has passed, or at once
    /// when already connected or connecting. Fails when the client is cooling down, a
    /// reconnection is in flight, an attempt storm is detected, or the attempt
    /// itself fails or times out.
    pub async fn connect(&self) -> Result<()> {
        Ok(self.inner.connect(Origin::Caller).await?)
    }

    /// Close the connection and cancel pending reconnects. Idempotent.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        self.inner.disconnect_locked(&mut shared);
    }

    /// Add a secondary subscription.
    ///
    /// Sent immediately when the socket is open; otherwise recorded and replayed
    /// once the next connection is established. Empty ids are ignored.
    pub fn subscribe(&self, target: &str) {
        if target.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Ignoring subscribe with empty id");
            return;
        }

        let mut shared = self.inner.lock();
        if !shared.state.add_subscription(target) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(primary = %self.inner.target, %target, "Adding subscription");

        if shared.socket.as_ref().is_some_and(SocketHandle::is_open)
            && let Err(e) = send_frame(&shared, &ClientFrame::subscribe(target))
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(%target, error = %e, "Failed to send subscribe");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    /// Remove a secondary subscription. The primary target cannot be removed.
    pub fn unsubscribe(&self, target: &str) {
        let mut shared = self.inner.lock();
        if !shared.state.remove_subscription(target) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%target, "Ignoring unsubscribe for unknown or primary target");
            return;
        }
        self.inner.dispatcher.forget(target);

        if shared.socket.as_ref().is_some_and(SocketHandle::is_open)
            && let Err(e) = send_frame(&shared, &ClientFrame::unsubscribe(target))
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(%target, error = %e, "Failed to send unsubscribe");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Receiver observing every status change.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Stream of every event this client publishes from now on.
    ///
    /// A consumer that falls behind receives [`WsError::Lagged`] and keeps going.
    pub fn events(&self) -> impl Stream<Item = Result<ClientEvent>> + use<> {
        let mut rx = self.inner.events_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream of merged records for `target` only.
    pub fn updates(&self, target: &str) -> impl Stream<Item = Result<ExecutionRecord>> + use<> {
        let mut rx = self.inner.events_tx.subscribe();
        let target = target.to_owned();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::Update(record)) if record.message_id == target => {
                        yield record;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%target, "Update stream lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Latest merged record for `message_id`.
    #[must_use]
    pub fn snapshot(&self, message_id: &str) -> Option<ExecutionRecord> {
        self.inner.dispatcher.snapshot(message_id)
    }

    /// Current subscription set, primary target included.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().state.subscriptions().iter().cloned().collect()
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Disconnect and cancel every timer. A client cooling down is reset to
    /// `disconnected`, since its cooldown timer no longer runs.
    pub(crate) fn shutdown(&self) {
        let mut shared = self.inner.lock();
        self.inner.disconnect_locked(&mut shared);
        shared.timers.cancel_all();

        if shared.state.status() == ConnectionStatus::Failed {
            shared.state.clear_cooldown();
            self.inner.sync_status(&shared);
        }
    }
}

fn send_frame(shared: &Shared, frame: &ClientFrame) -> Result<()> {
    let text = frame.to_json()?;
    let socket = shared.socket.as_ref().ok_or(WsError::ConnectionClosed)?;
    socket.send_text(text)?;
    Ok(())
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Every transition leaves `Shared` consistent, so a poisoned lock is still usable.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the current status if it changed. Called with the lock held so
    /// observers see transitions in order.
    fn sync_status(&self, shared: &Shared) {
        let status = shared.state.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            #[cfg(feature = "tracing")]
            tracing::debug!(target_id = %self.target, %status, "Connection status changed");
            _ = self.events_tx.send(ClientEvent::StatusChanged(status));
        }
    }

    fn publish(&self, event: ClientEvent) {
        _ = self.events_tx.send(event);
    }

    async fn connect(&self, origin: Origin) -> std::result::Result<(), WsError> {
        let reply = {
            let mut shared = self.lock();

            match shared.state.begin_connect(Instant::now(), origin) {
                ConnectDecision::AlreadyActive => return Ok(()),
                ConnectDecision::Rejected(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(target_id = %self.target, error = %e, "Connect refused");
                    return Err(e);
                }
                ConnectDecision::Storm { attempts } => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        target_id = %self.target,
                        attempts,
                        "Connection attempt storm detected"
                    );
                    self.enter_cooldown(&mut shared);
                    return Err(WsError::TooManyAttempts { attempts });
                }
                ConnectDecision::Proceed { generation } => {
                    self.open_socket(&mut shared, generation)
                }
            }
        };

        reply.await.unwrap_or(Err(WsError::ConnectionClosed))
    }

    fn open_socket(
        &self,
        shared: &mut Shared,
        generation: u64,
    ) -> oneshot::Receiver<std::result::Result<(), WsError>> {
        if let Some(previous) = shared.socket.take() {
            previous.shutdown();
        }
        shared.timers.cancel_socket();
        shared.last_error = None;
        reject_pending(shared, WsError::ConnectionClosed);

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, endpoint = %self.endpoint, generation, "Connecting");

        let (reply, rx) = oneshot::channel();
        shared.pending = Some(Pending { generation, reply });
        shared.socket = Some(connection::spawn(
            self.endpoint.clone(),
            generation,
            self.this.clone(),
        ));
        shared.timers.connect_timeout = Some(self.spawn_connect_timeout(generation));
        self.sync_status(shared);

        rx
    }

    fn disconnect_locked(&self, shared: &mut Shared) {
        if !shared.state.begin_disconnect() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, "Disconnecting");

        shared.timers.cancel_socket();
        Timers::abort(&mut shared.timers.reconnect);
        reject_pending(shared, WsError::ConnectionClosed);
        if let Some(socket) = shared.socket.take() {
            socket.shutdown();
        }
        self.sync_status(shared);
    }

    fn schedule_reconnect(&self, shared: &mut Shared) {
        match shared.state.begin_reconnect(&self.policy) {
            ReconnectDecision::Skip => {}
            ReconnectDecision::Cooldown => self.enter_cooldown(shared),
            ReconnectDecision::Schedule { attempt } => {
                let delay = self.policy.calculate_delay(attempt);

                #[cfg(feature = "tracing")]
                tracing::debug!(target_id = %self.target, attempt, ?delay, "Scheduling reconnect");

                self.sync_status(shared);
                Timers::abort(&mut shared.timers.reconnect);
                shared.timers.reconnect = Some(self.spawn_reconnect(delay));
            }
        }
    }

    fn enter_cooldown(&self, shared: &mut Shared) {
        if !shared.state.enter_cooldown() {
            return;
        }

        let attempts = shared.state.reconnect_attempts();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            target_id = %self.target,
            attempts,
            cooldown = ?self.config.reconnect_cooldown,
            "Entering reconnect cooldown"
        );

        shared.timers.cancel_all();
        if let Some(socket) = shared.socket.take() {
            socket.shutdown();
        }
        reject_pending(shared, WsError::CoolingDown);
        self.sync_status(shared);
        self.publish(ClientEvent::ReconnectFailed { attempts });

        let weak = self.this.clone();
        let cooldown = self.config.reconnect_cooldown;
        shared.timers.cooldown = Some(tokio::spawn(async move {
            sleep(cooldown).await;
            if let Some(inner) = weak.upgrade() {
                let mut shared = inner.lock();
                shared.timers.cooldown.take();
                shared.state.clear_cooldown();

                #[cfg(feature = "tracing")]
                tracing::debug!(target_id = %inner.target, "Cooldown elapsed");

                inner.sync_status(&shared);
            }
        }));
    }

    fn spawn_connect_timeout(&self, generation: u64) -> JoinHandle<()> {
        let weak = self.this.clone();
        let timeout = self.config.connection_timeout;

        tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_timeout(generation, timeout);
            }
        })
    }

    fn on_connect_timeout(&self, generation: u64, timeout: Duration) {
        let mut shared = self.lock();
        if shared.state.is_current(generation) {
            shared.timers.connect_timeout.take();
        }
        if !shared.state.on_timeout(generation) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(target_id = %self.target, ?timeout, "Connection attempt timed out");

        if let Some(socket) = shared.socket.take() {
            socket.abort();
        }
        reject_pending(&mut shared, WsError::Timeout(timeout));
        self.sync_status(&shared);

        if self.config.auto_reconnect {
            self.schedule_reconnect(&mut shared);
        }
    }

    fn spawn_reconnect(&self, delay: Duration) -> JoinHandle<()> {
        let weak = self.this.clone();

        tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            {
                let mut shared = inner.lock();
                if !shared.state.is_reconnecting() {
                    return;
                }
                shared.timers.reconnect.take();
                shared.state.reconnect_fired();
            }

            if let Err(e) = inner.connect(Origin::Reconnect).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(target_id = %inner.target, error = %e, "Reconnect attempt failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                let mut shared = inner.lock();
                match shared.state.reconnect_failed(&inner.policy) {
                    RetryDecision::Stop => {}
                    RetryDecision::Cooldown => inner.enter_cooldown(&mut shared),
                    RetryDecision::Retry => inner.schedule_reconnect(&mut shared),
                }
            }
        })
    }

    fn spawn_settle(&self, generation: u64) -> JoinHandle<()> {
        let weak = self.this.clone();
        let delay = self.config.message_delay;

        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_settled(generation);
            }
        })
    }

    fn on_settled(&self, generation: u64) {
        let mut shared = self.lock();
        if !shared.state.is_current(generation) {
            return;
        }
        shared.timers.settle.take();

        let ready = shared
            .socket
            .as_ref()
            .filter(|socket| socket.generation() == generation)
            .map(SocketHandle::ready_state);

        match ready {
            Some(ReadyState::Open) => {
                shared.timers.keep_alive = Some(self.spawn_keep_alive(generation));
                self.replay(&mut shared, generation);
                resolve_pending(&mut shared, generation, Ok(()));
            }
            Some(ReadyState::Connecting) => resolve_pending(&mut shared, generation, Ok(())),
            _ => resolve_pending(&mut shared, generation, Err(WsError::ConnectionClosed)),
        }
    }

    fn spawn_keep_alive(&self, generation: u64) -> JoinHandle<()> {
        let weak = self.this.clone();
        let period = self.config.ping_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.send_ping(generation) {
                    break;
                }
            }
        })
    }

    /// Returns `false` once keep-alive should stop.
    fn send_ping(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if !shared.state.is_current(generation)
            || shared.state.status() != ConnectionStatus::Connected
        {
            return false;
        }

        match send_frame(&shared, &ClientFrame::Ping) {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(target_id = %self.target, "Sent keep-alive ping");
                true
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(target_id = %self.target, error = %e, "Keep-alive ping failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                shared.timers.keep_alive.take();
                self.disconnect_locked(&mut shared);
                if self.config.auto_reconnect {
                    self.schedule_reconnect(&mut shared);
                }
                false
            }
        }
    }

    /// Send `subscribe` for every secondary target, once per socket.
    fn replay(&self, shared: &mut Shared, generation: u64) {
        let targets = shared.state.take_replay(generation);
        if targets.is_empty() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, count = targets.len(), "Replaying subscriptions");

        for target in targets {
            if let Err(e) = send_frame(shared, &ClientFrame::subscribe(target.as_str())) {
                #[cfg(feature = "tracing")]
                tracing::warn!(%target, error = %e, "Failed to replay subscription");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Parse and dispatch one text message from socket `generation`.
    fn handle_text(&self, generation: u64, text: &str) {
        let frames = match parse_frames(text.as_bytes()) {
            Ok(frames) => frames,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(target_id = %self.target, error = %e, %text, "Dropping unparseable frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        for frame in frames {
            for event in self.dispatcher.apply(frame) {
                let established = matches!(event, ClientEvent::ConnectionEstablished(_));
                let primary_completed = matches!(
                    &event,
                    ClientEvent::Completed(record) if record.message_id == self.target
                );

                self.publish(event);

                if established {
                    self.replay(&mut self.lock(), generation);
                }
                if primary_completed {
                    self.on_primary_completed();
                }
            }
        }
    }

    fn on_primary_completed(&self) {
        if self.config.keep_alive {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, "Primary target complete, reconnects disabled");

        self.lock().state.finish();
    }
}

fn reject_pending(shared: &mut Shared, error: WsError) {
    if let Some(pending) = shared.pending.take() {
        _ = pending.reply.send(Err(error));
    }
}

fn resolve_pending(
    shared: &mut Shared,
    generation: u64,
    result: std::result::Result<(), WsError>,
) {
    if shared
        .pending
        .as_ref()
        .is_some_and(|pending| pending.generation == generation)
        && let Some(pending) = shared.pending.take()
    {
        _ = pending.reply.send(result);
    }
}

impl SocketListener for ClientInner {
    fn on_open(&self, generation: u64) {
        let mut shared = self.lock();
        if !shared.state.on_open(generation) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, generation, "WebSocket open");

        Timers::abort(&mut shared.timers.connect_timeout);
        self.sync_status(&shared);
        shared.timers.settle = Some(self.spawn_settle(generation));
    }

    fn on_text(&self, generation: u64, text: &str) {
        if !is_attached(&self.lock(), generation) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(target_id = %self.target, %text, "Received frame");

        self.handle_text(generation, text);
    }

    fn on_error(&self, generation: u64, error: WsError) {
        let mut shared = self.lock();
        if !is_attached(&shared, generation) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(target_id = %self.target, generation, error = %error, "WebSocket error");

        if shared.state.on_error(generation) {
            self.sync_status(&shared);
        }
        shared.last_error = Some(error);
    }

    fn on_close(&self, generation: u64) {
        let mut shared = self.lock();
        if !is_attached(&shared, generation) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(target_id = %self.target, generation, "WebSocket closed");

        shared.timers.cancel_socket();
        shared.socket = None;

        let error = shared.last_error.take().unwrap_or(WsError::ConnectionClosed);
        reject_pending(&mut shared, error);

        let reconnect = shared.state.on_close(generation, self.config.auto_reconnect);
        self.sync_status(&shared);

        if reconnect {
            self.schedule_reconnect(&mut shared);
        }
    }
}

/// Whether socket `generation` is the one currently owned by the client.
///
/// Sockets detached by a disconnect, a timeout or cooldown are no longer attached.
fn is_attached(shared: &Shared, generation: u64) -> bool {
    shared.state.is_current(generation)
        && shared
            .socket
            .as_ref()
            .is_some_and(|socket| socket.generation() == generation)
}
