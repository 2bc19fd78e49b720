//! Connection manager and its supervisor task.
//!
//! The manager owns the single physical connection. All state lives in one
//! supervisor task; the public handle only sends commands and reads the
//! published [`ConnectionStatus`].
//!
//! # Event Loop
//!
//! The supervisor selects over:
//!
//! - Commands from the handle (`connect`, `disconnect`, `clear_token`, shutdown)
//! - The in-flight dial (open + acknowledgement, bounded by the handshake timeout)
//! - Inbound frames on the live link (end of stream = connection lost)
//! - The backoff timer before the next reconnect attempt
//! - The idle timer armed when no subscription is wanted
//! - Demand changes published by the channel registry
//! - Token changes announced by the token source

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::RealtimeOptions;
use crate::error::{Error, Result};
use crate::protocol::{InboundMessage, ServerFrame};
use crate::transport::{FrameSink, Link, Transport};

use super::state::{ConnectionState, ConnectionStatus};
use super::token::TokenSource;

// ============================================================================
// LinkListener
// ============================================================================

/// Receives connection-level events from the supervisor.
///
/// Implemented by the layer above (registry + router). Calls are made from
/// the supervisor task, one at a time, and must not block.
pub trait LinkListener: Send + Sync + 'static {
    /// Handshake acknowledged; intents can be written to `sink`.
    fn on_connected(&self, sink: FrameSink);

    /// The live connection is gone.
    fn on_disconnected(&self);

    /// A channel message arrived.
    fn on_message(&self, message: InboundMessage);

    /// An unparsable frame was dropped.
    fn on_malformed(&self) {}
}

// ============================================================================
// Command
// ============================================================================

/// Requests from the handle to the supervisor.
enum Command {
    /// Connect with a token, replying once the attempt resolves.
    Connect {
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear down and stop dialing until the next `Connect`.
    Disconnect { reply: oneshot::Sender<()> },
    /// Forget the token, then behave like `Disconnect`.
    ClearToken { reply: oneshot::Sender<()> },
    /// Tear down and exit the supervisor.
    Shutdown { reply: oneshot::Sender<()> },
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Handle to the connection supervisor.
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`; every operation is a message to
/// the supervisor, so concurrent callers are serialized there.
pub struct ConnectionManager {
    /// Command channel to the supervisor.
    commands: mpsc::UnboundedSender<Command>,
    /// Published status.
    status: watch::Receiver<ConnectionStatus>,
    /// Supervisor task, taken on shutdown.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawns the supervisor on the current tokio runtime.
    ///
    /// `demand` carries the number of subscriptions the registry wants; the
    /// supervisor dials lazily when it becomes non-zero and a token exists.
    #[must_use]
    pub fn spawn(
        endpoint: Url,
        transport: Arc<dyn Transport>,
        tokens: Option<Arc<dyn TokenSource>>,
        options: &RealtimeOptions,
        listener: Arc<dyn LinkListener>,
        demand: watch::Receiver<usize>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (publisher, status) = watch::channel(ConnectionStatus::default());
        let token_changes = tokens.as_ref().and_then(|source| source.changes());

        let supervisor = Supervisor {
            endpoint,
            transport,
            tokens,
            token_changes,
            options: options.clone(),
            listener,
            demand,
            demand_open: true,
            publisher,
            status: ConnectionStatus::default(),
            explicit_token: None,
            active_token: None,
            rejected: None,
            paused: false,
            link: None,
            dial: None,
            retry_at: None,
            idle_at: None,
            waiters: Vec::new(),
        };

        let task = tokio::spawn(supervisor.run(command_rx));

        Self {
            commands,
            status,
            task: Mutex::new(Some(task)),
        }
    }

    /// Connects with `token`, suspending until the attempt resolves.
    ///
    /// No-op if already connected (or connecting) with the same token.
    /// A different token forces a disconnect-then-reconnect cycle.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if the endpoint rejects the token
    /// - [`Error::Connection`] / [`Error::WebSocket`] / [`Error::ConnectionTimeout`]
    ///   if the attempt failed transiently (retries continue in the background)
    /// - [`Error::ConnectionClosed`] if torn down before resolving
    /// - [`Error::Disposed`] after shutdown
    pub async fn connect(&self, token: impl Into<String>) -> Result<()> {
        let (reply, response) = oneshot::channel();

        self.commands
            .send(Command::Connect {
                token: token.into(),
                reply,
            })
            .map_err(|_| Error::Disposed)?;

        response.await.map_err(|_| Error::Disposed)?
    }

    /// Tears down the connection and clears the attempt counter.
    ///
    /// Always succeeds. Automatic dialing stays off until the next
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        self.request(|reply| Command::Disconnect { reply }).await;
    }

    /// Forgets the explicit token (logout) and disconnects.
    pub async fn clear_token(&self) {
        self.request(|reply| Command::ClearToken { reply }).await;
    }

    /// Returns the current status snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Returns a receiver notified on every subsequent status change.
    #[inline]
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        let mut receiver = self.status.clone();
        receiver.mark_unchanged();
        receiver
    }

    /// Stops the supervisor and waits for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.request(|reply| Command::Shutdown { reply }).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Sends a command and waits for its acknowledgement.
    async fn request(&self, make: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(make(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// State owned by the supervisor task.
struct Supervisor {
    endpoint: Url,
    transport: Arc<dyn Transport>,
    tokens: Option<Arc<dyn TokenSource>>,
    /// Change notifications from `tokens`, if it offers them.
    token_changes: Option<watch::Receiver<()>>,
    options: RealtimeOptions,
    listener: Arc<dyn LinkListener>,

    /// Subscription count published by the registry.
    demand: watch::Receiver<usize>,
    /// False once the registry side of `demand` is gone.
    demand_open: bool,

    publisher: watch::Sender<ConnectionStatus>,
    status: ConnectionStatus,

    /// Token passed to `connect`; wins over the token source.
    explicit_token: Option<String>,
    /// Token used by the current or last dial.
    active_token: Option<String>,
    /// Token the endpoint rejected, with its reason.
    rejected: Option<(String, String)>,
    /// Set by `disconnect`; blocks demand-driven dialing.
    paused: bool,

    link: Option<Link>,
    dial: Option<BoxFuture<'static, Result<Link>>>,
    retry_at: Option<Instant>,
    idle_at: Option<Instant>,

    /// `connect` callers waiting for the current attempt.
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Supervisor {
    /// Main loop.
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Connection supervisor started");
        self.set_state(ConnectionState::Disconnected);
        self.on_demand_changed();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }

                        None => {
                            debug!("Manager handle dropped");
                            self.teardown("handle dropped");
                            break;
                        }
                    }
                }

                result = next_dial(&mut self.dial) => {
                    self.dial = None;
                    self.on_dial_result(result);
                }

                frame = next_frame(&mut self.link) => {
                    match frame {
                        Some(text) => self.on_frame(&text),
                        None => self.on_link_lost(),
                    }
                }

                () = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    self.start_dial();
                }

                () = wait_until(self.idle_at) => {
                    self.idle_at = None;
                    self.on_idle();
                }

                changed = next_demand(&mut self.demand, self.demand_open) => {
                    if changed.is_err() {
                        self.demand_open = false;
                    }
                    self.on_demand_changed();
                }

                changed = next_token_change(&mut self.token_changes) => {
                    if changed.is_err() {
                        self.token_changes = None;
                    } else {
                        self.on_token_changed();
                    }
                }
            }
        }

        debug!("Connection supervisor terminated");
    }

    /// Handles a command. Returns `false` when the supervisor should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { token, reply } => {
                self.on_connect(token, reply);
                true
            }

            Command::Disconnect { reply } => {
                self.paused = true;
                self.teardown("disconnect requested");
                let _ = reply.send(());
                true
            }

            Command::ClearToken { reply } => {
                self.explicit_token = None;
                self.rejected = None;
                self.paused = true;
                self.teardown("token cleared");
                let _ = reply.send(());
                true
            }

            Command::Shutdown { reply } => {
                self.teardown("shutdown");
                let _ = reply.send(());
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn on_connect(&mut self, token: String, reply: oneshot::Sender<Result<()>>) {
        self.paused = false;
        let same_token = self.active_token.as_deref() == Some(token.as_str());

        if self.status.state == ConnectionState::Failed
            && let Some((rejected_token, reason)) = &self.rejected
            && *rejected_token == token
        {
            let _ = reply.send(Err(Error::authentication_failed(reason.clone())));
            return;
        }

        if same_token {
            match self.status.state {
                ConnectionState::Connected => {
                    self.pin_token(token);
                    let _ = reply.send(Ok(()));
                    return;
                }

                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    self.pin_token(token);
                    self.waiters.push(reply);
                    if self.dial.is_none() {
                        self.retry_at = None;
                        self.start_dial();
                    }
                    return;
                }

                _ => {}
            }
        }

        if self.is_active() {
            info!("Token changed, cycling connection");
            self.teardown("token rotated");
        }

        self.explicit_token = Some(token);
        self.rejected = None;
        self.status.attempt = 0;
        self.waiters.push(reply);
        self.start_dial();
    }

    /// Opens a connection with the current token.
    fn start_dial(&mut self) {
        let Some(token) = self.current_token() else {
            debug!("No token available, staying disconnected");
            self.teardown("no token");
            return;
        };

        let next_state = if self.status.state == ConnectionState::Reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };

        let endpoint = self.endpoint_with_token(&token);
        self.active_token = Some(token);
        self.status.attempt = self.status.attempt.saturating_add(1);

        let transport = Arc::clone(&self.transport);
        let limit = self.options.handshake_timeout;
        self.dial = Some(Box::pin(async move {
            timeout(limit, handshake(transport, endpoint))
                .await
                .unwrap_or_else(|_| Err(Error::connection_timeout(limit.as_millis() as u64)))
        }));

        debug!(attempt = self.status.attempt, "Dialing real-time endpoint");
        self.set_state(next_state);
    }

    fn on_dial_result(&mut self, result: Result<Link>) {
        match result {
            Ok(link) => {
                let sink = link.sink();
                self.link = Some(link);
                self.status.attempt = 0;
                self.status.last_error = None;
                self.set_state(ConnectionState::Connected);

                self.listener.on_connected(sink);
                self.resolve_waiters(|| Ok(()));
                self.on_demand_changed();
            }

            Err(e) if e.is_auth_failure() => self.fail_auth(&e),

            Err(e) => {
                warn!(error = %e, attempt = self.status.attempt, "Connection attempt failed");
                self.status.last_error = Some(e.to_string());
                self.resolve_waiters(|| Err(replicate(&e)));
                self.schedule_retry();
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match ServerFrame::decode(text) {
            Ok(ServerFrame::Message {
                key,
                event,
                payload,
                seq,
            }) => {
                self.listener.on_message(InboundMessage {
                    key,
                    event,
                    payload,
                    seq,
                });
            }

            Ok(ServerFrame::Reject { reason }) => {
                self.fail_auth(&Error::authentication_failed(reason));
            }

            Ok(ServerFrame::Ack) => debug!("Ignoring repeated handshake ack"),

            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping malformed frame");
                self.listener.on_malformed();
            }
        }
    }

    fn on_link_lost(&mut self) {
        self.link = None;
        self.listener.on_disconnected();

        if !self.wanted() {
            info!("Connection lost while idle");
            self.teardown("lost while idle");
            return;
        }

        warn!("Connection to real-time endpoint lost");
        self.status.last_error = Some(Error::ConnectionClosed.to_string());
        self.schedule_retry();
    }

    /// Arms the backoff timer, or gives up.
    fn schedule_retry(&mut self) {
        if self.current_token().is_none() {
            info!("Token gone, not reconnecting");
            self.teardown("token gone");
            return;
        }

        let attempt = self.status.attempt;
        if attempt >= self.options.max_reconnect_attempts {
            warn!(attempts = attempt, "Reconnect attempts exhausted");
            self.retry_at = None;
            self.status.last_error = Some(Error::reconnection_failed(attempt).to_string());
            self.set_state(ConnectionState::Failed);
            self.resolve_waiters(|| Err(Error::reconnection_failed(attempt)));
            return;
        }

        let delay = self.options.backoff.next_delay(attempt);
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        self.retry_at = Some(deadline_after(delay));
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Token rejected: terminal until a new token arrives.
    fn fail_auth(&mut self, err: &Error) {
        let reason = match err {
            Error::AuthenticationFailed { reason } => reason.clone(),
            other => other.to_string(),
        };
        warn!(reason = %reason, "Token rejected by endpoint");

        self.close_link();
        self.dial = None;
        self.retry_at = None;
        self.idle_at = None;

        self.rejected = self
            .active_token
            .clone()
            .map(|token| (token, reason.clone()));
        self.status.last_error = Some(err.to_string());
        self.set_state(ConnectionState::Failed);
        self.resolve_waiters(|| Err(Error::authentication_failed(reason.clone())));
    }

    fn on_idle(&mut self) {
        if self.wanted() {
            return;
        }
        info!("No subscriptions remain, closing idle connection");
        self.teardown("idle");
    }

    fn on_demand_changed(&mut self) {
        if self.wanted() {
            self.idle_at = None;

            if self.status.state == ConnectionState::Disconnected
                && !self.paused
                && self.current_token().is_some()
            {
                debug!("Subscriptions wanted, dialing");
                self.start_dial();
            }
        } else if self.is_active() && self.idle_at.is_none() {
            self.idle_at = Some(deadline_after(self.options.idle_timeout));
        }
    }

    /// Reacts to the token source announcing a change.
    ///
    /// An explicit token from `connect` takes precedence, so store changes
    /// only matter while none is set.
    fn on_token_changed(&mut self) {
        if self.explicit_token.is_some() {
            return;
        }

        match self.current_token() {
            None => {
                if self.is_active() || self.status.state != ConnectionState::Disconnected {
                    info!("Token removed from store, disconnecting");
                    self.rejected = None;
                    self.teardown("token removed");
                }
            }

            Some(token) if self.is_active() => {
                if self.active_token.as_deref() != Some(token.as_str()) {
                    info!("Token rotated in store, cycling connection");
                    self.teardown("token rotated");
                    self.start_dial();
                }
            }

            Some(token) => {
                let idle = matches!(
                    self.status.state,
                    ConnectionState::Disconnected | ConnectionState::Failed
                );
                let rejected = self
                    .rejected
                    .as_ref()
                    .is_some_and(|(rejected, _)| *rejected == token);

                if idle && self.wanted() && !self.paused && !rejected {
                    debug!("Token available, dialing");
                    self.rejected = None;
                    self.status.attempt = 0;
                    self.status.last_error = None;
                    self.start_dial();
                }
            }
        }

        if self.status.has_token != self.current_token().is_some() {
            self.set_state(self.status.state);
        }
    }

    /// Returns to `Disconnected`, dropping anything in flight.
    fn teardown(&mut self, reason: &'static str) {
        self.close_link();
        self.dial = None;
        self.retry_at = None;
        self.idle_at = None;
        self.status.attempt = 0;
        self.status.last_error = None;

        if self.status.state != ConnectionState::Disconnected {
            info!(reason, "Connection torn down");
        }
        self.set_state(ConnectionState::Disconnected);
        self.resolve_waiters(|| Err(Error::ConnectionClosed));
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn close_link(&mut self) {
        if self.link.take().is_some() {
            self.listener.on_disconnected();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.status.state != state {
            debug!(from = %self.status.state, to = %state, "Connection state changed");
        }
        self.status.state = state;
        self.status.has_token = self.current_token().is_some();
        self.publisher.send_replace(self.status.clone());
    }

    fn resolve_waiters(&mut self, outcome: impl Fn() -> Result<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome());
        }
    }

    fn current_token(&self) -> Option<String> {
        self.explicit_token.clone().or_else(|| self.source_token())
    }

    fn source_token(&self) -> Option<String> {
        self.tokens.as_ref().and_then(|source| source.token())
    }

    /// Makes `token` explicit unless the token source already supplies it,
    /// so store changes keep driving a connection the store started.
    fn pin_token(&mut self, token: String) {
        if self.source_token().as_deref() != Some(token.as_str()) {
            self.explicit_token = Some(token);
        }
    }

    fn wanted(&self) -> bool {
        *self.demand.borrow() > 0
    }

    fn is_active(&self) -> bool {
        self.link.is_some() || self.dial.is_some() || self.retry_at.is_some()
    }

    fn endpoint_with_token(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.options.token_param, token);
        url
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Opens a link and waits for the endpoint's verdict on the token.
async fn handshake(transport: Arc<dyn Transport>, endpoint: Url) -> Result<Link> {
    let mut link = transport.open(&endpoint).await?;

    while let Some(text) = link.recv().await {
        match ServerFrame::decode(&text) {
            Ok(ServerFrame::Ack) => return Ok(link),
            Ok(ServerFrame::Reject { reason }) => return Err(Error::authentication_failed(reason)),
            Ok(ServerFrame::Message { key, .. }) => {
                debug!(channel = %key, "Message before handshake ack dropped");
            }
            Err(e) => warn!(error = %e, "Malformed frame during handshake"),
        }
    }

    Err(Error::ConnectionClosed)
}

/// Rebuilds an error for additional waiters of the same attempt.
fn replicate(err: &Error) -> Error {
    match err {
        Error::Connection { message } => Error::connection(message.clone()),
        Error::AuthenticationFailed { reason } => Error::authentication_failed(reason.clone()),
        Error::ConnectionTimeout { timeout_ms } => Error::connection_timeout(*timeout_ms),
        Error::ReconnectionFailed { attempts } => Error::reconnection_failed(*attempts),
        Error::ConnectionClosed => Error::ConnectionClosed,
        Error::Disposed => Error::Disposed,
        other => Error::connection(other.to_string()),
    }
}

// ============================================================================
// Select Helpers
// ============================================================================

/// Deadline `delay` from now, saturating far in the future.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

async fn next_dial(dial: &mut Option<BoxFuture<'static, Result<Link>>>) -> Result<Link> {
    match dial {
        Some(dial) => dial.await,
        None => pending().await,
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_token_change(
    changes: &mut Option<watch::Receiver<()>>,
) -> std::result::Result<(), watch::error::RecvError> {
    match changes {
        Some(changes) => changes.changed().await,
        None => pending().await,
    }
}

async fn next_demand(
    demand: &mut watch::Receiver<usize>,
    open: bool,
) -> std::result::Result<(), watch::error::RecvError> {
    if open {
        demand.changed().await
    } else {
        pending().await
    }
}

// ============================================================================
// Tests
// ============================================================================
