//! Trade stream session with automatic reconnection.
//!
//! One session owns at most one connection at a time. Each connection goes
//! through `Connecting`, then (private channels only) `Authenticating`, then
//! `Subscribing` and `Streaming`. Any network-shaped failure tears the
//! connection down and retries after the backoff delay. Only a stop request,
//! a dropped fill receiver or an unbuildable subscribe request end the session.
//!
//! In private mode the registry's placement lock is held from before the
//! stream token is requested until every subscribe request has been sent. An
//! order placed concurrently is therefore either registered before the
//! subscription exists, or placed after it. While streaming, a fill for an
//! unknown order is re-checked once the placement lock is free, so a placement
//! whose REST response is still in flight gets to register its ID first.
//!
//! Fill delivery blocks while the output queue is full. A stop request
//! interrupts the wait, then every frame the reader already buffered is
//! translated and delivered before the session ends.

use crate::transport::{FrameReader, WsTransport};
use crate::translator::{channel_name, subscribe_message, translate, StreamEvent};
use connector_core::{
    create_fill_channel, ConnectorError, FillReceiver, FillSender, SharedTokenProvider,
    StreamConfig, StreamMode, StreamToken,
};
use execution_core::{Fill, SharedOrderObserver};
use metrics::SharedMetrics;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Duration of stable connection before resetting backoff.
const STABLE_CONNECTION_THRESHOLD: Duration = Duration::from_secs(300);

/// Lifecycle of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection. Initial state, and the state right after a failure.
    Idle,
    Connecting,
    /// Fetching a stream token (private channels only).
    Authenticating,
    Subscribing,
    Streaming,
    /// Waiting out the backoff delay.
    Reconnecting,
    /// Terminal.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Subscribing => "subscribing",
            SessionState::Streaming => "streaming",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of one connection.
enum SessionResult {
    /// Stop was requested, buffered frames have been drained.
    Shutdown,
    /// The session cannot continue.
    Fatal(ConnectorError),
    /// No subscription was established.
    ConnectFailed(ConnectorError),
    /// The subscription was established and later lost.
    Disconnected {
        duration: Duration,
        error: ConnectorError,
    },
    /// The server asked for a reconnect.
    ReconnectRequested { duration: Duration },
}

/// Decision about a translated fill.
enum Resolution {
    Forward(Fill),
    Filtered,
    /// Ownership could not be decided before the wait was interrupted.
    Undecided(Fill),
}

/// Outcome of placing a fill on the output queue.
enum Delivery {
    Sent,
    /// Stop was requested while the queue was full.
    Stopped(Fill),
    Closed,
}

/// Resolves once a stop is requested or the stop sender is gone.
async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// A configured stream that has not been started yet.
pub struct StreamSession {
    config: StreamConfig,
    observer: SharedOrderObserver,
    metrics: SharedMetrics,
    token_provider: Option<SharedTokenProvider>,
    state_tx: watch::Sender<SessionState>,
}

impl StreamSession {
    pub fn new(config: StreamConfig, observer: SharedOrderObserver, metrics: SharedMetrics) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            observer,
            metrics,
            token_provider: None,
            state_tx,
        }
    }

    /// Source of stream tokens. Required for private channels.
    pub fn with_token_provider(mut self, provider: SharedTokenProvider) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Watch the session's state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    /// Run until stopped.
    ///
    /// Returns `Ok` after a requested stop, `ChannelClosed` if the fill
    /// receiver was dropped, or the fatal error that ended the session.
    pub async fn run(
        self,
        sender: FillSender,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), ConnectorError> {
        let result = self.run_loop(&sender, &mut shutdown_rx).await;
        self.metrics.mark_down();
        self.set_state(SessionState::Stopped);
        result
    }

    async fn run_loop(
        &self,
        sender: &FillSender,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectorError> {
        let mut backoff = self.config.backoff.clone();
        let mut needs_reconnect = false;

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown requested, exiting stream");
                return Ok(());
            }

            let result = self.run_once(sender, shutdown_rx).await;
            self.set_state(SessionState::Idle);

            let delay = match result {
                SessionResult::Shutdown => {
                    info!("Stream shutdown complete");
                    return Ok(());
                }
                SessionResult::Fatal(e) => {
                    if matches!(e, ConnectorError::ChannelClosed) {
                        info!("Fill receiver dropped, exiting stream");
                    } else {
                        error!(error = %e, "Stream cannot continue");
                    }
                    return Err(e);
                }
                SessionResult::ConnectFailed(e) => {
                    self.metrics.inc_connection_failures();
                    needs_reconnect = true;

                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_secs = delay.as_secs_f64(),
                        "Connection failed, retrying"
                    );
                    delay
                }
                SessionResult::Disconnected { duration, error } => {
                    if needs_reconnect {
                        self.metrics.inc_reconnect_successes();
                    }
                    needs_reconnect = true;

                    if duration >= STABLE_CONNECTION_THRESHOLD {
                        info!(
                            duration_secs = duration.as_secs(),
                            "Connection was stable, resetting backoff"
                        );
                        backoff.reset();
                    }

                    self.metrics.inc_reconnect_attempts();
                    let delay = backoff.next_delay();
                    warn!(
                        error = %error,
                        attempt = backoff.attempt(),
                        delay_secs = delay.as_secs_f64(),
                        "Connection lost, reconnecting"
                    );
                    delay
                }
                SessionResult::ReconnectRequested { duration } => {
                    if needs_reconnect {
                        self.metrics.inc_reconnect_successes();
                    }
                    needs_reconnect = true;
                    self.metrics.inc_reconnect_attempts();
                    info!(
                        duration_secs = duration.as_secs(),
                        "Server requested reconnect, reconnecting now"
                    );
                    Duration::ZERO
                }
            };

            if delay.is_zero() {
                continue;
            }

            self.set_state(SessionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_requested(shutdown_rx) => {
                    info!("Shutdown requested during backoff");
                    return Ok(());
                }
            }
        }
    }

    /// One connection, from connect to teardown.
    async fn run_once(
        &self,
        sender: &FillSender,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionResult {
        self.set_state(SessionState::Connecting);
        let transport = WsTransport::new(&self.config.ws_url, self.config.connect_timeout);
        info!(url = %transport.url(), mode = ?self.config.mode, "Connecting to Bitstamp WebSocket");

        let mut conn = tokio::select! {
            biased;
            _ = stop_requested(shutdown_rx) => return SessionResult::Shutdown,
            result = transport.connect() => match result {
                Ok(conn) => conn,
                Err(e) => return SessionResult::ConnectFailed(e),
            },
        };
        let connected_at = Instant::now();

        // Held until every subscribe request is out
        let mut guard = None;
        let mut token = None;

        if self.config.mode == StreamMode::Private {
            let locked = tokio::select! {
                biased;
                _ = stop_requested(shutdown_rx) => {
                    conn.close().await;
                    return SessionResult::Shutdown;
                }
                locked = self.observer.lock() => locked,
            };
            match locked {
                Ok(g) => guard = Some(g),
                Err(e) => {
                    conn.close().await;
                    return SessionResult::ConnectFailed(ConnectorError::Connect(format!(
                        "placement lock: {}",
                        e
                    )));
                }
            }

            self.set_state(SessionState::Authenticating);
            let Some(provider) = &self.token_provider else {
                conn.close().await;
                return SessionResult::Fatal(ConnectorError::Config(
                    "private stream requires a token provider".into(),
                ));
            };
            let fetched = tokio::select! {
                biased;
                _ = stop_requested(shutdown_rx) => {
                    conn.close().await;
                    return SessionResult::Shutdown;
                }
                fetched = provider.generate_stream_token() => fetched,
            };
            match fetched {
                Ok(t) => token = Some(t),
                Err(e) => {
                    self.metrics.inc_auth_failures();
                    conn.close().await;
                    let e = match e {
                        ConnectorError::Auth(_) => e,
                        other => ConnectorError::Auth(other.to_string()),
                    };
                    return SessionResult::ConnectFailed(e);
                }
            }
        }

        self.set_state(SessionState::Subscribing);
        let requests = match self.subscribe_requests(token.as_ref()) {
            Ok(requests) => requests,
            Err(e) => {
                conn.close().await;
                return SessionResult::Fatal(e);
            }
        };
        for request in requests {
            if let Err(e) = conn.send(request).await {
                self.metrics.inc_websocket_errors();
                return SessionResult::ConnectFailed(ConnectorError::Connect(format!(
                    "subscribe send failed: {}",
                    e
                )));
            }
        }

        if let Some(guard) = guard.take() {
            guard.unlock();
            debug!("Placement lock released after subscribe");
        }

        self.set_state(SessionState::Streaming);
        self.metrics.mark_streaming();
        info!(symbols = ?self.config.symbols, "Subscribed to trade stream");

        let reader = conn.run_reader(self.config.idle_timeout, self.config.ping_interval);
        let result = self.stream_frames(reader, sender, shutdown_rx, connected_at).await;
        self.metrics.mark_down();
        result
    }

    /// Build one subscribe request per configured symbol.
    fn subscribe_requests(&self, token: Option<&StreamToken>) -> Result<Vec<String>, ConnectorError> {
        if self.config.symbols.is_empty() {
            return Err(ConnectorError::Subscribe("no symbols to subscribe".into()));
        }

        self.config
            .symbols
            .iter()
            .map(|symbol| {
                let symbol = symbol.trim().to_lowercase();
                if symbol.is_empty() {
                    return Err(ConnectorError::Subscribe("empty symbol".into()));
                }
                let channel = channel_name(self.config.mode, &symbol, token.map(|t| t.user_id));
                subscribe_message(&channel, token.map(|t| t.token.as_str()))
                    .map_err(|e| ConnectorError::Subscribe(e.to_string()))
            })
            .collect()
    }

    async fn stream_frames(
        &self,
        mut reader: FrameReader,
        sender: &FillSender,
        shutdown_rx: &mut watch::Receiver<bool>,
        connected_at: Instant,
    ) -> SessionResult {
        let mut reconnect_requested = false;

        loop {
            let frame = tokio::select! {
                biased;
                _ = stop_requested(shutdown_rx) => {
                    info!("Shutdown signal received, draining buffered frames");
                    return self.drain(reader, sender, None).await;
                }
                frame = reader.recv() => frame,
            };

            let Some(text) = frame else {
                let outcome = reader.finish().await;
                let duration = connected_at.elapsed();
                if reconnect_requested {
                    return SessionResult::ReconnectRequested { duration };
                }
                let error = match outcome {
                    Ok(()) => ConnectorError::WebSocket("reader stopped".to_string()),
                    Err(e) => {
                        self.metrics.inc_websocket_errors();
                        e
                    }
                };
                return SessionResult::Disconnected { duration, error };
            };

            self.metrics.inc_frames_received();
            match translate(&text, self.config.mode) {
                Ok(StreamEvent::Trade(fill)) => {
                    self.metrics.set_observed_orders(self.observer.len());
                    let resolution = self.resolve(fill, stop_requested(shutdown_rx)).await;
                    let fill = match resolution {
                        Resolution::Forward(fill) => fill,
                        Resolution::Filtered => {
                            self.metrics.inc_fills_filtered();
                            continue;
                        }
                        Resolution::Undecided(fill) => {
                            info!("Shutdown signal received, draining buffered frames");
                            return self
                                .drain(reader, sender, Some(Resolution::Undecided(fill)))
                                .await;
                        }
                    };

                    match self.deliver(fill, sender, shutdown_rx).await {
                        Delivery::Sent => {}
                        Delivery::Stopped(fill) => {
                            info!("Shutdown signal received, draining buffered frames");
                            return self
                                .drain(reader, sender, Some(Resolution::Forward(fill)))
                                .await;
                        }
                        Delivery::Closed => {
                            let _ = reader.finish().await;
                            return SessionResult::Fatal(ConnectorError::ChannelClosed);
                        }
                    }
                }
                Ok(StreamEvent::SubscriptionSucceeded { channel }) => {
                    info!(channel = %channel, "Subscription confirmed");
                }
                Ok(StreamEvent::ReconnectRequested) => {
                    // Finish what is buffered, then reconnect without backoff
                    info!("Server requested reconnect");
                    reconnect_requested = true;
                    reader.stop();
                }
                Ok(StreamEvent::ServerError { message }) => {
                    warn!(message = %message, "Server reported an error");
                }
                Err(e) => {
                    self.metrics.inc_translation_errors();
                    warn!(error = %e, frame = %text, "Dropping untranslatable frame");
                }
            }
        }
    }

    /// Decide whether a fill belongs on the output queue.
    ///
    /// Private channels only carry the account's own trades, but only orders
    /// placed through the registry are forwarded. A miss waits for the
    /// placement lock and checks again, unless `give_up` resolves first.
    async fn resolve(&self, fill: Fill, give_up: impl Future<Output = ()>) -> Resolution {
        if let Some(own) = self.observed_view(&fill) {
            return Resolution::Forward(own);
        }

        if self.config.mode == StreamMode::Public {
            return Resolution::Forward(fill);
        }

        let locked = tokio::select! {
            biased;
            locked = self.observer.lock() => locked,
            _ = give_up => return Resolution::Undecided(fill),
        };
        match locked {
            Ok(guard) => drop(guard),
            Err(e) => warn!(error = %e, "Placement lock unavailable, checking registry anyway"),
        }

        match self.observed_view(&fill) {
            Some(own) => Resolution::Forward(own),
            None => {
                debug!(
                    order_id = fill.order_id,
                    trade_id = fill.trade_id,
                    "Fill for unobserved order filtered"
                );
                Resolution::Filtered
            }
        }
    }

    /// The fill as seen by whichever of its orders is registered.
    fn observed_view(&self, fill: &Fill) -> Option<Fill> {
        let order_id = fill
            .order_ids()
            .find(|id| self.observer.is_observable(*id))?;
        fill.oriented_to(order_id)
    }

    /// Put a fill on the output queue, waiting for space.
    async fn deliver(
        &self,
        fill: Fill,
        sender: &FillSender,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Delivery {
        tokio::select! {
            biased;
            permit = sender.reserve() => match permit {
                Ok(permit) => {
                    debug!(
                        order_id = fill.order_id,
                        trade_id = fill.trade_id,
                        symbol = %fill.symbol,
                        "Forwarding fill"
                    );
                    permit.send(fill);
                    self.metrics.inc_fills_forwarded();
                    Delivery::Sent
                }
                Err(_) => Delivery::Closed,
            },
            _ = stop_requested(shutdown_rx) => Delivery::Stopped(fill),
        }
    }

    /// Stop the reader and deliver everything it had already buffered.
    ///
    /// Each wait is bounded by the idle timeout, so a consumer that stopped
    /// reading cannot hold the session open.
    async fn drain(
        &self,
        mut reader: FrameReader,
        sender: &FillSender,
        pending: Option<Resolution>,
    ) -> SessionResult {
        reader.stop();
        let wait = self.config.idle_timeout;

        if let Some(resolution) = pending {
            self.deliver_on_stop(resolution, sender).await;
        }

        let mut drained = 0usize;
        while let Some(text) = reader.recv().await {
            drained += 1;
            self.metrics.inc_frames_received();
            match translate(&text, self.config.mode) {
                Ok(StreamEvent::Trade(fill)) => {
                    let resolution = self.resolve(fill, tokio::time::sleep(wait)).await;
                    self.deliver_on_stop(resolution, sender).await;
                }
                Ok(_) => {}
                Err(e) => {
                    self.metrics.inc_translation_errors();
                    warn!(error = %e, frame = %text, "Dropping untranslatable frame");
                }
            }
        }

        if let Err(e) = reader.finish().await {
            debug!(error = %e, "Reader ended with error during drain");
        }
        info!(frames = drained, "Drained buffered frames");
        SessionResult::Shutdown
    }

    async fn deliver_on_stop(&self, resolution: Resolution, sender: &FillSender) {
        let fill = match resolution {
            Resolution::Forward(fill) => fill,
            Resolution::Filtered => {
                self.metrics.inc_fills_filtered();
                return;
            }
            Resolution::Undecided(fill) => {
                self.metrics.inc_fills_dropped();
                warn!(
                    order_id = fill.order_id,
                    trade_id = fill.trade_id,
                    "Dropping fill at shutdown, placement lock never became free"
                );
                return;
            }
        };

        match sender.send_timeout(fill, self.config.idle_timeout).await {
            Ok(()) => self.metrics.inc_fills_forwarded(),
            Err(SendTimeoutError::Timeout(fill)) => {
                self.metrics.inc_fills_dropped();
                error!(
                    order_id = fill.order_id,
                    trade_id = fill.trade_id,
                    "Dropping fill at shutdown, consumer is not reading"
                );
            }
            Err(SendTimeoutError::Closed(fill)) => {
                self.metrics.inc_fills_dropped();
                error!(
                    order_id = fill.order_id,
                    trade_id = fill.trade_id,
                    "Dropping fill at shutdown, receiver dropped"
                );
            }
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("config", &self.config)
            .field("state", &*self.state_tx.borrow())
            .field("token_provider", &self.token_provider.is_some())
            .finish_non_exhaustive()
    }
}

/// Start a session on its own task.
///
/// Fails without spawning if the config is invalid, or if a private stream
/// has no token provider.
pub fn spawn_fill_stream(session: StreamSession) -> Result<FillStream, ConnectorError> {
    session.config.validate()?;
    if session.config.mode == StreamMode::Private && session.token_provider.is_none() {
        return Err(ConnectorError::Config(
            "private stream requires a token provider".into(),
        ));
    }

    let (sender, fills) = create_fill_channel(session.config.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = session.state();
    let handle = tokio::spawn(session.run(sender, shutdown_rx));

    Ok(FillStream {
        fills,
        stop: StopHandle {
            shutdown_tx,
            handle: Some(handle),
        },
        state,
    })
}

/// A running session and its output queue.
#[derive(Debug)]
pub struct FillStream {
    fills: FillReceiver,
    stop: StopHandle,
    state: watch::Receiver<SessionState>,
}

impl FillStream {
    /// Next forwarded fill. `None` once the session has ended and the queue
    /// is empty.
    pub async fn recv(&mut self) -> Option<Fill> {
        self.fills.recv().await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Separate the queue from the stop control, e.g. to consume on another task.
    pub fn split(self) -> (FillReceiver, StopHandle) {
        (self.fills, self.stop)
    }

    /// Stop the session and collect every fill still on its way.
    pub async fn stop(self) -> Result<Vec<Fill>, ConnectorError> {
        let FillStream {
            mut fills, stop, ..
        } = self;
        stop.request_stop();

        let mut remaining = Vec::new();
        while let Some(fill) = fills.recv().await {
            remaining.push(fill);
        }

        stop.stop().await?;
        Ok(remaining)
    }
}

/// Stops a running session. Dropping it requests a stop without waiting.
#[derive(Debug)]
pub struct StopHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<Result<(), ConnectorError>>>,
}

impl StopHandle {
    /// Signal the session to stop. Does not wait.
    pub fn request_stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether the session task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the session to stop and wait until it has drained and exited.
    ///
    /// The fill receiver must keep being read (or be dropped), otherwise each
    /// buffered fill waits out the idle timeout before being dropped.
    pub async fn stop(mut self) -> Result<(), ConnectorError> {
        self.request_stop();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(ConnectorError::WebSocket(format!(
                    "session task failed: {}",
                    e
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
