use crate::ConnectorError;
use common::{Endpoints, ReconnectBackoff};
use std::time::Duration;

/// Which trade channel the stream subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// `live_trades_{symbol}`: every trade on the market, no auth.
    #[default]
    Public,
    /// `private-my_trades_{symbol}-{user_id}`: own trades, token auth.
    Private,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Currency pairs to subscribe to, e.g. `btcusd`.
    pub symbols: Vec<String>,
    /// Public or private trade channel.
    pub mode: StreamMode,
    /// Fill channel buffer capacity.
    pub channel_capacity: usize,
    /// Delay policy between reconnect attempts.
    pub backoff: ReconnectBackoff,
    /// Reader fails if nothing arrives for this long.
    pub idle_timeout: Duration,
    /// Keepalive ping cadence.
    pub ping_interval: Duration,
    /// Bound on the TCP/TLS/websocket handshake.
    pub connect_timeout: Duration,
    /// Websocket endpoint.
    pub ws_url: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusd".to_string()],
            mode: StreamMode::default(),
            channel_capacity: 256,
            backoff: ReconnectBackoff::default(),
            idle_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            ws_url: Endpoints::production().ws_url,
        }
    }
}

impl StreamConfig {
    /// Default settings pointed at the given endpoints.
    pub fn for_endpoints(endpoints: &Endpoints) -> Self {
        Self {
            ws_url: endpoints.ws_url.clone(),
            ..Self::default()
        }
    }

    /// Check the config before a session is started.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.symbols.is_empty() {
            return Err(ConnectorError::Config("no symbols configured".into()));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConnectorError::Config("empty symbol".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConnectorError::Config("channel capacity must be positive".into()));
        }
        if self.idle_timeout.is_zero()
            || self.ping_interval.is_zero()
            || self.connect_timeout.is_zero()
        {
            return Err(ConnectorError::Config("timeouts must be positive".into()));
        }
        if self.ping_interval >= self.idle_timeout {
            return Err(ConnectorError::Config(
                "ping interval must be shorter than idle timeout".into(),
            ));
        }
        if self.ws_url.is_empty() {
            return Err(ConnectorError::Config("websocket url is empty".into()));
        }
        Ok(())
    }
}
