use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Shutdown requested")]
    Shutdown,
}

impl ConnectorError {
    /// Whether the session should back off and reconnect after this error.
    ///
    /// Network-shaped failures are retried forever. A subscribe failure means
    /// the request itself is malformed and retrying cannot fix it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Connect(_) | ConnectorError::Auth(_) | ConnectorError::WebSocket(_)
        )
    }
}
