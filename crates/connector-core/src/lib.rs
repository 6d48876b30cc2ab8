//! Shared types for exchange stream connectors.
//!
//! Connectors produce `Fill`s on a bounded channel, fail with
//! `ConnectorError`, and obtain private-channel credentials through a
//! `StreamTokenProvider`.

mod config;
mod error;

pub use config::{StreamConfig, StreamMode};
pub use error::ConnectorError;

use async_trait::async_trait;
use execution_core::Fill;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type FillSender = mpsc::Sender<Fill>;
pub type FillReceiver = mpsc::Receiver<Fill>;

pub fn create_fill_channel(capacity: usize) -> (FillSender, FillReceiver) {
    mpsc::channel(capacity)
}

/// Short-lived credentials for a private stream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken {
    pub token: String,
    pub user_id: u64,
}

/// Source of private stream tokens, usually the authenticated REST client.
#[async_trait]
pub trait StreamTokenProvider: Send + Sync {
    /// Fetch a fresh token. Failures are reported as `ConnectorError::Auth`.
    async fn generate_stream_token(&self) -> Result<StreamToken, ConnectorError>;
}

pub type SharedTokenProvider = Arc<dyn StreamTokenProvider>;
