//! Bitstamp REST API error types.

use auth::AuthError;
use execution_core::ObserverError;
use rest_client::RestError;
use serde_json::Value;
use thiserror::Error;

/// Reason Bitstamp gives when placement failed on its side and may be repeated.
const RETRYABLE_PLACEMENT_REASON: &str = "order could not be placed";

/// Errors that can occur when interacting with the Bitstamp REST API.
#[derive(Debug, Error)]
pub enum BitstampRestError {
    /// REST client error (network, timeout, etc.).
    #[error("REST client error: {0}")]
    Rest(#[from] RestError),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Error body returned by the exchange.
    #[error("Bitstamp API error: {reason}")]
    ApiError {
        /// Error code, when Bitstamp sends one.
        code: Option<String>,
        /// Flattened error reason.
        reason: String,
    },

    /// Invalid order parameters, rejected before sending.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Order not found.
    #[error("Order not found")]
    OrderNotFound,

    /// Insufficient balance for the order.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The placement lock could not be taken.
    #[error("Order registry error: {0}")]
    Observer(#[from] ObserverError),

    /// The order was accepted by the exchange but could not be registered.
    #[error("Order {order_id} placed but not registered: {source}")]
    ObserveFailed {
        order_id: u64,
        #[source]
        source: ObserverError,
    },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl BitstampRestError {
    /// Parse a Bitstamp error body.
    ///
    /// Bitstamp reports errors as `{"status": "error", "reason": ..., "code": ...}`,
    /// often with HTTP 200. `reason` is either a string or a map of field names
    /// to message lists. Returns `None` if the body is not an error body.
    pub fn from_api_response(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let object = value.as_object()?;

        if object.get("status").and_then(Value::as_str) != Some("error") {
            return None;
        }

        let reason = object
            .get("reason")
            .map(flatten_reason)
            .unwrap_or_else(|| "unknown error".to_string());
        let code = object.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Some(Self::classify_api_error(code, reason))
    }

    /// Classify an error reason into a more specific error.
    fn classify_api_error(code: Option<String>, reason: String) -> Self {
        let lower = reason.to_lowercase();

        if lower.contains("order not found") {
            Self::OrderNotFound
        } else if lower.contains("you have only") || lower.contains("insufficient") {
            Self::InsufficientBalance(reason)
        } else {
            Self::ApiError { code, reason }
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rest(rest_err) => rest_err.is_retryable(),
            Self::ApiError { reason, .. } => {
                reason.to_lowercase().contains(RETRYABLE_PLACEMENT_REASON)
            }
            Self::Observer(ObserverError::LockTimeout(_)) => true,
            _ => false,
        }
    }
}

/// Turn a `reason` value into one line of text.
fn flatten_reason(reason: &Value) -> String {
    match reason {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_reason)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(fields) => fields
            .iter()
            .map(|(field, messages)| {
                let text = flatten_reason(messages);
                if field == "__all__" {
                    text
                } else {
                    format!("{}: {}", field, text)
                }
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}
