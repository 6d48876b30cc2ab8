//! REST client error types.

use thiserror::Error;

/// Errors that can occur during REST API calls.
#[derive(Debug, Error)]
pub enum RestError {
    /// Non-success HTTP status with the response body.
    #[error("HTTP error: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Request timed out.
    #[error("Request timeout")]
    Timeout,

    /// Connection error (DNS, TCP, TLS).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failed to parse response body as JSON.
    #[error("JSON parse error: {0}")]
    Parse(String),

    /// Rate limited by the server.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying.
        retry_after_ms: u64,
    },

    /// Failed to build the HTTP client or request.
    #[error("Request build error: {0}")]
    RequestBuild(String),
}

impl RestError {
    /// Check if this error is transient and the call may be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            RestError::Timeout | RestError::Connection(_) | RestError::RateLimited { .. } => true,
            RestError::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::HttpError { status, .. } => Some(*status),
            RestError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RestError::Timeout
        } else if err.is_connect() {
            RestError::Connection(err.to_string())
        } else if err.is_decode() {
            RestError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            RestError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RestError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = RestError::HttpError {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = RestError::HttpError {
            status: 403,
            message: "forbidden".into(),
        };
        assert!(!err.is_retryable());
        assert!(!RestError::Parse("bad".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_status() {
        let err = RestError::RateLimited {
            retry_after_ms: 1000,
        };
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(429));
    }
}
