//! Generic REST client wrapper around reqwest.

use crate::error::RestError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait suggested on 429 when the server gives no `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

/// Generic REST client for making HTTP requests.
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a new REST client with the given base URL.
    ///
    /// # Arguments
    /// * `base_url` - Base URL for all requests (e.g., "https://www.bitstamp.net")
    /// * `timeout` - Request timeout duration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        // Bitstamp signs the exact path, so redirects would invalidate signatures
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RestError::RequestBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a new REST client with default timeout.
    pub fn with_default_timeout(base_url: &str) -> Result<Self, RestError> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a form body and return the raw response text.
    ///
    /// # Arguments
    /// * `path` - Request path (e.g., "/api/v2/balance/")
    /// * `body` - Url-encoded form body, `None` for an empty request
    /// * `headers` - Additional headers (auth, content type)
    pub async fn post_form(
        &self,
        path: &str,
        body: Option<&str>,
        headers: &[(&str, String)],
    ) -> Result<String, RestError> {
        let url = self.build_url(path);
        tracing::debug!(url = %url, has_body = body.is_some(), "POST request");

        let mut request = self.client.post(&url);

        for (key, value) in headers {
            request = request.header(*key, value.as_str());
        }

        if let Some(body) = body.filter(|b| !b.is_empty()) {
            request = request.body(body.to_string());
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// POST a form body and deserialize the JSON response.
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&str>,
        headers: &[(&str, String)],
    ) -> Result<T, RestError> {
        let text = self.post_form(path, body, headers).await?;
        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(body = %text, error = %e, "Failed to parse response");
            RestError::Parse(e.to_string())
        })
    }

    /// Build a full URL from a path.
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn an HTTP response into its body text or a typed error.
    async fn handle_response(&self, response: Response) -> Result<String, RestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = retry_after_ms(&response).unwrap_or(DEFAULT_RETRY_AFTER_MS);
            tracing::warn!(retry_after_ms, "Rate limited");
            return Err(RestError::RateLimited { retry_after_ms });
        }

        let body = response.text().await.unwrap_or_default();
        Err(RestError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// `Retry-After` in delay-seconds form.
fn retry_after_ms(response: &Response) -> Option<u64> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(secs.saturating_mul(1000))
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
