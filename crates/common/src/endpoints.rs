//! Bitstamp endpoint configuration.
//!
//! Production URLs by default; either can be pointed elsewhere (a proxy, a
//! local mock) through environment variables.

use std::fmt;

const PRODUCTION_REST_URL: &str = "https://www.bitstamp.net";
const PRODUCTION_WS_URL: &str = "wss://ws.bitstamp.net/";

/// Environment variable overriding the REST base URL.
pub const REST_URL_ENV: &str = "BITSTAMP_REST_URL";
/// Environment variable overriding the websocket URL.
pub const WS_URL_ENV: &str = "BITSTAMP_WS_URL";

/// REST and websocket endpoints used by the clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// REST API base URL (no trailing slash needed).
    pub rest_base_url: String,
    /// Websocket URL for the trade streams.
    pub ws_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::production()
    }
}

impl Endpoints {
    /// Bitstamp production endpoints.
    pub fn production() -> Self {
        Self {
            rest_base_url: PRODUCTION_REST_URL.to_string(),
            ws_url: PRODUCTION_WS_URL.to_string(),
        }
    }

    /// Explicit endpoints.
    pub fn new(rest_base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rest_base_url: rest_base_url.into(),
            ws_url: ws_url.into(),
        }
    }

    /// Production endpoints with `BITSTAMP_REST_URL` / `BITSTAMP_WS_URL` applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut endpoints = Self::production();

        if let Some(url) = lookup(REST_URL_ENV).filter(|s| !s.is_empty()) {
            endpoints.rest_base_url = url;
        }
        if let Some(url) = lookup(WS_URL_ENV).filter(|s| !s.is_empty()) {
            endpoints.ws_url = url;
        }

        endpoints
    }

    /// Host part of the REST base URL, as used in the v2 signature payload.
    pub fn rest_host(&self) -> &str {
        let without_scheme = self
            .rest_base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.rest_base_url);

        without_scheme.split('/').next().unwrap_or(without_scheme)
    }

    /// Returns true if both URLs point at Bitstamp production.
    pub fn is_production(&self) -> bool {
        self.rest_base_url == PRODUCTION_REST_URL && self.ws_url == PRODUCTION_WS_URL
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rest={} ws={}", self.rest_base_url, self.ws_url)
    }
}
