//! HTTP plumbing for the Bitstamp private API.
//!
//! Bitstamp's private endpoints are all form-encoded POSTs, so `RestClient`
//! only does that one thing. It maps transport failures, timeouts, HTTP error
//! statuses and 429 throttling onto `RestError`, and hands back either the raw
//! body or a deserialized value.
//!
//! ```rust,ignore
//! let client = RestClient::with_default_timeout("https://www.bitstamp.net")?;
//! let body = client
//!     .post_form("/api/v2/balance/", None, &signed.headers())
//!     .await?;
//! ```

mod client;
mod error;

pub use client::RestClient;
pub use error::RestError;
