//! Bitstamp API credentials and v2 request signing.
//!
//! `ApiCredentials` keeps the secret out of logs. `RequestSigner` builds the
//! HMAC-SHA256 signature over the v2 message layout and returns the complete
//! `X-Auth-*` header set for one request.
//!
//! ```rust,ignore
//! use auth::{ApiCredentials, RequestSigner};
//!
//! let credentials = ApiCredentials::from_env()?;
//! let signed = RequestSigner::new(&credentials)
//!     .sign_request("www.bitstamp.net", "/api/v2/balance/", "", timestamp_ms)?;
//! for (name, value) in signed.headers() {
//!     request = request.header(name, value);
//! }
//! ```

mod credentials;
mod error;
mod signer;

pub use credentials::ApiCredentials;
pub use error::AuthError;
pub use signer::{RequestSigner, SignedRequest, FORM_CONTENT_TYPE};
