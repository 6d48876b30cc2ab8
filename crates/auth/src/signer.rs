//! Bitstamp API v2 request signing.
//!
//! The signed message is the concatenation
//! `"BITSTAMP " + api_key + method + host + path + content_type + nonce + timestamp + "v2" + body`
//! and the signature is its lowercase hex HMAC-SHA256 under the secret key.

use crate::credentials::ApiCredentials;
use crate::error::AuthError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Content type sent with non-empty form bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const AUTH_VERSION: &str = "v2";
const METHOD: &str = "POST";

/// Headers and metadata of one signed private request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// `X-Auth` value.
    pub auth: String,
    /// Hex HMAC signature.
    pub signature: String,
    /// Unique nonce (36-character UUID).
    pub nonce: String,
    /// Millisecond timestamp used in the signature.
    pub timestamp_ms: i64,
    /// Content type, only present when there is a body.
    pub content_type: Option<&'static str>,
}

impl SignedRequest {
    /// Header pairs to attach to the HTTP request.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-Auth", self.auth.clone()),
            ("X-Auth-Signature", self.signature.clone()),
            ("X-Auth-Nonce", self.nonce.clone()),
            ("X-Auth-Timestamp", self.timestamp_ms.to_string()),
            ("X-Auth-Version", AUTH_VERSION.to_string()),
        ];
        if let Some(content_type) = self.content_type {
            headers.push(("Content-Type", content_type.to_string()));
        }
        headers
    }
}

/// Request signer for authenticated Bitstamp API calls.
pub struct RequestSigner<'a> {
    credentials: &'a ApiCredentials,
}

impl<'a> RequestSigner<'a> {
    /// Create a new request signer with the given credentials.
    pub fn new(credentials: &'a ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Sign a message and return the hex-encoded signature.
    ///
    /// # Errors
    /// Returns `AuthError::InvalidKeyFormat` if the secret cannot key the MAC.
    pub fn sign(&self, message: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .map_err(|_| AuthError::InvalidKeyFormat)?;

        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build the v2 message that gets signed.
    pub fn signature_payload(
        &self,
        host: &str,
        path: &str,
        content_type: Option<&str>,
        nonce: &str,
        timestamp_ms: i64,
        body: &str,
    ) -> String {
        format!(
            "{auth}{method}{host}{path}{content_type}{nonce}{timestamp_ms}{version}{body}",
            auth = self.credentials.auth_header(),
            method = METHOD,
            content_type = content_type.unwrap_or(""),
            version = AUTH_VERSION,
        )
    }

    /// Sign a POST request with a fresh nonce.
    ///
    /// # Arguments
    /// * `host` - Host as it appears in the request URL (e.g. `www.bitstamp.net`)
    /// * `path` - Request path with trailing slash (e.g. `/api/v2/balance/`)
    /// * `body` - Url-encoded form body, empty for parameterless calls
    /// * `timestamp_ms` - Current timestamp in milliseconds
    pub fn sign_request(
        &self,
        host: &str,
        path: &str,
        body: &str,
        timestamp_ms: i64,
    ) -> Result<SignedRequest, AuthError> {
        let nonce = Uuid::new_v4().to_string();
        self.sign_request_with_nonce(host, path, body, timestamp_ms, nonce)
    }

    /// Sign a POST request with a caller-provided nonce.
    pub fn sign_request_with_nonce(
        &self,
        host: &str,
        path: &str,
        body: &str,
        timestamp_ms: i64,
        nonce: String,
    ) -> Result<SignedRequest, AuthError> {
        // Bitstamp rejects a Content-Type header on empty bodies
        let content_type = if body.is_empty() {
            None
        } else {
            Some(FORM_CONTENT_TYPE)
        };

        let payload =
            self.signature_payload(host, path, content_type, &nonce, timestamp_ms, body);
        let signature = self.sign(&payload)?;

        Ok(SignedRequest {
            auth: self.credentials.auth_header(),
            signature,
            nonce,
            timestamp_ms,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: &str = "f93c979d-b00d-43a9-9b9c-fd4cd9547fa6";

    fn creds() -> ApiCredentials {
        ApiCredentials::new("my_api_key".into(), "my_secret".into())
    }

    #[test]
    fn test_sign_known_vector_with_body() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let signed = signer
            .sign_request_with_nonce(
                "www.bitstamp.net",
                "/api/v2/buy/market/btcusd/",
                "amount=0.0009",
                1567755304968,
                NONCE.to_string(),
            )
            .unwrap();

        assert_eq!(
            signed.signature,
            "6f63f3a4d89cba64ad4ab5a6c41b6b7d1d71fa8ee5f611e235fdf14c2cdf6604"
        );
        assert_eq!(signed.content_type, Some(FORM_CONTENT_TYPE));
    }

    #[test]
    fn test_sign_known_vector_without_body() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let signed = signer
            .sign_request_with_nonce(
                "www.bitstamp.net",
                "/api/v2/balance/",
                "",
                1567755304968,
                NONCE.to_string(),
            )
            .unwrap();

        assert_eq!(
            signed.signature,
            "6743343dfe0efdada116fc4b142b1dda4d25e2258190c696e94d03d206a406fe"
        );
        assert_eq!(signed.content_type, None);
    }

    #[test]
    fn test_payload_layout() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let payload = signer.signature_payload(
            "www.bitstamp.net",
            "/api/v2/balance/",
            None,
            "n",
            1000,
            "",
        );
        assert_eq!(
            payload,
            "BITSTAMP my_api_keyPOSTwww.bitstamp.net/api/v2/balance/n1000v2"
        );
    }

    #[test]
    fn test_headers_include_content_type_only_with_body() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let empty = signer
            .sign_request("www.bitstamp.net", "/api/v2/balance/", "", 1000)
            .unwrap();
        assert!(!empty.headers().iter().any(|(k, _)| *k == "Content-Type"));
        assert_eq!(empty.headers().len(), 5);

        let with_body = signer
            .sign_request("www.bitstamp.net", "/api/v2/order_status/", "id=1", 1000)
            .unwrap();
        assert!(with_body
            .headers()
            .iter()
            .any(|(k, v)| *k == "Content-Type" && v == FORM_CONTENT_TYPE));
    }

    #[test]
    fn test_fresh_nonce_per_request() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let a = signer.sign_request("h", "/p/", "", 1).unwrap();
        let b = signer.sign_request("h", "/p/", "", 1).unwrap();

        assert_eq!(a.nonce.len(), 36);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_sign_empty_message() {
        let creds = creds();
        let signer = RequestSigner::new(&creds);

        let signature = signer.sign("").unwrap();
        assert_eq!(signature.len(), 64);
    }
}
