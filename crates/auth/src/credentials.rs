//! Bitstamp API key pair.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};

const API_KEY_ENV: &str = "BITSTAMP_API_KEY";
const SECRET_KEY_ENV: &str = "BITSTAMP_SECRET_KEY";

/// Key pair used to sign private REST requests.
///
/// The secret lives in a `SecretString`: it never shows up in `Debug` output
/// and is zeroized when the credentials are dropped.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: SecretString,
}

impl ApiCredentials {
    /// Read `BITSTAMP_API_KEY` and `BITSTAMP_SECRET_KEY`, after loading a
    /// `.env` file if one exists.
    ///
    /// # Errors
    /// `AuthError::MissingEnvVar` names the first variable that is unset or blank.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AuthError::MissingEnvVar(name.to_string()))
        };

        Ok(Self::new(read(API_KEY_ENV)?, read(SECRET_KEY_ENV)?))
    }

    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: SecretString::from(secret_key),
        }
    }

    /// The public half. Safe to log.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Value of the `X-Auth` header: `BITSTAMP <api key>`.
    pub fn auth_header(&self) -> String {
        format!("BITSTAMP {}", self.api_key)
    }

    /// The secret, for HMAC keying only.
    pub fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
