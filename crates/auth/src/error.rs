use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential variable unset or blank.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// The secret cannot key an HMAC.
    #[error("Secret key rejected by HMAC")]
    InvalidKeyFormat,
}
