//! Error types for the GCA collection protocol

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol error types
#[derive(Debug, Error)]
pub enum Error {
    /// Record length does not match the fixed record size
    #[error("wrong record length: got {got}, want {want}")]
    WrongLength { got: usize, want: usize },

    /// Variable-length record ended before a field was complete
    #[error("record truncated at byte {0}")]
    Truncated(usize),

    /// Bytes remained after the last field of a record
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// Field carries a value the codec cannot represent
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// Signature verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// Public key bytes do not describe a curve point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Private key bytes are out of range for the curve
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Signing failed (malformed prehash or key state)
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Wall clock precedes the genesis instant
    #[error("clock skew: current time precedes genesis")]
    ClockSkew,
}
