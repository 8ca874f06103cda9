//! Error types for key handling and signature verification.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material had the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Bytes do not encode a valid curve point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signature bytes had the wrong length.
    #[error("invalid signature length: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    /// Signature did not verify under the given key.
    #[error("signature verification failed")]
    VerificationFailed,

    /// Base64 text could not be decoded.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Reading or writing a key file failed.
    #[error("key file error at {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
