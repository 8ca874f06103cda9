//! Ed25519 digital signatures.
//!
//! Thin wrappers over `ed25519-dalek` that add base64 encoding (the form
//! keys and signatures take on the wire and on disk) and map failures
//! into [`CryptoError`]. Verification is strict per RFC 8032 §5.1.7, so
//! non-canonical signatures are rejected.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::Signer;
use rand::rngs::OsRng;

use crate::{CryptoError, Result};

/// Length of a signing key seed or a compressed public key.
pub const KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

// -----------------------------------------------------------------------------
// Signing key
// -----------------------------------------------------------------------------

/// Private half of a process key pair.
#[derive(Clone)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

// Manual Debug implementation to avoid exposing key material
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("inner", &"<redacted>")
            .finish()
    }
}

impl SigningKey {
    /// Generates a new signing key from system randomness.
    pub fn generate() -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates a signing key from its 32-byte seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    actual: bytes.len(),
                })?;
        Ok(Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.inner.to_bytes()
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded.trim())?)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Derives the matching public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

// -----------------------------------------------------------------------------
// Verifying key
// -----------------------------------------------------------------------------

/// Public half of a process key pair. Doubles as the account identifier
/// in the ledger, in its base64 form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VerifyingKey").field(&self.to_base64()).finish()
    }
}

impl VerifyingKey {
    /// Creates a verifying key from a 32-byte compressed point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let point: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    actual: bytes.len(),
                })?;
        let inner = ed25519_dalek::VerifyingKey::from_bytes(&point)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.inner.to_bytes()
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded.trim())?)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify_strict(message, &signature.inner)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

// -----------------------------------------------------------------------------
// Signature
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength(bytes.len()))?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&raw),
        })
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.inner.to_bytes()
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&BASE64.decode(encoded.trim())?)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
