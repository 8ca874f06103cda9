//! # bftledger-crypto: cryptographic primitives for bftledger
//!
//! Every message exchanged between replicas and clients is signed by its
//! author. This crate provides the pieces needed to do that:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`signature`] | Ed25519 signing and verifying keys, signatures |
//! | [`digest`] | SHA-256 over concatenated parts |
//! | [`keystore`] | Per-process key pairs on disk |
//!
//! ## Quick Start
//!
//! ```
//! use bftledger_crypto::{sha256, SigningKey};
//!
//! let signing_key = SigningKey::generate();
//! let digest = sha256(&[b"payload", b"2026-01-01T00:00:00Z"]);
//! let signature = signing_key.sign(digest.as_bytes());
//!
//! let verifying_key = signing_key.verifying_key();
//! assert!(verifying_key.verify(digest.as_bytes(), &signature).is_ok());
//! ```

pub mod digest;
pub mod error;
pub mod keystore;
pub mod signature;

pub use digest::{Digest, sha256};
pub use error::{CryptoError, Result};
pub use keystore::KeyStore;
pub use signature::{Signature, SigningKey, VerifyingKey};
