//! On-disk key pairs.
//!
//! Layout, one directory per process keyed by its network address:
//!
//! ```text
//! <root>/
//!   127.0.0.1:3001/
//!     public.key    base64 of the 32-byte compressed point
//!     private.key   base64 of the 32-byte seed
//! ```
//!
//! Every process can read every public key; only the owner is expected
//! to read its own `private.key`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{CryptoError, Result, SigningKey, VerifyingKey};

const PUBLIC_KEY_FILE: &str = "public.key";
const PRIVATE_KEY_FILE: &str = "private.key";

/// Directory of per-process key pairs.
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the key pair of the process at `hostname:port`.
    pub fn process_dir(&self, hostname: &str, port: u16) -> PathBuf {
        self.root.join(format!("{hostname}:{port}"))
    }

    /// Generates a fresh key pair for `hostname:port`, overwriting any
    /// existing one, and returns the signing key.
    pub fn generate(&self, hostname: &str, port: u16) -> Result<SigningKey> {
        let dir = self.process_dir(hostname, port);
        fs::create_dir_all(&dir).map_err(|source| CryptoError::KeyFile {
            path: dir.clone(),
            source,
        })?;

        let signing_key = SigningKey::generate();
        write_key(&dir.join(PUBLIC_KEY_FILE), &signing_key.verifying_key().to_base64())?;
        write_key(&dir.join(PRIVATE_KEY_FILE), &signing_key.to_base64())?;

        tracing::debug!(dir = %dir.display(), "generated key pair");
        Ok(signing_key)
    }

    pub fn load_public(&self, hostname: &str, port: u16) -> Result<VerifyingKey> {
        let path = self.process_dir(hostname, port).join(PUBLIC_KEY_FILE);
        VerifyingKey::from_base64(&read_key(&path)?)
    }

    pub fn load_signing(&self, hostname: &str, port: u16) -> Result<SigningKey> {
        let path = self.process_dir(hostname, port).join(PRIVATE_KEY_FILE);
        SigningKey::from_base64(&read_key(&path)?)
    }
}

fn read_key(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key(path: &Path, encoded: &str) -> Result<()> {
    fs::write(path, encoded).map_err(|source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}
