//! The static membership file.
//!
//! ```toml
//! [[nodes]]
//! id = 1
//! hostname = "127.0.0.1"
//! port = 3001
//!
//! [[clients]]
//! id = 5
//! hostname = "127.0.0.1"
//! port = 4001
//! ```
//!
//! The same layout is accepted as JSON when the file ends in `.json`.
//! Public keys are not part of the file; they are resolved through a
//! [`KeyStore`] keyed by each process's address.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use bftledger_crypto::KeyStore;
use bftledger_types::{
    LocalProcess, Membership, MembershipError, ProcessConfig, ProcessId, ProcessIdentity,
};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipFile {
    pub nodes: Vec<ProcessConfig>,
    #[serde(default)]
    pub clients: Vec<ProcessConfig>,
}

impl MembershipFile {
    /// Reads and validates a membership file, picking the format from
    /// its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let file: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Some("json") => {
                serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        file.validate()?;
        Ok(file)
    }

    /// Node ids must run `1..=n` in order and no id may appear twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(MembershipError::NoNodes.into());
        }

        for (position, node) in self.nodes.iter().enumerate() {
            let expected = ProcessId::new(position as u32 + 1);
            if node.id != expected {
                return Err(MembershipError::NodeIdOutOfSequence {
                    position,
                    expected,
                    found: node.id,
                }
                .into());
            }
        }

        let mut seen = HashSet::new();
        for process in self.all() {
            if !seen.insert(process.id) {
                return Err(MembershipError::DuplicateId(process.id).into());
            }
        }

        Ok(())
    }

    /// Every listed process, nodes first.
    pub fn all(&self) -> impl Iterator<Item = &ProcessConfig> {
        self.nodes.iter().chain(&self.clients)
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessConfig> {
        self.all().find(|process| process.id == id)
    }

    /// Writes a fresh key pair for every listed process.
    pub fn generate_keys(&self, keys: &KeyStore) -> Result<(), ConfigError> {
        for process in self.all() {
            keys.generate(&process.hostname, process.port)?;
            tracing::info!(process = %process.id, address = %process.address(), "generated keys");
        }
        Ok(())
    }

    /// Resolves every public key and builds the runtime membership.
    pub fn to_membership(&self, keys: &KeyStore) -> Result<Membership, ConfigError> {
        let resolve = |configs: &[ProcessConfig]| {
            configs
                .iter()
                .map(|config| {
                    let public_key = keys.load_public(&config.hostname, config.port)?;
                    Ok(ProcessIdentity::new(config.clone(), public_key))
                })
                .collect::<Result<Vec<_>, ConfigError>>()
        };

        Ok(Membership::new(
            resolve(&self.nodes)?,
            resolve(&self.clients)?,
        )?)
    }

    /// Identity of process `id`, including its private key.
    pub fn local_process(&self, id: ProcessId, keys: &KeyStore) -> Result<LocalProcess, ConfigError> {
        let config = self.get(id).ok_or(ConfigError::UnknownProcess(id))?;
        let signing_key = keys.load_signing(&config.hostname, config.port)?;
        Ok(LocalProcess::new(config.clone(), signing_key))
    }
}
