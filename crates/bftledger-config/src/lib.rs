//! # bftledger-config: configuration for bftledger processes
//!
//! Settings are merged from several sources, in increasing precedence:
//!
//! 1. Built-in defaults
//! 2. User config (`~/.config/bftledger/config.toml`)
//! 3. Project config (`bftledger.toml`)
//! 4. Local overrides (`bftledger.local.toml`, gitignored)
//! 5. Environment variables (`BFTL_CONSENSUS__ROUND_CHANGE_TIMEOUT_MS=500`)
//!
//! The static membership lives in its own file (see [`MembershipFile`])
//! because every process of a deployment must agree on it, while the
//! tuning knobs above may differ per machine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bftledger_consensus::NodeConfig;
use bftledger_crypto::KeyStore;
use bftledger_link::LinkConfig;
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod membership;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use membership::MembershipFile;
pub use paths::Paths;

/// Complete bftledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BftLedgerConfig {
    #[serde(default)]
    pub link: LinkSection,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub keys: KeysSection,

    #[serde(default)]
    pub membership: MembershipSection,
}

impl BftLedgerConfig {
    /// Load configuration from all sources in the current directory
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific project directory
    pub fn load_from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(dir).load()
    }

    /// Make relative paths absolute against `project_dir`.
    pub fn resolve_paths(&mut self, project_dir: &Path) {
        if self.keys.directory.is_relative() {
            self.keys.directory = project_dir.join(&self.keys.directory);
        }
        if self.membership.file.is_relative() {
            self.membership.file = project_dir.join(&self.membership.file);
        }
    }

    /// Reads the membership file named by `[membership]`.
    pub fn membership_file(&self) -> Result<MembershipFile, ConfigError> {
        MembershipFile::load(&self.membership.file)
    }
}

/// Retransmission and replay-window settings of the reliable link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub retry_base_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
    pub client_window_ms: u64,
    pub node_window_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            retry_base_ms: 200,
            max_backoff_ms: 10_000,
            max_attempts: 20,
            client_window_ms: 500,
            node_window_ms: 0,
        }
    }
}

impl LinkSection {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            retry_base: Duration::from_millis(self.retry_base_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            client_window: Duration::from_millis(self.client_window_ms),
            node_window: Duration::from_millis(self.node_window_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub round_change_timeout_ms: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            round_change_timeout_ms: 2_000,
        }
    }
}

impl ConsensusSection {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            round_change_timeout: Duration::from_millis(self.round_change_timeout_ms),
        }
    }
}

/// Where key pairs are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    pub directory: PathBuf,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".bftledger/keys"),
        }
    }
}

impl KeysSection {
    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(&self.directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSection {
    pub file: PathBuf,
}

impl Default for MembershipSection {
    fn default() -> Self {
        Self {
            file: PathBuf::from("membership.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BftLedgerConfig::default();
        assert_eq!(config.link.max_backoff_ms, 10_000);
        assert_eq!(config.link.node_window_ms, 0);
        assert_eq!(config.keys.directory, PathBuf::from(".bftledger/keys"));
        assert_eq!(config.membership.file, PathBuf::from("membership.toml"));
    }

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = BftLedgerConfig::default();
        let link = config.link.link_config();
        let runtime = LinkConfig::default();

        assert_eq!(link.retry_base, runtime.retry_base);
        assert_eq!(link.max_backoff, runtime.max_backoff);
        assert_eq!(link.max_attempts, runtime.max_attempts);
        assert_eq!(link.client_window, runtime.client_window);
        assert_eq!(link.node_window, runtime.node_window);
        assert_eq!(
            config.consensus.node_config().round_change_timeout,
            NodeConfig::default().round_change_timeout
        );
    }

    #[test]
    fn test_zero_attempts_retries_forever() {
        let section = LinkSection {
            max_attempts: 0,
            ..LinkSection::default()
        };
        assert_eq!(section.link_config().max_attempts, None);
    }

    #[test]
    fn test_resolve_paths_keeps_absolute_paths() {
        let mut config = BftLedgerConfig::default();
        config.membership.file = PathBuf::from("/etc/bftledger/membership.json");
        config.resolve_paths(Path::new("/srv/ledger"));

        assert_eq!(config.keys.directory, PathBuf::from("/srv/ledger/.bftledger/keys"));
        assert_eq!(
            config.membership.file,
            PathBuf::from("/etc/bftledger/membership.json")
        );
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = BftLedgerConfig::default();
        let toml = toml::to_string(&config).expect("Failed to serialize");
        let parsed: BftLedgerConfig = toml::from_str(&toml).expect("Failed to deserialize");
        assert_eq!(parsed.link.retry_base_ms, config.link.retry_base_ms);
        assert_eq!(parsed.keys.directory, config.keys.directory);
    }
}
