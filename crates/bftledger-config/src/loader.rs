//! Configuration loader with multi-source merging

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{BftLedgerConfig, Paths};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BFTL".to_string(),
            include_user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "BFTL")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/bftledger/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Merges, lowest precedence first: built-in defaults, the user file,
    /// `bftledger.toml`, `bftledger.local.toml`, then `<PREFIX>_SECTION__KEY`
    /// environment variables. Relative paths resolve against the project
    /// directory.
    pub fn load(self) -> Result<BftLedgerConfig> {
        let user_file = self
            .include_user_config
            .then(|| Paths::new().user_config_file().ok())
            .flatten();
        let files = user_file.into_iter().chain([
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ]);

        let defaults = config::Config::try_from(&BftLedgerConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        for file in files.filter(|file| file.exists()) {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }
        let merged = builder
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut loaded: BftLedgerConfig = merged
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.resolve_paths(&self.project_dir);
        Ok(loaded)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
