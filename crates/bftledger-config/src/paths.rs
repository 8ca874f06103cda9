//! Path utilities and XDG directory discovery

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for bftledger
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("org", "bftledger", "bftledger"),
        }
    }

    /// User config directory (~/.config/bftledger/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::Xdg("Failed to determine user config directory".to_string())
            })
    }

    /// User config file path (~/.config/bftledger/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Project config file path (bftledger.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("bftledger.toml")
    }

    /// Local config file path (bftledger.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("bftledger.local.toml")
    }

    /// .bftledger state directory, home of the default key store
    pub fn state_dir(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(".bftledger")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
