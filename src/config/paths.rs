//! XDG-compliant path management

use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Manages all application paths using XDG base directory specification
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    /// Create a new Paths instance
    pub fn new() -> Self {
        match ProjectDirs::from("", "", "modsync") {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_path_buf(),
                data_dir: dirs.data_dir().to_path_buf(),
            },
            // No home directory (containers, CI): fall back to the working directory
            None => Self::with_root(Path::new(".modsync")),
        }
    }

    /// Paths rooted under a single directory
    pub fn with_root(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    // ========== Config Paths ==========

    /// Config directory: ~/.config/modsync/
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Main config file: ~/.config/modsync/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.toml")
    }

    // ========== Data Paths ==========

    /// Data directory: ~/.local/share/modsync/
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Database file: ~/.local/share/modsync/modsync.db
    pub fn database_file(&self) -> PathBuf {
        self.data_dir().join("modsync.db")
    }

    /// Downloads directory: ~/.local/share/modsync/downloads/
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir().join("downloads")
    }

    /// Log file: ~/.local/share/modsync/modsync.log
    pub fn log_file(&self) -> PathBuf {
        self.data_dir().join("modsync.log")
    }

    /// Ensure all directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}
