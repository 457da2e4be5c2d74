//! Configuration management for ModSync
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/modsync/config.toml
//! - Data: ~/.local/share/modsync/

mod paths;

pub use paths::Paths;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active game identifier (e.g., "skyrimse")
    pub active_game: Option<String>,

    /// Nexus Mods API key
    pub nexus_api_key: Option<String>,

    /// Override for downloaded archives directory
    pub downloads_dir_override: Option<String>,

    /// Nexus integration settings
    pub nexus: NexusConfig,

    /// Additional user-defined games or catalog overrides
    pub games: Vec<CustomGameConfig>,

    /// Paths configuration
    #[serde(skip)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_game: None,
            nexus_api_key: None,
            downloads_dir_override: None,
            nexus: NexusConfig::default(),
            games: Vec::new(),
            paths: Paths::new(),
        }
    }
}

/// User-specified game entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomGameConfig {
    /// Game ID (e.g., "skyrimse", "fallout4")
    pub game_id: String,
    /// Display name
    pub name: Option<String>,
    /// Explicit Nexus catalog page id, wins over the built-in mapping
    pub nexus_page_id: Option<String>,
}

/// Nexus integration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Quiet period before a burst of mod table changes is processed
    pub debounce_ms: u64,

    /// Minimum visible duration of an update check
    pub version_check_floor_ms: u64,

    /// Concurrent metadata refreshes per change cycle
    pub max_concurrent_refresh: usize,

    /// Metadata refresh requests per second
    pub requests_per_second: u32,

    /// Handle nxm:// links
    pub associate_nxm: bool,

    /// How often `watch` re-reads the mod table
    pub poll_interval_ms: u64,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            version_check_floor_ms: 2000,
            max_concurrent_refresh: 4,
            requests_per_second: 5,
            associate_nxm: false,
            poll_interval_ms: 1000,
        }
    }
}

impl NexusConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn version_check_floor(&self) -> Duration {
        Duration::from_millis(self.version_check_floor_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

impl Config {
    /// API key if one is set and non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.nexus_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Resolve configured downloads directory (override or default XDG path)
    pub fn downloads_dir(&self) -> PathBuf {
        self.downloads_dir_override
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.downloads_dir())
    }

    /// Ensure required directories exist, including overrides.
    pub fn ensure_dirs(&self) -> Result<()> {
        self.paths
            .ensure_dirs()
            .context("Failed to create default application directories")?;
        std::fs::create_dir_all(self.downloads_dir())
            .context("Failed to create downloads directory")?;
        Ok(())
    }

    /// Load configuration from disk or create default
    pub async fn load() -> Result<Self> {
        Self::load_with(Paths::new()).await
    }

    /// Load configuration using explicit paths
    pub async fn load_with(paths: Paths) -> Result<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Create default config
            let config = Config {
                paths: paths.clone(),
                ..Config::default()
            };
            config.save().await?;
            config
        };

        config.paths = paths;
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self) -> Result<()> {
        let config_path = self.paths.config_file();

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            active_game = "skyrimse"

            [nexus]
            debounce_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.active_game.as_deref(), Some("skyrimse"));
        assert_eq!(config.nexus.debounce_ms, 500);
        assert_eq!(config.nexus.version_check_floor_ms, 2000);
        assert!(!config.nexus.associate_nxm);
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let mut config = Config::default();
        config.nexus_api_key = Some("   ".to_string());
        assert_eq!(config.api_key(), None);

        config.nexus_api_key = Some(" abc ".to_string());
        assert_eq!(config.api_key(), Some("abc"));
    }

    #[tokio::test]
    async fn test_load_creates_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());

        let mut config = Config::load_with(paths.clone()).await.unwrap();
        assert!(paths.config_file().exists());

        config.nexus_api_key = Some("key".to_string());
        config.games.push(CustomGameConfig {
            game_id: "enderal".to_string(),
            name: None,
            nexus_page_id: Some("enderalspecialedition".to_string()),
        });
        config.save().await.unwrap();

        let loaded = Config::load_with(paths).await.unwrap();
        assert_eq!(loaded.api_key(), Some("key"));
        assert_eq!(loaded.games.len(), 1);
        assert_eq!(
            loaded.games[0].nexus_page_id.as_deref(),
            Some("enderalspecialedition")
        );
    }
}
