//! Game descriptors and the table of known games

use crate::config::CustomGameConfig;
use serde::{Deserialize, Serialize};

/// Supported games
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    Skyrim,
    SkyrimSE,
    SkyrimVR,
    Fallout3,
    FalloutNV,
    Fallout4,
    Fallout4VR,
    Oblivion,
    Morrowind,
    Teso,
    Starfield,
}

impl GameType {
    /// Parse from stable game ID.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|game| game.id().eq_ignore_ascii_case(id))
    }

    /// Get the game ID string
    pub fn id(&self) -> &'static str {
        match self {
            GameType::Skyrim => "skyrim",
            GameType::SkyrimSE => "skyrimse",
            GameType::SkyrimVR => "skyrimvr",
            GameType::Fallout3 => "fallout3",
            GameType::FalloutNV => "falloutnv",
            GameType::Fallout4 => "fallout4",
            GameType::Fallout4VR => "fallout4vr",
            GameType::Oblivion => "oblivion",
            GameType::Morrowind => "morrowind",
            GameType::Teso => "teso",
            GameType::Starfield => "starfield",
        }
    }

    /// Get the display name
    pub fn display_name(&self) -> &'static str {
        match self {
            GameType::Skyrim => "Skyrim",
            GameType::SkyrimSE => "Skyrim Special Edition",
            GameType::SkyrimVR => "Skyrim VR",
            GameType::Fallout3 => "Fallout 3",
            GameType::FalloutNV => "Fallout: New Vegas",
            GameType::Fallout4 => "Fallout 4",
            GameType::Fallout4VR => "Fallout 4 VR",
            GameType::Oblivion => "Oblivion",
            GameType::Morrowind => "Morrowind",
            GameType::Teso => "The Elder Scrolls Online",
            GameType::Starfield => "Starfield",
        }
    }

    /// Get all supported game types
    pub fn all() -> &'static [GameType] {
        &[
            GameType::Skyrim,
            GameType::SkyrimSE,
            GameType::SkyrimVR,
            GameType::Fallout3,
            GameType::FalloutNV,
            GameType::Fallout4,
            GameType::Fallout4VR,
            GameType::Oblivion,
            GameType::Morrowind,
            GameType::Teso,
            GameType::Starfield,
        ]
    }
}

/// Internal game metadata.
///
/// `nexus_page_id` is an explicit override of the Nexus catalog id. When absent,
/// [`crate::nexus::nexus_game_id`] falls back to its mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDescriptor {
    /// Short identifier (e.g., "skyrimse")
    pub id: String,

    /// Display name
    pub name: String,

    /// Explicit Nexus catalog page id
    pub nexus_page_id: Option<String>,
}

impl GameDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            nexus_page_id: None,
        }
    }

    pub fn with_page_id(mut self, page_id: impl Into<String>) -> Self {
        self.nexus_page_id = Some(page_id.into());
        self
    }
}

impl From<GameType> for GameDescriptor {
    fn from(game: GameType) -> Self {
        Self {
            id: game.id().to_string(),
            name: game.display_name().to_string(),
            nexus_page_id: None,
        }
    }
}

impl From<&CustomGameConfig> for GameDescriptor {
    fn from(custom: &CustomGameConfig) -> Self {
        let name = custom
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&custom.game_id)
            .to_string();
        Self {
            id: custom.game_id.clone(),
            name,
            nexus_page_id: custom
                .nexus_page_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToOwned::to_owned),
        }
    }
}

/// Registry of known games: built-in types plus user-configured entries.
///
/// User entries shadow built-in ones with the same id.
#[derive(Debug, Clone, Default)]
pub struct GameRegistry {
    games: Vec<GameDescriptor>,
}

impl GameRegistry {
    pub fn new(custom: &[CustomGameConfig]) -> Self {
        let mut games: Vec<GameDescriptor> = custom
            .iter()
            .filter(|c| !c.game_id.trim().is_empty())
            .map(GameDescriptor::from)
            .collect();

        for builtin in GameType::all() {
            if !games.iter().any(|g| g.id.eq_ignore_ascii_case(builtin.id())) {
                games.push(GameDescriptor::from(*builtin));
            }
        }

        Self { games }
    }

    /// Look up a game by id (case-insensitive)
    pub fn get(&self, game_id: &str) -> Option<&GameDescriptor> {
        self.games.iter().find(|g| g.id.eq_ignore_ascii_case(game_id))
    }

    pub fn all(&self) -> &[GameDescriptor] {
        &self.games
    }
}
