//! Host state and event facade
//!
//! The host owns the mod table, download records, session info and the
//! per-game "updating" markers. The Nexus integration reads snapshots through
//! [`Host`] and requests changes by dispatching [`Intent`]s.

mod memory;

pub use memory::{MemoryHost, MemoryState};

use crate::games::GameDescriptor;
use crate::mods::{AttributePatch, ModTable};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Session info derived from a validated API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub name: String,
    pub is_premium: bool,
    pub is_supporter: bool,
    pub profile_url: Option<String>,
}

/// Nexus ids a download was fetched for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusIds {
    /// Catalog domain
    pub game_domain: String,
    pub mod_id: i64,
    pub file_id: i64,
}

/// Download status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Started,
    Finished,
    Failed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Started => "started",
            DownloadState::Finished => "finished",
            DownloadState::Failed => "failed",
        }
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(DownloadState::Started),
            "finished" => Ok(DownloadState::Finished),
            "failed" => Ok(DownloadState::Failed),
            other => Err(format!("unknown download state '{}'", other)),
        }
    }
}

/// A local download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Locally generated id
    pub id: String,
    /// Internal game id
    pub game_id: String,
    pub file_name: Option<String>,
    pub state: DownloadState,
    pub nexus: Option<NexusIds>,
    pub created_at: String,
}

impl DownloadRecord {
    pub fn nexus_file_id(&self) -> Option<i64> {
        self.nexus.as_ref().map(|ids| ids.file_id)
    }
}

/// State changes requested from the host
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetUserInfo(Option<UserInfo>),
    SetUpdatingMods {
        game_id: String,
        updating: bool,
    },
    SetModAttributes {
        game_id: String,
        mod_id: String,
        patch: AttributePatch,
    },
    AddDownload(DownloadRecord),
}

/// Events raised towards the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Hand a finished download to the install pipeline
    StartInstallDownload { download_id: String },
}

/// A user-facing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub detail: String,
    /// Offer a bug report
    pub allow_report: bool,
}

impl Notification {
    pub fn error(title: impl Into<String>, detail: impl Into<String>, allow_report: bool) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
            allow_report,
        }
    }

    /// Missing credential
    pub fn not_logged_in(title: impl Into<String>) -> Self {
        Self::error(title, "You are not logged in to Nexus Mods!", false)
    }
}

/// Read snapshots, dispatch intents, surface notifications.
pub trait Host: Send + Sync {
    fn active_game_id(&self) -> Option<String>;

    fn game(&self, game_id: &str) -> Option<GameDescriptor>;

    fn mod_table(&self) -> ModTable;

    fn downloads(&self) -> Vec<DownloadRecord>;

    fn api_key(&self) -> Option<String>;

    fn user_info(&self) -> Option<UserInfo>;

    fn dispatch(&self, intent: Intent);

    fn emit(&self, event: HostEvent);

    fn notify(&self, notification: Notification);

    fn open_url(&self, url: &str);

    /// Game descriptor, or a bare one for ids the host does not know
    fn game_or_default(&self, game_id: &str) -> GameDescriptor {
        self.game(game_id)
            .unwrap_or_else(|| GameDescriptor::new(game_id))
    }
}

/// OS-level registration of the `nxm://` handler
#[cfg_attr(test, mockall::automock)]
pub trait ProtocolRegistrar: Send + Sync {
    /// Register this application; `make_default` also claims the scheme
    fn register(&self, make_default: bool) -> Result<()>;

    fn deregister(&self, scheme: &str) -> Result<()>;
}
