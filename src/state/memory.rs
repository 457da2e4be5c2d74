//! In-memory host

use super::{DownloadRecord, Host, HostEvent, Intent, Notification, UserInfo};
use crate::games::GameDescriptor;
use crate::mods::ModTable;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything a [`MemoryHost`] holds, plus a log of what it was asked to do.
#[derive(Debug, Default)]
pub struct MemoryState {
    pub active_game: Option<String>,
    pub games: Vec<GameDescriptor>,
    pub mods: ModTable,
    pub downloads: Vec<DownloadRecord>,
    pub api_key: Option<String>,
    pub user_info: Option<UserInfo>,
    pub updating: HashSet<String>,
    pub intents: Vec<Intent>,
    pub events: Vec<HostEvent>,
    pub notifications: Vec<Notification>,
    pub opened_urls: Vec<String>,
}

/// Host backed by a mutex-guarded [`MemoryState`]. Intents are applied
/// immediately and also appended to `intents`.
#[derive(Debug, Default, Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHost {
    pub fn new(state: MemoryState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Host for MemoryHost {
    fn active_game_id(&self) -> Option<String> {
        self.state().active_game.clone()
    }

    fn game(&self, game_id: &str) -> Option<GameDescriptor> {
        self.state()
            .games
            .iter()
            .find(|g| g.id.eq_ignore_ascii_case(game_id))
            .cloned()
    }

    fn mod_table(&self) -> ModTable {
        self.state().mods.clone()
    }

    fn downloads(&self) -> Vec<DownloadRecord> {
        self.state().downloads.clone()
    }

    fn api_key(&self) -> Option<String> {
        self.state().api_key.clone()
    }

    fn user_info(&self) -> Option<UserInfo> {
        self.state().user_info.clone()
    }

    fn dispatch(&self, intent: Intent) {
        let mut state = self.state();
        match &intent {
            Intent::SetUserInfo(info) => state.user_info = info.clone(),
            Intent::SetUpdatingMods { game_id, updating } => {
                if *updating {
                    state.updating.insert(game_id.clone());
                } else {
                    state.updating.remove(game_id);
                }
            }
            Intent::SetModAttributes {
                game_id,
                mod_id,
                patch,
            } => {
                if let Some(mods) = state.mods.get_mut(game_id) {
                    if let Some(record) = Arc::make_mut(mods).get_mut(mod_id) {
                        patch.apply(&mut record.attributes);
                    }
                }
            }
            Intent::AddDownload(record) => state.downloads.push(record.clone()),
        }
        state.intents.push(intent);
    }

    fn emit(&self, event: HostEvent) {
        self.state().events.push(event);
    }

    fn notify(&self, notification: Notification) {
        self.state().notifications.push(notification);
    }

    fn open_url(&self, url: &str) {
        self.state().opened_urls.push(url.to_string());
    }
}
