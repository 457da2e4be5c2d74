//! Host backed by the SQLite database

use crate::db::Database;
use crate::games::{GameDescriptor, GameRegistry};
use crate::mods::ModTable;
use crate::state::{DownloadRecord, Host, HostEvent, Intent, Notification, UserInfo};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The CLI's view of host state.
///
/// Mods and downloads live in the database. Session info and updating markers
/// only live as long as the process. Events go out on a channel.
pub struct AppHost {
    db: Arc<Database>,
    registry: GameRegistry,
    active_game: RwLock<Option<String>>,
    api_key: RwLock<Option<String>>,
    user_info: RwLock<Option<UserInfo>>,
    updating: RwLock<HashSet<String>>,
    mods: RwLock<ModTable>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl AppHost {
    pub fn new(
        db: Arc<Database>,
        registry: GameRegistry,
        active_game: Option<String>,
        api_key: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>)> {
        let mods = db.load_mod_table()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let host = Self {
            db,
            registry,
            active_game: RwLock::new(active_game),
            api_key: RwLock::new(api_key),
            user_info: RwLock::new(None),
            updating: RwLock::new(HashSet::new()),
            mods: RwLock::new(mods),
            events: tx,
        };

        Ok((host, rx))
    }

    pub fn registry(&self) -> &GameRegistry {
        &self.registry
    }

    pub fn set_api_key(&self, key: Option<String>) {
        *write(&self.api_key) = key;
    }

    pub fn set_active_game(&self, game_id: Option<String>) {
        *write(&self.active_game) = game_id;
    }

    pub fn is_updating(&self, game_id: &str) -> bool {
        read(&self.updating).contains(game_id)
    }

    /// Re-read the mod table from the database.
    ///
    /// Games whose mods did not change keep their previous `Arc`. Returns the
    /// new snapshot if anything changed.
    pub fn reload_mods(&self) -> Result<Option<ModTable>> {
        let fresh = self.db.load_mod_table()?;
        let mut cached = write(&self.mods);

        if *cached == fresh {
            return Ok(None);
        }

        let merged: ModTable = fresh
            .into_iter()
            .map(|(game, mods)| match cached.get(&game) {
                Some(old) if **old == *mods => (game, Arc::clone(old)),
                _ => (game, mods),
            })
            .collect();

        *cached = merged.clone();
        Ok(Some(merged))
    }
}

impl Host for AppHost {
    fn active_game_id(&self) -> Option<String> {
        read(&self.active_game).clone()
    }

    fn game(&self, game_id: &str) -> Option<GameDescriptor> {
        self.registry.get(game_id).cloned()
    }

    fn mod_table(&self) -> ModTable {
        read(&self.mods).clone()
    }

    fn downloads(&self) -> Vec<DownloadRecord> {
        self.db.get_downloads().unwrap_or_else(|e| {
            tracing::error!("Failed to read downloads: {}", e);
            Vec::new()
        })
    }

    fn api_key(&self) -> Option<String> {
        read(&self.api_key).clone()
    }

    fn user_info(&self) -> Option<UserInfo> {
        read(&self.user_info).clone()
    }

    fn dispatch(&self, intent: Intent) {
        tracing::debug!("dispatch {:?}", intent);

        match intent {
            Intent::SetUserInfo(info) => *write(&self.user_info) = info,
            Intent::SetUpdatingMods { game_id, updating } => {
                let mut markers = write(&self.updating);
                if updating {
                    markers.insert(game_id);
                } else {
                    markers.remove(&game_id);
                }
            }
            Intent::SetModAttributes {
                game_id,
                mod_id,
                patch,
            } => {
                if let Err(e) = self.db.update_mod_attributes(&game_id, &mod_id, &patch) {
                    tracing::error!("Failed to store attributes of {}/{}: {}", game_id, mod_id, e);
                    return;
                }
                let mut mods = write(&self.mods);
                if let Some(game_mods) = mods.get_mut(&game_id) {
                    if let Some(record) = Arc::make_mut(game_mods).get_mut(&mod_id) {
                        patch.apply(&mut record.attributes);
                    }
                }
            }
            Intent::AddDownload(record) => {
                if let Err(e) = self.db.insert_download(&record) {
                    tracing::error!("Failed to store download {}: {}", record.id, e);
                }
            }
        }
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for host events");
        }
    }

    fn notify(&self, notification: Notification) {
        tracing::warn!("{}: {}", notification.title, notification.detail);
        eprintln!("{}", notification.title);
        if !notification.detail.is_empty() {
            eprintln!("  {}", notification.detail.replace('\n', "\n  "));
        }
        if notification.allow_report {
            eprintln!("  (this looks like a bug, please report it)");
        }
    }

    fn open_url(&self, url: &str) {
        if let Err(e) = open::that(url) {
            tracing::warn!("Failed to open {}: {}", url, e);
            println!("Open in your browser: {}", url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mods::{AttributePatch, ModRecord};
    use tempfile::TempDir;

    fn host() -> (TempDir, Arc<Database>, AppHost, mpsc::UnboundedReceiver<HostEvent>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("modsync.db")).unwrap());
        let mut record = ModRecord::new("skyui");
        record.attributes.mod_id = Some(12604);
        db.upsert_mod("skyrimse", &record).unwrap();
        db.upsert_mod("fallout4", &ModRecord::new("f4se")).unwrap();

        let (host, rx) = AppHost::new(
            Arc::clone(&db),
            GameRegistry::new(&[]),
            Some("skyrimse".into()),
            None,
        )
        .unwrap();
        (dir, db, host, rx)
    }

    #[test]
    fn test_reload_keeps_untouched_games() {
        let (_dir, db, host, _rx) = host();
        let before = host.mod_table();
        assert!(host.reload_mods().unwrap().is_none());

        let mut changed = ModRecord::new("skyui");
        changed.attributes.mod_id = Some(1);
        db.upsert_mod("skyrimse", &changed).unwrap();

        let after = host.reload_mods().unwrap().unwrap();
        assert!(Arc::ptr_eq(&before["fallout4"], &after["fallout4"]));
        assert!(!Arc::ptr_eq(&before["skyrimse"], &after["skyrimse"]));
        assert_eq!(after["skyrimse"]["skyui"].attributes.mod_id, Some(1));
    }

    #[test]
    fn test_attribute_intent_persists() {
        let (_dir, db, host, _rx) = host();
        host.dispatch(Intent::SetModAttributes {
            game_id: "skyrimse".into(),
            mod_id: "skyui".into(),
            patch: AttributePatch {
                newest_version: Some("5.2".into()),
                ..AttributePatch::default()
            },
        });

        let stored = db.get_mod("skyrimse", "skyui").unwrap().unwrap();
        assert_eq!(stored.attributes.newest_version.as_deref(), Some("5.2"));
        assert_eq!(
            host.mod_table()["skyrimse"]["skyui"].attributes.newest_version.as_deref(),
            Some("5.2")
        );
        // cache and database agree, nothing to reload
        assert!(host.reload_mods().unwrap().is_none());
    }

    #[test]
    fn test_events_and_markers() {
        let (_dir, _db, host, mut rx) = host();
        host.emit(HostEvent::StartInstallDownload {
            download_id: "dl-1".into(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            HostEvent::StartInstallDownload {
                download_id: "dl-1".into()
            }
        );

        host.dispatch(Intent::SetUpdatingMods {
            game_id: "skyrimse".into(),
            updating: true,
        });
        assert!(host.is_updating("skyrimse"));
        host.dispatch(Intent::SetUpdatingMods {
            game_id: "skyrimse".into(),
            updating: false,
        });
        assert!(!host.is_updating("skyrimse"));
    }
}
