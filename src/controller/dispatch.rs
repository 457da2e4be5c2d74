//! Turning "install this file" requests into downloads

use super::auth::AuthGate;
use crate::nexus::{
    convert_game_id_reverse, mod_page_url, nexus_game_id, to_nxm_id, NexusError, NexusService,
    NxmUrl,
};
use crate::state::{
    DownloadRecord, DownloadState, Host, HostEvent, Intent, NexusIds, Notification,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub const DOWNLOAD_FAILED_TITLE: &str = "Failed to start download";

/// How a file request was handled
#[derive(Debug)]
pub enum RequestOutcome {
    /// No premium/supporter access; the mod page was opened instead
    OpenedModPage(String),
    /// The file was downloaded before; its download is handed to install
    InstallExisting(String),
    /// A new download finished and was handed to install
    Started(String),
    /// The server sent a web page instead of the file
    Ignored,
    /// The same file is already being downloaded
    AlreadyInProgress,
    Failed(NexusError),
}

pub struct DownloadDispatcher {
    host: Arc<dyn Host>,
    service: Arc<dyn NexusService>,
    auth: AuthGate,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl DownloadDispatcher {
    pub fn new(host: Arc<dyn Host>, service: Arc<dyn NexusService>) -> Self {
        Self {
            auth: AuthGate::new(Arc::clone(&host), Arc::clone(&service)),
            host,
            service,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Catalog id of a game; an explicit page id on its descriptor wins
    fn catalog_domain(&self, game_id: &str) -> String {
        let descriptor = self.host.game_or_default(game_id);
        nexus_game_id(Some(&descriptor)).unwrap_or_else(|| game_id.to_string())
    }

    /// Website page of a mod, using the game's catalog id
    pub fn mod_page_url(&self, game_id: &str, mod_id: impl fmt::Display) -> String {
        mod_page_url(&self.catalog_domain(game_id), mod_id)
    }

    pub fn open_mod_page(&self, game_id: &str, mod_id: impl fmt::Display) -> String {
        let url = self.mod_page_url(game_id, mod_id);
        tracing::info!("Opening {}", url);
        self.host.open_url(&url);
        url
    }

    /// Get a file installed: reuse an earlier download of it or start a new one.
    ///
    /// Accounts without premium or supporter status cannot download directly
    /// and get the mod page instead.
    pub async fn request_file(&self, game_id: &str, mod_id: i64, file_id: i64) -> RequestOutcome {
        if !self.auth.has_elevated_access() {
            tracing::info!(
                "Direct downloads need premium, opening the page of mod {} instead",
                mod_id
            );
            return RequestOutcome::OpenedModPage(self.open_mod_page(game_id, mod_id));
        }

        let link = NxmUrl::for_file(to_nxm_id(game_id), mod_id, file_id);
        self.fetch(game_id, link).await
    }

    /// Handle an `nxm://` link from the browser. Website links carry their own
    /// download key, so no account check is made.
    pub async fn handle_link(&self, link: NxmUrl) -> RequestOutcome {
        let reverse = convert_game_id_reverse(Some(&link.game.to_ascii_lowercase()));
        let game_id = match reverse {
            Some(reverse) => {
                if !reverse.reliable {
                    tracing::debug!(
                        "Game of link {} is ambiguous, assuming {}",
                        link,
                        reverse.id
                    );
                }
                reverse.id
            }
            None => link.game.clone(),
        };

        self.fetch(&game_id, link).await
    }

    async fn fetch(&self, game_id: &str, link: NxmUrl) -> RequestOutcome {
        // reserve before looking for an existing record so a concurrent request
        // either sees our record or our reservation
        let Some(_reservation) = Reservation::acquire(&self.in_flight, link.file_id) else {
            tracing::info!("{} is already being downloaded", link);
            return RequestOutcome::AlreadyInProgress;
        };

        let existing = self
            .host
            .downloads()
            .into_iter()
            .find(|d| d.nexus_file_id() == Some(link.file_id));

        if let Some(existing) = existing {
            tracing::info!("{} was downloaded before as {}", link, existing.id);
            self.host.emit(HostEvent::StartInstallDownload {
                download_id: existing.id.clone(),
            });
            return RequestOutcome::InstallExisting(existing.id);
        }

        tracing::info!("Starting download of {}", link);

        match self.service.start_download(&link).await {
            Ok(started) => {
                self.host.dispatch(Intent::AddDownload(DownloadRecord {
                    id: started.id.clone(),
                    game_id: game_id.to_string(),
                    file_name: started.file_name,
                    state: DownloadState::Finished,
                    nexus: Some(NexusIds {
                        game_domain: self.catalog_domain(game_id),
                        mod_id: link.mod_id,
                        file_id: link.file_id,
                    }),
                    created_at: chrono::Utc::now().to_rfc3339(),
                }));
                self.host.emit(HostEvent::StartInstallDownload {
                    download_id: started.id.clone(),
                });
                RequestOutcome::Started(started.id)
            }
            Err(e) if e.is_benign() => {
                tracing::debug!("Ignoring download of {}: {}", link, e);
                RequestOutcome::Ignored
            }
            Err(e) => {
                tracing::error!("Download of {} failed: {}", link, e);
                self.host.notify(Notification::error(
                    DOWNLOAD_FAILED_TITLE,
                    e.to_string(),
                    e.is_reportable(),
                ));
                RequestOutcome::Failed(e)
            }
        }
    }
}

/// Holds a file id in the in-flight set until dropped
struct Reservation {
    set: Arc<Mutex<HashSet<i64>>>,
    file_id: i64,
}

impl Reservation {
    fn acquire(set: &Arc<Mutex<HashSet<i64>>>, file_id: i64) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_id);

        inserted.then(|| Self {
            set: Arc::clone(set),
            file_id,
        })
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::GameDescriptor;
    use crate::nexus::{MockNexusService, StartedDownload};
    use crate::state::{MemoryHost, MemoryState, UserInfo};

    fn premium() -> Option<UserInfo> {
        Some(UserInfo {
            user_id: 1,
            name: "tester".into(),
            is_premium: true,
            is_supporter: false,
            profile_url: None,
        })
    }

    fn download(id: &str, file_id: i64) -> DownloadRecord {
        DownloadRecord {
            id: id.into(),
            game_id: "skyrimse".into(),
            file_name: None,
            state: DownloadState::Finished,
            nexus: Some(NexusIds {
                game_domain: "skyrimspecialedition".into(),
                mod_id: 266,
                file_id,
            }),
            created_at: String::new(),
        }
    }

    fn host(user_info: Option<UserInfo>, downloads: Vec<DownloadRecord>) -> MemoryHost {
        MemoryHost::new(MemoryState {
            games: vec![GameDescriptor::new("skyrimse")],
            api_key: Some("key".into()),
            user_info,
            downloads,
            ..MemoryState::default()
        })
    }

    fn dispatcher(host: &MemoryHost, service: MockNexusService) -> DownloadDispatcher {
        DownloadDispatcher::new(Arc::new(host.clone()), Arc::new(service))
    }

    #[tokio::test]
    async fn test_existing_download_is_installed() {
        let host = host(premium(), vec![download("other", 7), download("dl-1", 1000)]);
        let mut service = MockNexusService::new();
        service.expect_start_download().never();

        let outcome = dispatcher(&host, service)
            .request_file("skyrimse", 266, 1000)
            .await;

        assert!(matches!(outcome, RequestOutcome::InstallExisting(ref id) if id == "dl-1"));
        assert_eq!(
            host.state().events,
            vec![HostEvent::StartInstallDownload {
                download_id: "dl-1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_without_premium_opens_mod_page() {
        let host = host(None, Vec::new());
        let mut service = MockNexusService::new();
        service.expect_start_download().never();

        let outcome = dispatcher(&host, service)
            .request_file("skyrimse", 266, 1000)
            .await;

        let expected = "https://www.nexusmods.com/skyrimspecialedition/mods/266";
        assert!(matches!(outcome, RequestOutcome::OpenedModPage(ref url) if url == expected));
        let state = host.state();
        assert_eq!(state.opened_urls, vec![expected.to_string()]);
        assert!(state.events.is_empty());
    }

    #[tokio::test]
    async fn test_new_download_is_recorded_and_installed() {
        let host = host(premium(), Vec::new());
        let mut service = MockNexusService::new();
        service
            .expect_start_download()
            .withf(|link: &NxmUrl| link.to_string() == "nxm://SkyrimSE/mods/266/files/1000")
            .times(1)
            .returning(|_| {
                Ok(StartedDownload {
                    id: "dl-new".into(),
                    file_name: Some("SkyUI.7z".into()),
                    path: None,
                })
            });

        let outcome = dispatcher(&host, service)
            .request_file("skyrimse", 266, 1000)
            .await;

        assert!(matches!(outcome, RequestOutcome::Started(ref id) if id == "dl-new"));
        let state = host.state();
        assert_eq!(state.downloads.len(), 1);
        assert_eq!(state.downloads[0].nexus_file_id(), Some(1000));
        assert_eq!(
            state.events,
            vec![HostEvent::StartInstallDownload {
                download_id: "dl-new".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_recorded_domain_follows_page_override() {
        let host = host(premium(), Vec::new());
        host.state().games = vec![GameDescriptor::new("skyrimse").with_page_id("customsse")];

        let mut service = MockNexusService::new();
        service.expect_start_download().times(1).returning(|_| {
            Ok(StartedDownload {
                id: "dl-new".into(),
                file_name: None,
                path: None,
            })
        });

        let dispatcher = dispatcher(&host, service);
        dispatcher.request_file("skyrimse", 266, 1000).await;

        assert_eq!(
            dispatcher.mod_page_url("skyrimse", 266),
            "https://www.nexusmods.com/customsse/mods/266"
        );
        let state = host.state();
        assert_eq!(
            state.downloads[0].nexus.as_ref().map(|ids| ids.game_domain.as_str()),
            Some("customsse")
        );
    }

    #[tokio::test]
    async fn test_html_response_is_silent() {
        let host = host(premium(), Vec::new());
        let mut service = MockNexusService::new();
        service
            .expect_start_download()
            .returning(|_| Err(NexusError::NotAFile("text/html".into())));

        let outcome = dispatcher(&host, service)
            .request_file("skyrimse", 266, 1000)
            .await;

        assert!(matches!(outcome, RequestOutcome::Ignored));
        let state = host.state();
        assert!(state.notifications.is_empty());
        assert!(state.events.is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_are_notified() {
        let host = host(premium(), Vec::new());
        let mut service = MockNexusService::new();
        service
            .expect_start_download()
            .returning(|_| Err(NexusError::Network("connection reset".into())));

        let outcome = dispatcher(&host, service)
            .request_file("skyrimse", 266, 1000)
            .await;

        assert!(matches!(outcome, RequestOutcome::Failed(NexusError::Network(_))));
        let state = host.state();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.notifications[0].title, DOWNLOAD_FAILED_TITLE);
    }

    #[tokio::test]
    async fn test_duplicate_request_is_rejected_while_in_flight() {
        let host = host(premium(), Vec::new());
        let mut service = MockNexusService::new();
        service.expect_start_download().never();

        let dispatcher = dispatcher(&host, service);
        let held = Reservation::acquire(&dispatcher.in_flight, 1000).unwrap();

        let outcome = dispatcher.request_file("skyrimse", 266, 1000).await;
        assert!(matches!(outcome, RequestOutcome::AlreadyInProgress));

        drop(held);
        assert!(dispatcher.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_browser_link_maps_game_back() {
        let host = host(None, Vec::new());
        let mut service = MockNexusService::new();
        service.expect_start_download().returning(|_| {
            Ok(StartedDownload {
                id: "dl-link".into(),
                file_name: None,
                path: None,
            })
        });

        let link = NxmUrl::parse("nxm://newvegas/mods/34888/files/1000089012?key=k&expires=1")
            .unwrap();
        let outcome = dispatcher(&host, service).handle_link(link).await;

        assert!(matches!(outcome, RequestOutcome::Started(_)));
        let state = host.state();
        assert_eq!(state.downloads[0].game_id, "falloutnv");
        assert_eq!(
            state.downloads[0].nexus.as_ref().map(|ids| ids.game_domain.as_str()),
            Some("newvegas")
        );
    }
}
