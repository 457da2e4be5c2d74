//! Nexus event handlers
//!
//! [`NexusController`] is what the host calls into: mod table changes,
//! download requests, key changes, update checks and the smaller actions
//! (endorsing, issues, feedback, protocol association).

mod auth;
mod dispatch;
mod refresh;

pub use auth::AuthGate;
pub use dispatch::{DownloadDispatcher, RequestOutcome, DOWNLOAD_FAILED_TITLE};
pub use refresh::{
    RefreshOptions, RefreshOrchestrator, RefreshReport, VersionCheckOutcome, CHECK_DENIED_TITLE,
    CHECK_PARTIAL_TITLE,
};

use crate::config::NexusConfig;
use crate::debounce::Debouncer;
use crate::mods::{AttributePatch, EndorsedStatus, ModRecord, ModTable};
use crate::nexus::{
    nexus_game_id, Feedback, FeedbackResponse, Issue, NexusError, NexusService, NxmUrl,
    NXM_SCHEME,
};
use crate::state::{Host, Intent, Notification, ProtocolRegistrar};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const ENDORSE_DENIED_TITLE: &str = "An error occurred endorsing a mod";

/// Timing and throttling of the controller
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub debounce: Duration,
    pub refresh: RefreshOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            refresh: RefreshOptions::default(),
        }
    }
}

impl From<&NexusConfig> for ControllerOptions {
    fn from(config: &NexusConfig) -> Self {
        Self {
            debounce: config.debounce(),
            refresh: RefreshOptions {
                max_concurrent: config.max_concurrent_refresh,
                requests_per_second: config.requests_per_second,
                version_check_floor: config.version_check_floor(),
            },
        }
    }
}

/// Result of an endorse request
#[derive(Debug)]
pub enum EndorseOutcome {
    Denied,
    Updated(EndorsedStatus),
    Failed(NexusError),
}

/// Catalog domain a record belongs to: its download game if set, else `game_id`
pub(crate) fn record_domain(host: &dyn Host, game_id: &str, record: &ModRecord) -> String {
    let source = record
        .attributes
        .download_game
        .as_deref()
        .unwrap_or(game_id);
    let descriptor = host.game_or_default(source);
    nexus_game_id(Some(&descriptor)).unwrap_or_else(|| source.to_string())
}

pub struct NexusController {
    host: Arc<dyn Host>,
    service: Arc<dyn NexusService>,
    registrar: Arc<dyn ProtocolRegistrar>,
    auth: AuthGate,
    refresh: Arc<RefreshOrchestrator>,
    dispatcher: DownloadDispatcher,
    changes: Debouncer<(), ModTable>,
}

impl NexusController {
    pub fn new(
        host: Arc<dyn Host>,
        service: Arc<dyn NexusService>,
        registrar: Arc<dyn ProtocolRegistrar>,
        options: ControllerOptions,
    ) -> Self {
        let refresh = Arc::new(RefreshOrchestrator::new(
            Arc::clone(&host),
            Arc::clone(&service),
            options.refresh,
        ));

        let changes = {
            let refresh = Arc::clone(&refresh);
            Debouncer::new(options.debounce, move |_: (), snapshot: ModTable| {
                let refresh = Arc::clone(&refresh);
                async move {
                    let report = refresh.on_mods_changed(snapshot).await;
                    if !report.refreshed.is_empty() || !report.failed.is_empty() {
                        tracing::info!(
                            "Refresh cycle {}: {} refreshed, {} failed",
                            report.cycle,
                            report.refreshed.len(),
                            report.failed.len()
                        );
                    }
                }
            })
        };

        Self {
            auth: AuthGate::new(Arc::clone(&host), Arc::clone(&service)),
            dispatcher: DownloadDispatcher::new(Arc::clone(&host), Arc::clone(&service)),
            host,
            service,
            registrar,
            refresh,
            changes,
        }
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn refresh(&self) -> &RefreshOrchestrator {
        &self.refresh
    }

    /// The mod table changed; refresh after things have been quiet for a while
    pub fn on_mods_changed(&self, snapshot: ModTable) {
        self.changes.schedule((), snapshot);
    }

    pub fn on_open_mod_page(&self, game_id: &str, mod_id: &str) -> String {
        self.dispatcher.open_mod_page(game_id, mod_id)
    }

    pub fn on_change_nxm_association(&self, old: bool, new: bool) -> anyhow::Result<()> {
        tracing::info!("associate old={} new={}", old, new);
        if new {
            self.registrar.register(true)
        } else {
            self.registrar.deregister(NXM_SCHEME)
        }
    }

    pub async fn on_request_own_issues(&self) -> Result<Vec<Issue>, NexusError> {
        self.service.get_own_issues().await
    }

    /// Install a specific file of a mod
    pub async fn on_mod_update(&self, game_id: &str, mod_id: i64, file_id: i64) -> RequestOutcome {
        self.dispatcher.request_file(game_id, mod_id, file_id).await
    }

    pub async fn on_nxm_link(&self, link: NxmUrl) -> RequestOutcome {
        self.dispatcher.handle_link(link).await
    }

    pub async fn on_submit_feedback(
        &self,
        feedback: Feedback,
    ) -> Result<FeedbackResponse, NexusError> {
        self.service.submit_feedback(feedback).await
    }

    /// Endorse (or abstain from) an installed mod.
    ///
    /// The record shows `Pending` while the request runs and falls back to its
    /// previous status if it fails.
    pub async fn on_endorse_mod(&self, game_id: &str, mod_key: &str, endorse: bool) -> EndorseOutcome {
        if !self.auth.require_credential(ENDORSE_DENIED_TITLE) {
            return EndorseOutcome::Denied;
        }

        let record = self
            .host
            .mod_table()
            .get(game_id)
            .and_then(|mods| mods.get(mod_key).cloned());
        let Some((record, mod_id)) =
            record.and_then(|r| r.attributes.mod_id.map(|id| (r, id)))
        else {
            let err = NexusError::NotFound(format!("{} has no Nexus Mods id", mod_key));
            self.host.notify(Notification::error(
                ENDORSE_DENIED_TITLE,
                err.to_string(),
                false,
            ));
            return EndorseOutcome::Failed(err);
        };

        let previous = record
            .attributes
            .endorsed
            .unwrap_or(EndorsedStatus::Undecided);
        self.set_endorsed(game_id, mod_key, EndorsedStatus::Pending);

        let domain = record_domain(self.host.as_ref(), game_id, &record);
        match self.service.endorse_mod(&domain, mod_id, endorse).await {
            Ok(status) => {
                tracing::info!("Mod {} of {} is now {}", mod_key, game_id, status.as_str());
                self.set_endorsed(game_id, mod_key, status);
                EndorseOutcome::Updated(status)
            }
            Err(e) => {
                tracing::warn!("Endorsing {} failed: {}", mod_key, e);
                self.set_endorsed(game_id, mod_key, previous);
                self.host.notify(Notification::error(
                    ENDORSE_DENIED_TITLE,
                    e.to_string(),
                    e.is_reportable(),
                ));
                EndorseOutcome::Failed(e)
            }
        }
    }

    fn set_endorsed(&self, game_id: &str, mod_key: &str, status: EndorsedStatus) {
        self.host.dispatch(Intent::SetModAttributes {
            game_id: game_id.to_string(),
            mod_id: mod_key.to_string(),
            patch: AttributePatch::endorsed(status),
        });
    }

    pub fn on_api_key_changed(&self, key: Option<String>) -> Option<JoinHandle<()>> {
        self.auth.on_api_key_changed(key)
    }

    pub async fn on_check_mods_version(
        &self,
        game_id: &str,
        mods: &[ModRecord],
    ) -> VersionCheckOutcome {
        self.refresh.check_mods_version(game_id, mods).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::GameDescriptor;
    use crate::mods::GameMods;
    use crate::nexus::{MockNexusService, RemoteModInfo};
    use crate::state::{MemoryHost, MemoryState, MockProtocolRegistrar};

    fn record(id: &str, mod_id: i64) -> ModRecord {
        let mut record = ModRecord::new(id);
        record.attributes.mod_id = Some(mod_id);
        record
    }

    fn table(records: Vec<ModRecord>) -> ModTable {
        let mods: GameMods = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        ModTable::from([("skyrimse".to_string(), Arc::new(mods))])
    }

    fn host(key: Option<&str>, mods: ModTable) -> MemoryHost {
        MemoryHost::new(MemoryState {
            active_game: Some("skyrimse".into()),
            games: vec![GameDescriptor::new("skyrimse")],
            api_key: key.map(ToOwned::to_owned),
            mods,
            ..MemoryState::default()
        })
    }

    fn controller(
        host: &MemoryHost,
        service: MockNexusService,
        registrar: MockProtocolRegistrar,
    ) -> NexusController {
        NexusController::new(
            Arc::new(host.clone()),
            Arc::new(service),
            Arc::new(registrar),
            ControllerOptions {
                refresh: RefreshOptions {
                    requests_per_second: 100,
                    ..RefreshOptions::default()
                },
                ..ControllerOptions::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_refreshes_once() {
        let host = host(Some("key"), table(vec![record("a", 1)]));
        let mut service = MockNexusService::new();
        service
            .expect_retrieve_mod_info()
            .withf(|_: &str, record: &ModRecord| record.attributes.mod_id == Some(3))
            .times(1)
            .returning(|_, _| {
                Ok(Some(RemoteModInfo {
                    author: Some("someone".into()),
                    ..RemoteModInfo::default()
                }))
            });

        let controller = controller(&host, service, MockProtocolRegistrar::new());
        for mod_id in [2, 3] {
            let snapshot = table(vec![record("a", mod_id)]);
            host.state().mods = snapshot.clone();
            controller.on_mods_changed(snapshot);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        tokio::time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(
            host.mod_table()["skyrimse"]["a"].attributes.author.as_deref(),
            Some("someone")
        );
    }

    #[test]
    fn test_association_registers_or_deregisters() {
        let mut registrar = MockProtocolRegistrar::new();
        registrar
            .expect_register()
            .withf(|make_default| *make_default)
            .times(1)
            .returning(|_| Ok(()));
        registrar
            .expect_deregister()
            .withf(|scheme: &str| scheme == "nxm")
            .times(1)
            .returning(|_| Ok(()));

        let host = host(None, ModTable::new());
        let controller = controller(&host, MockNexusService::new(), registrar);
        controller.on_change_nxm_association(false, true).unwrap();
        controller.on_change_nxm_association(true, false).unwrap();
    }

    #[test]
    fn test_open_mod_page_uses_page_override() {
        let host = host(None, ModTable::new());
        host.state().games = vec![GameDescriptor::new("enderal").with_page_id("enderal")];
        let controller = controller(&host, MockNexusService::new(), MockProtocolRegistrar::new());

        let url = controller.on_open_mod_page("skyrimvr", "42");
        assert_eq!(url, "https://www.nexusmods.com/skyrimspecialedition/mods/42");
        let url = controller.on_open_mod_page("Enderal", "7");
        assert_eq!(url, "https://www.nexusmods.com/enderal/mods/7");
        assert_eq!(host.state().opened_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_endorse_without_key_is_denied() {
        let host = host(None, table(vec![record("a", 1)]));
        let mut service = MockNexusService::new();
        service.expect_endorse_mod().never();

        let controller = controller(&host, service, MockProtocolRegistrar::new());
        let outcome = controller.on_endorse_mod("skyrimse", "a", true).await;

        assert!(matches!(outcome, EndorseOutcome::Denied));
        let state = host.state();
        assert_eq!(state.notifications[0].title, ENDORSE_DENIED_TITLE);
        assert_eq!(state.notifications[0].detail, "You are not logged in to Nexus Mods!");
        assert!(!state.notifications[0].allow_report);
    }

    #[tokio::test]
    async fn test_endorse_stores_returned_status() {
        let host = host(Some("key"), table(vec![record("a", 12)]));
        let mut service = MockNexusService::new();
        let observer = host.clone();
        service
            .expect_endorse_mod()
            .withf(|domain: &str, mod_id: &i64, endorse: &bool| {
                domain == "skyrimspecialedition" && *mod_id == 12 && *endorse
            })
            .times(1)
            .returning(move |_, _, _| {
                assert_eq!(
                    observer.mod_table()["skyrimse"]["a"].attributes.endorsed,
                    Some(EndorsedStatus::Pending)
                );
                Ok(EndorsedStatus::Endorsed)
            });

        let controller = controller(&host, service, MockProtocolRegistrar::new());
        let outcome = controller.on_endorse_mod("skyrimse", "a", true).await;

        assert!(matches!(outcome, EndorseOutcome::Updated(EndorsedStatus::Endorsed)));
        assert_eq!(
            host.mod_table()["skyrimse"]["a"].attributes.endorsed,
            Some(EndorsedStatus::Endorsed)
        );
    }

    #[tokio::test]
    async fn test_failed_endorse_restores_previous_status() {
        let mut endorsed = record("a", 12);
        endorsed.attributes.endorsed = Some(EndorsedStatus::Abstained);
        let host = host(Some("key"), table(vec![endorsed]));
        let mut service = MockNexusService::new();
        service
            .expect_endorse_mod()
            .returning(|_, _, _| Err(NexusError::Other("too soon".into())));

        let controller = controller(&host, service, MockProtocolRegistrar::new());
        let outcome = controller.on_endorse_mod("skyrimse", "a", true).await;

        assert!(matches!(outcome, EndorseOutcome::Failed(_)));
        let state = host.state();
        assert_eq!(
            state.mods["skyrimse"]["a"].attributes.endorsed,
            Some(EndorsedStatus::Abstained)
        );
        assert!(state.notifications[0].allow_report);
    }

    #[tokio::test]
    async fn test_issues_and_feedback_are_forwarded() {
        let host = host(Some("key"), ModTable::new());
        let mut service = MockNexusService::new();
        service
            .expect_get_own_issues()
            .times(1)
            .returning(|| Err(NexusError::Auth("expired".into())));
        service
            .expect_submit_feedback()
            .withf(|feedback: &Feedback| feedback.title == "crash" && feedback.anonymous)
            .times(1)
            .returning(|_| {
                Ok(FeedbackResponse {
                    issue_id: Some(9),
                    issue_url: None,
                })
            });

        let controller = controller(&host, service, MockProtocolRegistrar::new());
        assert!(matches!(
            controller.on_request_own_issues().await,
            Err(NexusError::Auth(_))
        ));

        let response = controller
            .on_submit_feedback(Feedback {
                title: "crash".into(),
                message: "it broke".into(),
                anonymous: true,
                ..Feedback::default()
            })
            .await
            .unwrap();
        assert_eq!(response.issue_id, Some(9));
    }
}
