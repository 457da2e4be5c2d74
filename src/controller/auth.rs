//! Credential and account-tier checks

use crate::nexus::NexusService;
use crate::state::{Host, Intent, Notification};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Answers whether the current session may perform an action.
///
/// Denials are surfaced as notifications that are never offered for bug
/// reports, and always before any request goes out.
#[derive(Clone)]
pub struct AuthGate {
    host: Arc<dyn Host>,
    service: Arc<dyn NexusService>,
}

impl AuthGate {
    pub fn new(host: Arc<dyn Host>, service: Arc<dyn NexusService>) -> Self {
        Self { host, service }
    }

    /// A non-empty API key is configured
    pub fn has_credential(&self) -> bool {
        self.host
            .api_key()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    /// The validated session is premium or supporter
    pub fn has_elevated_access(&self) -> bool {
        self.host
            .user_info()
            .map(|info| info.is_premium || info.is_supporter)
            .unwrap_or(false)
    }

    /// Check for a credential, notifying the user under `title` if there is none
    pub fn require_credential(&self, title: &str) -> bool {
        if self.has_credential() {
            return true;
        }
        tracing::info!("{}: no API key configured", title);
        self.host.notify(Notification::not_logged_in(title));
        false
    }

    /// Drop the current session, hand the new key to the service and, if there
    /// is one, validate it in the background.
    pub fn on_api_key_changed(&self, key: Option<String>) -> Option<JoinHandle<()>> {
        let key = key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        self.host.dispatch(Intent::SetUserInfo(None));
        self.service.set_key(key.clone());

        let key = key?;
        let host = Arc::clone(&self.host);
        let service = Arc::clone(&self.service);

        Some(tokio::spawn(async move {
            match service.validate_key(&key).await {
                Ok(info) => {
                    let current = host.api_key();
                    if current.as_deref().map(str::trim) != Some(key.as_str()) {
                        tracing::debug!("API key changed during validation, dropping result");
                        return;
                    }
                    tracing::info!(
                        "Logged in to Nexus Mods as {} (premium: {}, supporter: {})",
                        info.name,
                        info.is_premium,
                        info.is_supporter
                    );
                    host.dispatch(Intent::SetUserInfo(Some(info)));
                }
                Err(e) => {
                    tracing::warn!("API key validation failed: {}", e);
                    host.notify(Notification::error(
                        "Failed to validate API key",
                        e.to_string(),
                        e.is_reportable(),
                    ));
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus::{MockNexusService, NexusError};
    use crate::state::{MemoryHost, MemoryState, UserInfo};

    fn user(premium: bool, supporter: bool) -> UserInfo {
        UserInfo {
            user_id: 1,
            name: "tester".into(),
            is_premium: premium,
            is_supporter: supporter,
            profile_url: None,
        }
    }

    fn gate(host: &MemoryHost, service: MockNexusService) -> AuthGate {
        AuthGate::new(Arc::new(host.clone()), Arc::new(service))
    }

    #[test]
    fn test_credential_and_tier() {
        let host = MemoryHost::new(MemoryState {
            api_key: Some("  ".into()),
            user_info: Some(user(false, true)),
            ..MemoryState::default()
        });
        let auth = gate(&host, MockNexusService::new());

        assert!(!auth.has_credential());
        assert!(auth.has_elevated_access());

        host.state().api_key = Some("key".into());
        host.state().user_info = Some(user(false, false));
        assert!(auth.has_credential());
        assert!(!auth.has_elevated_access());
    }

    #[test]
    fn test_require_credential_notifies() {
        let host = MemoryHost::default();
        let auth = gate(&host, MockNexusService::new());

        assert!(!auth.require_credential("An error occurred endorsing a mod"));
        let state = host.state();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.notifications[0].detail, "You are not logged in to Nexus Mods!");
        assert!(!state.notifications[0].allow_report);
    }

    #[tokio::test]
    async fn test_key_change_clears_session_before_validation() {
        let host = MemoryHost::new(MemoryState {
            api_key: Some("new-key".into()),
            user_info: Some(user(true, false)),
            ..MemoryState::default()
        });

        let mut service = MockNexusService::new();
        service
            .expect_set_key()
            .withf(|key| key.as_deref() == Some("new-key"))
            .times(1)
            .return_const(());
        let observer = host.clone();
        service
            .expect_validate_key()
            .withf(|key: &str| key == "new-key")
            .times(1)
            .returning(move |_| {
                assert_eq!(observer.state().user_info, None);
                Ok(user(false, true))
            });

        let auth = gate(&host, service);
        let handle = auth.on_api_key_changed(Some("new-key".into())).unwrap();
        handle.await.unwrap();

        let state = host.state();
        assert_eq!(state.intents[0], Intent::SetUserInfo(None));
        assert_eq!(state.user_info, Some(user(false, true)));
    }

    #[tokio::test]
    async fn test_empty_key_skips_validation() {
        for key in [None, Some(String::new()), Some("   ".to_string())] {
            let host = MemoryHost::new(MemoryState {
                user_info: Some(user(true, true)),
                ..MemoryState::default()
            });
            let mut service = MockNexusService::new();
            service
                .expect_set_key()
                .withf(|key| key.is_none())
                .times(1)
                .return_const(());
            service.expect_validate_key().never();

            let auth = gate(&host, service);
            assert!(auth.on_api_key_changed(key).is_none());
            assert_eq!(host.state().user_info, None);
        }
    }

    #[tokio::test]
    async fn test_validation_failure_is_notified() {
        let host = MemoryHost::new(MemoryState {
            api_key: Some("bad".into()),
            ..MemoryState::default()
        });
        let mut service = MockNexusService::new();
        service.expect_set_key().return_const(());
        service
            .expect_validate_key()
            .returning(|_| Err(NexusError::Auth("invalid key".into())));

        let auth = gate(&host, service);
        auth.on_api_key_changed(Some("bad".into()))
            .unwrap()
            .await
            .unwrap();

        let state = host.state();
        assert_eq!(state.user_info, None);
        assert_eq!(state.notifications.len(), 1);
        assert!(!state.notifications[0].allow_report);
    }

    #[tokio::test]
    async fn test_stale_validation_is_dropped() {
        let host = MemoryHost::new(MemoryState {
            api_key: Some("newer".into()),
            ..MemoryState::default()
        });
        let mut service = MockNexusService::new();
        service.expect_set_key().return_const(());
        service
            .expect_validate_key()
            .returning(|_| Ok(user(true, false)));

        let auth = gate(&host, service);
        auth.on_api_key_changed(Some("older".into()))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(host.state().user_info, None);
    }
}
