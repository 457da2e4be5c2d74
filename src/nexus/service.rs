//! The remote service seen by the controller

use super::{NexusError, NxmUrl};
use crate::mods::{AttributePatch, EndorsedStatus, ModRecord};
use crate::state::UserInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata of a mod as currently listed on Nexus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteModInfo {
    pub name: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub picture_url: Option<String>,
    pub endorsement: Option<EndorsedStatus>,
    pub updated_timestamp: Option<i64>,
}

impl RemoteModInfo {
    /// Attribute update carrying the fetched metadata.
    ///
    /// The remote version becomes `newest_version`; the installed `version`
    /// belongs to the install pipeline.
    pub fn into_patch(self) -> AttributePatch {
        AttributePatch {
            mod_name: self.name,
            author: self.author,
            short_description: self.summary,
            picture_url: self.picture_url,
            newest_version: self.version,
            endorsed: self.endorsement,
            last_update_time: self.updated_timestamp,
            ..AttributePatch::default()
        }
    }
}

/// Newest known version of one installed mod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModUpdate {
    /// Local mod id
    pub mod_key: String,
    pub newest_version: String,
}

/// Outcome of a version check. Per-mod failures end up in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCheckReport {
    pub updates: Vec<ModUpdate>,
    pub errors: Vec<String>,
}

/// A download the service has fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedDownload {
    pub id: String,
    pub file_name: Option<String>,
    pub path: Option<PathBuf>,
}

/// A bug report the user filed through the feedback form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub state: String,
    pub issue_url: Option<String>,
    pub comment_count: i64,
    pub last_update: Option<String>,
}

/// Feedback submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feedback {
    pub title: String,
    pub message: String,
    /// Hash used to group duplicate reports
    pub hash: Option<String>,
    /// Files attached to the report
    pub files: Vec<PathBuf>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub issue_id: Option<i64>,
    pub issue_url: Option<String>,
}

/// Nexus Mods operations the controller relies on.
///
/// `game_domain` is always a catalog id (see [`super::nexus_game_id`]).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NexusService: Send + Sync {
    /// Replace the credential used for subsequent calls
    fn set_key(&self, key: Option<String>);

    async fn validate_key(&self, key: &str) -> Result<UserInfo, NexusError>;

    /// Current metadata for `record`; `None` when it has no Nexus mod id
    async fn retrieve_mod_info(
        &self,
        game_domain: &str,
        record: &ModRecord,
    ) -> Result<Option<RemoteModInfo>, NexusError>;

    /// Check `mods` for newer versions, all looked up under `game_domain`.
    /// Failures other than auth and rate limiting become per-mod messages.
    async fn check_mod_versions(
        &self,
        game_domain: &str,
        mods: &[ModRecord],
    ) -> Result<VersionCheckReport, NexusError>;

    async fn start_download(&self, url: &NxmUrl) -> Result<StartedDownload, NexusError>;

    /// Endorse or abstain; returns the status Nexus now reports
    async fn endorse_mod(
        &self,
        game_domain: &str,
        mod_id: i64,
        endorse: bool,
    ) -> Result<EndorsedStatus, NexusError>;

    async fn get_own_issues(&self) -> Result<Vec<Issue>, NexusError>;

    async fn submit_feedback(&self, feedback: Feedback) -> Result<FeedbackResponse, NexusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_version_is_newest_not_installed() {
        let patch = RemoteModInfo {
            name: Some("SkyUI".into()),
            version: Some("5.2".into()),
            endorsement: Some(EndorsedStatus::Endorsed),
            ..RemoteModInfo::default()
        }
        .into_patch();

        assert_eq!(patch.mod_name.as_deref(), Some("SkyUI"));
        assert_eq!(patch.newest_version.as_deref(), Some("5.2"));
        assert_eq!(patch.version, None);
        assert_eq!(patch.endorsed, Some(EndorsedStatus::Endorsed));
    }
}
