//! Nexus Mods integration: id translation, links, the remote service

pub mod client;
mod error;
mod game_id;
mod nxm;
pub mod service;

pub use client::{NexusClient, ProgressCallback};
pub use error::NexusError;
pub use game_id::{
    catalog_id_for, convert_game_id_reverse, nexus_game_id, to_nxm_id, ReverseGameId,
};
pub use nxm::{NxmUrl, NXM_SCHEME};
pub use service::{
    Feedback, FeedbackResponse, Issue, ModUpdate, NexusService, RemoteModInfo, StartedDownload,
    VersionCheckReport,
};

#[cfg(test)]
pub use service::MockNexusService;

pub const NEXUS_WEB_BASE: &str = "https://www.nexusmods.com";

/// Website page of a mod
pub fn mod_page_url(game_domain: &str, mod_id: impl std::fmt::Display) -> String {
    [NEXUS_WEB_BASE, game_domain, "mods", &mod_id.to_string()].join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_page_url() {
        assert_eq!(
            mod_page_url("skyrimspecialedition", 12604),
            "https://www.nexusmods.com/skyrimspecialedition/mods/12604"
        );
    }
}
