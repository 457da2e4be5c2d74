//! Installed mod records as seen by the Nexus integration
//!
//! The mod table is owned by the host. This crate reads snapshots of it and
//! asks for changes through [`crate::state::Intent`], it never edits it in place.

mod diff;

pub use diff::{changed_mods, ChangedMods};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Mods of one game, keyed by local mod id
pub type GameMods = HashMap<String, ModRecord>;

/// Mods of every game the user has managed, keyed by game id.
///
/// Per-game tables sit behind an `Arc` so snapshots are cheap and an untouched
/// game keeps pointer identity across snapshots.
pub type ModTable = HashMap<String, Arc<GameMods>>;

/// An installed mod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModRecord {
    /// Local mod id (unique per game)
    pub id: String,
    pub attributes: ModAttributes,
}

impl ModRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: ModAttributes::default(),
        }
    }

    /// The pair that identifies the mod on Nexus
    pub fn remote_key(&self) -> (Option<i64>, Option<&str>) {
        (
            self.attributes.mod_id,
            self.attributes.download_game.as_deref(),
        )
    }
}

/// Mod attributes. Unknown keys written by other tools are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModAttributes {
    /// Nexus mod id
    pub mod_id: Option<i64>,
    /// Nexus file id of the installed archive
    pub file_id: Option<i64>,
    /// Game the file was downloaded for, may differ from the game it is installed in
    pub download_game: Option<String>,
    pub version: Option<String>,
    pub mod_name: Option<String>,
    pub author: Option<String>,
    pub short_description: Option<String>,
    pub picture_url: Option<String>,
    pub newest_version: Option<String>,
    pub endorsed: Option<EndorsedStatus>,
    pub last_update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Endorsement state of a mod for the current user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndorsedStatus {
    Undecided,
    Abstained,
    Endorsed,
    /// Local marker while a request is in flight
    Pending,
}

impl EndorsedStatus {
    pub fn from_api(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "endorsed" => EndorsedStatus::Endorsed,
            "abstained" => EndorsedStatus::Abstained,
            _ => EndorsedStatus::Undecided,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndorsedStatus::Undecided => "Undecided",
            EndorsedStatus::Abstained => "Abstained",
            EndorsedStatus::Endorsed => "Endorsed",
            EndorsedStatus::Pending => "Pending",
        }
    }
}

/// A partial attribute update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributePatch {
    pub mod_name: Option<String>,
    pub author: Option<String>,
    pub short_description: Option<String>,
    pub picture_url: Option<String>,
    pub version: Option<String>,
    pub newest_version: Option<String>,
    pub endorsed: Option<EndorsedStatus>,
    pub last_update_time: Option<i64>,
}

impl AttributePatch {
    pub fn endorsed(status: EndorsedStatus) -> Self {
        Self {
            endorsed: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, attributes: &mut ModAttributes) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *target = Some(value.clone());
            }
        }

        set(&mut attributes.mod_name, &self.mod_name);
        set(&mut attributes.author, &self.author);
        set(&mut attributes.short_description, &self.short_description);
        set(&mut attributes.picture_url, &self.picture_url);
        set(&mut attributes.version, &self.version);
        set(&mut attributes.newest_version, &self.newest_version);
        set(&mut attributes.endorsed, &self.endorsed);
        set(&mut attributes.last_update_time, &self.last_update_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_keep_unknown_keys() {
        let json = r#"{"modId": 12, "downloadGame": "skyrimse", "customFlag": true}"#;
        let attrs: ModAttributes = serde_json::from_str(json).unwrap();
        assert_eq!(attrs.mod_id, Some(12));
        assert_eq!(attrs.download_game.as_deref(), Some("skyrimse"));
        assert_eq!(attrs.extra.get("customFlag"), Some(&serde_json::json!(true)));

        let back = serde_json::to_value(&attrs).unwrap();
        assert_eq!(back["customFlag"], serde_json::json!(true));
        assert_eq!(back["modId"], serde_json::json!(12));
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut attrs = ModAttributes {
            version: Some("1.0".into()),
            author: Some("arthmoor".into()),
            ..ModAttributes::default()
        };
        let patch = AttributePatch {
            newest_version: Some("1.1".into()),
            ..AttributePatch::default()
        };
        patch.apply(&mut attrs);

        assert_eq!(attrs.version.as_deref(), Some("1.0"));
        assert_eq!(attrs.author.as_deref(), Some("arthmoor"));
        assert_eq!(attrs.newest_version.as_deref(), Some("1.1"));
        assert!(AttributePatch::default().is_empty());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_endorsed_from_api() {
        assert_eq!(EndorsedStatus::from_api("Endorsed"), EndorsedStatus::Endorsed);
        assert_eq!(EndorsedStatus::from_api("abstained"), EndorsedStatus::Abstained);
        assert_eq!(EndorsedStatus::from_api("whatever"), EndorsedStatus::Undecided);
    }
}
