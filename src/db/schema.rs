//! Table layout and row mapping

use crate::mods::{ModAttributes, ModRecord};
use crate::state::{DownloadRecord, DownloadState, NexusIds};
use rusqlite::types::Type;
use rusqlite::Row;

pub(super) const SCHEMA: &str = r#"
    -- Installed mods, attributes kept as JSON so unknown keys survive
    CREATE TABLE IF NOT EXISTS mods (
        game_id TEXT NOT NULL,
        mod_id TEXT NOT NULL,
        attributes TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL,
        PRIMARY KEY (game_id, mod_id)
    );

    -- Local downloads
    CREATE TABLE IF NOT EXISTS downloads (
        id TEXT PRIMARY KEY,
        game_id TEXT NOT NULL,
        file_name TEXT,
        state TEXT NOT NULL DEFAULT 'started',
        game_domain TEXT,
        nexus_mod_id INTEGER,
        nexus_file_id INTEGER,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_downloads_file ON downloads(nexus_file_id);
"#;

/// A row of the `mods` table
#[derive(Debug, Clone)]
pub struct StoredMod {
    pub game_id: String,
    pub record: ModRecord,
    pub updated_at: String,
}

impl StoredMod {
    /// Expects `game_id, mod_id, attributes, updated_at`
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let json: String = row.get(2)?;
        let attributes: ModAttributes = serde_json::from_str(&json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(Self {
            game_id: row.get(0)?,
            record: ModRecord {
                id: row.get(1)?,
                attributes,
            },
            updated_at: row.get(3)?,
        })
    }
}

/// Expects `id, game_id, file_name, state, game_domain, nexus_mod_id,
/// nexus_file_id, created_at`
pub fn download_from_row(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
    let state: String = row.get(3)?;
    let game_domain: Option<String> = row.get(4)?;
    let mod_id: Option<i64> = row.get(5)?;
    let file_id: Option<i64> = row.get(6)?;

    let nexus = match (game_domain, mod_id, file_id) {
        (Some(game_domain), Some(mod_id), Some(file_id)) => Some(NexusIds {
            game_domain,
            mod_id,
            file_id,
        }),
        _ => None,
    };

    Ok(DownloadRecord {
        id: row.get(0)?,
        game_id: row.get(1)?,
        file_name: row.get(2)?,
        state: state.parse().unwrap_or_else(|e| {
            tracing::warn!("{}, treating as started", e);
            DownloadState::Started
        }),
        nexus,
        created_at: row.get(7)?,
    })
}
