//! SQLite storage for the mod table and downloads

mod schema;

pub use schema::StoredMod;

use crate::mods::{AttributePatch, GameMods, ModAttributes, ModRecord, ModTable};
use crate::state::DownloadRecord;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use schema::download_from_row;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const DOWNLOAD_COLUMNS: &str =
    "id, game_id, file_name, state, game_domain, nexus_mod_id, nexus_file_id, created_at";

/// Database wrapper with thread-safe access
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(schema::SCHEMA)
            .context("Failed to initialize database schema")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Mod Operations ==========

    /// Insert or replace a mod
    pub fn upsert_mod(&self, game_id: &str, record: &ModRecord) -> Result<()> {
        let attributes = serde_json::to_string(&record.attributes)?;
        self.conn().execute(
            r#"
            INSERT INTO mods (game_id, mod_id, attributes, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(game_id, mod_id) DO UPDATE SET
                attributes = excluded.attributes,
                updated_at = excluded.updated_at
            "#,
            params![game_id, record.id, attributes],
        )?;
        Ok(())
    }

    /// Delete a mod; returns whether it existed
    pub fn delete_mod(&self, game_id: &str, mod_id: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM mods WHERE game_id = ?1 AND mod_id = ?2",
            params![game_id, mod_id],
        )?;
        Ok(removed > 0)
    }

    pub fn get_mod(&self, game_id: &str, mod_id: &str) -> Result<Option<ModRecord>> {
        self.conn()
            .query_row(
                "SELECT game_id, mod_id, attributes, updated_at FROM mods
                 WHERE game_id = ?1 AND mod_id = ?2",
                params![game_id, mod_id],
                StoredMod::from_row,
            )
            .optional()
            .map(|row| row.map(|m| m.record))
            .context("Failed to query mod")
    }

    /// All mods of a game, ordered by id
    pub fn get_mods_for_game(&self, game_id: &str) -> Result<Vec<ModRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT game_id, mod_id, attributes, updated_at FROM mods
             WHERE game_id = ?1 ORDER BY mod_id ASC",
        )?;

        let mods = stmt
            .query_map(params![game_id], StoredMod::from_row)?
            .map(|row| row.map(|m| m.record))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(mods)
    }

    /// Every stored mod, grouped by game
    pub fn load_mod_table(&self) -> Result<ModTable> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT game_id, mod_id, attributes, updated_at FROM mods")?;

        let mut games: HashMap<String, GameMods> = HashMap::new();
        for row in stmt.query_map([], StoredMod::from_row)? {
            let stored = row?;
            games
                .entry(stored.game_id)
                .or_default()
                .insert(stored.record.id.clone(), stored.record);
        }

        Ok(games
            .into_iter()
            .map(|(game, mods)| (game, Arc::new(mods)))
            .collect())
    }

    /// Merge `patch` into a mod's attributes; returns whether the mod exists
    pub fn update_mod_attributes(
        &self,
        game_id: &str,
        mod_id: &str,
        patch: &AttributePatch,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT attributes FROM mods WHERE game_id = ?1 AND mod_id = ?2",
                params![game_id, mod_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(false);
        };

        let mut attributes: ModAttributes = serde_json::from_str(&current)
            .with_context(|| format!("Corrupt attributes for {}/{}", game_id, mod_id))?;
        patch.apply(&mut attributes);

        tx.execute(
            "UPDATE mods SET attributes = ?1, updated_at = datetime('now')
             WHERE game_id = ?2 AND mod_id = ?3",
            params![serde_json::to_string(&attributes)?, game_id, mod_id],
        )?;
        tx.commit()?;

        Ok(true)
    }

    // ========== Download Operations ==========

    pub fn insert_download(&self, d: &DownloadRecord) -> Result<()> {
        let nexus = d.nexus.as_ref();
        self.conn().execute(
            r#"
            INSERT INTO downloads (id, game_id, file_name, state, game_domain,
                                   nexus_mod_id, nexus_file_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                d.id,
                d.game_id,
                d.file_name,
                d.state.as_str(),
                nexus.map(|n| n.game_domain.as_str()),
                nexus.map(|n| n.mod_id),
                nexus.map(|n| n.file_id),
                d.created_at,
            ],
        )?;
        Ok(())
    }

    /// All downloads, newest first
    pub fn get_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM downloads ORDER BY created_at DESC",
            DOWNLOAD_COLUMNS
        ))?;

        let downloads = stmt
            .query_map([], download_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(downloads)
    }

    pub fn find_download_by_file_id(&self, file_id: i64) -> Result<Option<DownloadRecord>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {} FROM downloads WHERE nexus_file_id = ?1 LIMIT 1",
                    DOWNLOAD_COLUMNS
                ),
                params![file_id],
                download_from_row,
            )
            .optional()
            .context("Failed to query download")
    }
}
