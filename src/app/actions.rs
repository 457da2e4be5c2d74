//! CLI command action handlers

use super::App;
use crate::config::Config;
use crate::controller::{EndorseOutcome, RequestOutcome, VersionCheckOutcome};
use crate::mods::{ModRecord, ModTable};
use crate::nexus::{
    catalog_id_for, convert_game_id_reverse, nexus_game_id, to_nxm_id, Feedback, NxmUrl,
};
use crate::state::Host;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;

/// Fields accepted by `mod add`
#[derive(Debug, Default)]
pub struct ModFields {
    pub mod_id: Option<i64>,
    pub file_id: Option<i64>,
    pub download_game: Option<String>,
    pub version: Option<String>,
}

fn sorted_mods(app: &App, game_id: &str) -> Vec<ModRecord> {
    let mut mods: Vec<ModRecord> = app
        .host
        .mod_table()
        .get(game_id)
        .map(|mods| mods.values().cloned().collect())
        .unwrap_or_default();
    mods.sort_by(|a, b| a.id.cmp(&b.id));
    mods
}

impl App {
    // ========== Status ==========

    pub async fn cmd_status(&self) -> Result<()> {
        let config = self.config.read().await;

        println!("ModSync Status");
        println!("{:-<40}", "");

        match self.host.active_game_id() {
            Some(game) => {
                let descriptor = self.host.game_or_default(&game);
                println!("Game:      {} ({})", descriptor.name, descriptor.id);
                println!("Mods:      {}", sorted_mods(self, &game).len());
                if self.host.is_updating(&game) {
                    println!("           update check running");
                }
            }
            None => println!("Game:      None selected"),
        }

        match config.api_key() {
            Some(_) => println!("API key:   configured"),
            None => println!("API key:   not set (run 'modsync login <key>')"),
        }
        if let Some(user) = self.host.user_info() {
            let tier = if user.is_premium {
                "premium"
            } else if user.is_supporter {
                "supporter"
            } else {
                "member"
            };
            println!("User:      {} ({})", user.name, tier);
        }

        println!("Downloads: {}", self.host.downloads().len());
        println!("Data dir:  {}", config.paths.data_dir().display());
        println!("nxm links: {}", if config.nexus.associate_nxm { "handled" } else { "not handled" });
        Ok(())
    }

    // ========== Game Commands ==========

    pub async fn cmd_game_list(&self) -> Result<()> {
        let active = self.host.active_game_id();

        println!("Known Games:");
        println!("{:-<60}", "");
        for game in self.host.registry().all() {
            let marker = if active.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&game.id)) {
                " [active]"
            } else {
                ""
            };
            let domain = nexus_game_id(Some(game)).unwrap_or_else(|| game.id.clone());
            println!("  {} ({}){}\n    Nexus: {}", game.name, game.id, marker, domain);
        }
        Ok(())
    }

    pub async fn cmd_game_select(&self, game_id: &str) -> Result<()> {
        let Some(game) = self.host.registry().get(game_id).cloned() else {
            bail!(
                "Game '{}' not found. Run 'modsync game list' to see available games.",
                game_id
            );
        };

        {
            let mut config = self.config.write().await;
            config.active_game = Some(game.id.clone());
            config.save().await?;
        }
        self.host.set_active_game(Some(game.id.clone()));

        println!("Selected: {} ({})", game.name, game.id);
        Ok(())
    }

    /// Show how a game id translates to the ids Nexus Mods uses
    pub async fn cmd_game_ids(&self, game_id: &str) -> Result<()> {
        let descriptor = self.host.game_or_default(game_id);
        let domain = nexus_game_id(Some(&descriptor)).unwrap_or_else(|| game_id.to_string());

        println!("Game:        {}", descriptor.id);
        println!("Catalog id:  {}", domain);
        println!("Download id: {}", catalog_id_for(&descriptor.id));
        println!("nxm id:      {}", to_nxm_id(&descriptor.id));
        if let Some(reverse) = convert_game_id_reverse(Some(&domain)) {
            let note = if reverse.reliable { "" } else { " (ambiguous)" };
            println!("Reverse:     {}{}", reverse.id, note);
        }
        Ok(())
    }

    // ========== Mod Commands ==========

    pub async fn cmd_mod_list(&self, game: Option<&str>) -> Result<()> {
        let game_id = self.resolve_game(game).await?;
        let mods = sorted_mods(self, &game_id);

        if mods.is_empty() {
            println!("No mods recorded for {}.", game_id);
            return Ok(());
        }

        println!("Mods for {}:", game_id);
        println!("{:-<80}", "");
        for record in &mods {
            let attrs = &record.attributes;
            let name = attrs.mod_name.as_deref().unwrap_or(&record.id);
            let version = attrs.version.as_deref().unwrap_or("-");
            let update = match (&attrs.version, &attrs.newest_version) {
                (Some(v), Some(newest)) if v != newest => format!(" -> {}", newest),
                _ => String::new(),
            };
            let remote = attrs
                .mod_id
                .map(|id| format!("#{}", id))
                .unwrap_or_else(|| "local".to_string());
            let endorsed = attrs.endorsed.map(|e| e.as_str()).unwrap_or("-");

            println!(
                "  {:<30} {:<10} {}{}  [{}]",
                name, remote, version, update, endorsed
            );
            if name != record.id {
                println!("    id: {}", record.id);
            }
        }
        Ok(())
    }

    /// Record an installed mod and fetch its metadata
    pub async fn cmd_mod_add(&self, game_id: &str, name: &str, fields: ModFields) -> Result<()> {
        let mut record = self
            .db
            .get_mod(game_id, name)?
            .unwrap_or_else(|| ModRecord::new(name));

        let attrs = &mut record.attributes;
        if fields.mod_id.is_some() {
            attrs.mod_id = fields.mod_id;
        }
        if fields.file_id.is_some() {
            attrs.file_id = fields.file_id;
        }
        if let Some(download_game) = fields.download_game {
            attrs.download_game = Some(download_game);
        }
        if let Some(version) = fields.version {
            attrs.version = Some(version);
        }

        self.db.upsert_mod(game_id, &record)?;
        println!("Recorded {} for {}", name, game_id);

        if let Some(snapshot) = self.host.reload_mods()? {
            let report = self.controller.refresh().on_mods_changed(snapshot).await;
            for (key, err) in &report.failed {
                println!("  Could not fetch details for {}: {}", key, err);
            }
            if report.refreshed.iter().any(|k| k == name) {
                println!("  Fetched details from Nexus Mods");
            }
        }
        Ok(())
    }

    pub async fn cmd_mod_remove(&self, game_id: &str, name: &str) -> Result<()> {
        if !self.db.delete_mod(game_id, name)? {
            bail!("Mod '{}' not found for {}", name, game_id);
        }
        self.host.reload_mods()?;
        println!("Removed {} from {}", name, game_id);
        Ok(())
    }

    // ========== Account ==========

    pub async fn cmd_login(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            bail!("API key cannot be empty");
        }

        {
            let mut config = self.config.write().await;
            config.nexus_api_key = Some(key.to_string());
            config.save().await?;
        }
        self.host.set_api_key(Some(key.to_string()));

        if let Some(handle) = self.controller.on_api_key_changed(Some(key.to_string())) {
            handle.await.context("Key validation task failed")?;
        }

        match self.host.user_info() {
            Some(user) => println!("Logged in as {}", user.name),
            None => println!("API key saved, but it could not be validated."),
        }
        Ok(())
    }

    pub async fn cmd_logout(&self) -> Result<()> {
        {
            let mut config = self.config.write().await;
            config.nexus_api_key = None;
            config.save().await?;
        }
        self.host.set_api_key(None);
        let _ = self.controller.on_api_key_changed(None);
        println!("API key removed");
        Ok(())
    }

    // ========== Nexus Commands ==========

    pub async fn cmd_check(&self, game: Option<&str>) -> Result<()> {
        let game_id = self.resolve_game(game).await?;
        let mods = sorted_mods(self, &game_id);
        if mods.is_empty() {
            println!("No mods recorded for {}.", game_id);
            return Ok(());
        }

        println!("Checking {} mod(s) for updates...", mods.len());
        match self.controller.on_check_mods_version(&game_id, &mods).await {
            VersionCheckOutcome::Denied => return Ok(()),
            VersionCheckOutcome::Failed(e) => bail!("Update check failed: {}", e),
            VersionCheckOutcome::Checked { errors } => {
                if !errors.is_empty() {
                    println!("{} mod(s) could not be checked", errors.len());
                }
            }
        }

        let updates: Vec<ModRecord> = sorted_mods(self, &game_id)
            .into_iter()
            .filter(|m| match (&m.attributes.version, &m.attributes.newest_version) {
                (Some(v), Some(newest)) => v != newest,
                _ => false,
            })
            .collect();

        if updates.is_empty() {
            println!("All mods are up to date.");
        } else {
            println!("Updates available:");
            for record in updates {
                let attrs = &record.attributes;
                println!(
                    "  {}: {} -> {}",
                    attrs.mod_name.as_deref().unwrap_or(&record.id),
                    attrs.version.as_deref().unwrap_or("-"),
                    attrs.newest_version.as_deref().unwrap_or("-")
                );
            }
        }
        Ok(())
    }

    pub async fn cmd_download(&self, game_id: &str, mod_id: i64, file_id: i64) -> Result<()> {
        self.ensure_session().await?;
        let outcome = self.controller.on_mod_update(game_id, mod_id, file_id).await;
        self.report_request(outcome).await
    }

    /// Handle a link passed in by the desktop or the user
    pub async fn cmd_nxm(&self, url: &str) -> Result<()> {
        let link = NxmUrl::parse(url)?;
        self.ensure_session().await?;
        let outcome = self.controller.on_nxm_link(link).await;
        self.report_request(outcome).await
    }

    async fn report_request(&self, outcome: RequestOutcome) -> Result<()> {
        self.progress.finish_and_clear();
        self.drain_events().await;

        match outcome {
            RequestOutcome::OpenedModPage(url) => {
                println!("Direct downloads need a premium account. Opened {}", url);
            }
            RequestOutcome::InstallExisting(id) => println!("Already downloaded as {}", id),
            RequestOutcome::Started(id) => println!("Downloaded {}", id),
            RequestOutcome::Ignored => println!("Nexus Mods returned a web page, nothing downloaded"),
            RequestOutcome::AlreadyInProgress => println!("That file is already downloading"),
            RequestOutcome::Failed(e) => bail!("Download failed: {}", e),
        }
        Ok(())
    }

    /// Poll the database and refresh mods whose Nexus identity changed
    pub async fn cmd_watch(&self) -> Result<()> {
        let interval = self.config.read().await.nexus.poll_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        println!("Watching for mod changes (Ctrl+C to stop)...");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    match self.poll_changes().await {
                        Ok(Some(snapshot)) => self.controller.on_mods_changed(snapshot),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Failed to reload state: {}", e),
                    }
                    self.drain_events().await;
                }
            }
        }
        println!("Stopped");
        Ok(())
    }

    /// Re-read the active game from the config file and the mods from the
    /// database. Returns a snapshot to refresh against when either changed.
    pub(crate) async fn poll_changes(&self) -> Result<Option<ModTable>> {
        let game_changed = self.reload_active_game().await?;
        Ok(match self.host.reload_mods()? {
            Some(snapshot) => Some(snapshot),
            None if game_changed => Some(self.host.mod_table()),
            None => None,
        })
    }

    async fn reload_active_game(&self) -> Result<bool> {
        let paths = self.config.read().await.paths.clone();
        let stored = Config::load_with(paths).await?.active_game;
        let current = self.host.active_game_id();
        if stored == current {
            return Ok(false);
        }

        tracing::info!("Active game changed from {:?} to {:?}", current, stored);
        self.config.write().await.active_game = stored.clone();
        self.host.set_active_game(stored);
        Ok(true)
    }

    pub async fn cmd_endorse(&self, name: &str, abstain: bool) -> Result<()> {
        let game_id = self.resolve_game(None).await?;
        match self.controller.on_endorse_mod(&game_id, name, !abstain).await {
            EndorseOutcome::Denied => {}
            EndorseOutcome::Updated(status) => println!("{}: {}", name, status.as_str()),
            EndorseOutcome::Failed(e) => bail!("Endorsing {} failed: {}", name, e),
        }
        Ok(())
    }

    pub async fn cmd_open(&self, game_id: &str, mod_id: &str) -> Result<()> {
        let url = self.controller.on_open_mod_page(game_id, mod_id);
        println!("{}", url);
        Ok(())
    }

    pub async fn cmd_issues(&self) -> Result<()> {
        let issues = self
            .controller
            .on_request_own_issues()
            .await
            .context("Failed to fetch issues")?;

        if issues.is_empty() {
            println!("No reported issues.");
            return Ok(());
        }

        println!("Your Issues:");
        println!("{:-<60}", "");
        for issue in issues {
            println!(
                "  #{} [{}] {} ({} comment(s))",
                issue.id, issue.state, issue.title, issue.comment_count
            );
            if let Some(url) = issue.issue_url {
                println!("    {}", url);
            }
        }
        Ok(())
    }

    pub async fn cmd_feedback(
        &self,
        title: &str,
        message: &str,
        files: Vec<PathBuf>,
        hash: Option<String>,
        anonymous: bool,
    ) -> Result<()> {
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            bail!("Attachment not found: {}", missing.display());
        }

        let feedback = Feedback {
            title: title.to_string(),
            message: message.to_string(),
            hash,
            files,
            anonymous,
        };
        let response = self
            .controller
            .on_submit_feedback(feedback)
            .await
            .context("Failed to submit feedback")?;

        match (response.issue_id, response.issue_url) {
            (_, Some(url)) => println!("Feedback submitted: {}", url),
            (Some(id), None) => println!("Feedback submitted as issue #{}", id),
            (None, None) => println!("Feedback submitted"),
        }
        Ok(())
    }

    pub async fn cmd_associate(&self, enable: bool) -> Result<()> {
        let mut config = self.config.write().await;
        let old = config.nexus.associate_nxm;

        self.controller.on_change_nxm_association(old, enable)?;

        config.nexus.associate_nxm = enable;
        config.save().await?;

        if enable {
            println!("modsync now handles nxm:// links");
        } else {
            println!("modsync no longer handles nxm:// links");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use tempfile::TempDir;

    async fn app(dir: &TempDir) -> App {
        let mut config = Config::default();
        config.paths = Paths::with_root(dir.path());
        App::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_game_select_persists() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        app.cmd_game_select("SkyrimSE").await.unwrap();
        assert_eq!(app.host.active_game_id().as_deref(), Some("skyrimse"));
        assert_eq!(app.resolve_game(None).await.unwrap(), "skyrimse");

        let paths = Paths::with_root(dir.path());
        let stored = Config::load_with(paths).await.unwrap();
        assert_eq!(stored.active_game.as_deref(), Some("skyrimse"));

        assert!(app.cmd_game_select("nosuchgame").await.is_err());
    }

    #[tokio::test]
    async fn test_mod_add_merges_and_remove_deletes() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        // no mod id and no key, so nothing goes to the network
        app.cmd_mod_add(
            "skyrimse",
            "skyui",
            ModFields {
                version: Some("5.1".into()),
                ..ModFields::default()
            },
        )
        .await
        .unwrap();
        app.cmd_mod_add(
            "skyrimse",
            "skyui",
            ModFields {
                file_id: Some(35407),
                ..ModFields::default()
            },
        )
        .await
        .unwrap();

        let stored = app.db.get_mod("skyrimse", "skyui").unwrap().unwrap();
        assert_eq!(stored.attributes.version.as_deref(), Some("5.1"));
        assert_eq!(stored.attributes.file_id, Some(35407));
        assert_eq!(sorted_mods(&app, "skyrimse").len(), 1);

        app.cmd_mod_remove("skyrimse", "skyui").await.unwrap();
        assert!(sorted_mods(&app, "skyrimse").is_empty());
        assert!(app.cmd_mod_remove("skyrimse", "skyui").await.is_err());
    }

    #[tokio::test]
    async fn test_logout_clears_key() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        app.host.set_api_key(Some("abc".into()));

        app.cmd_logout().await.unwrap();
        assert_eq!(app.host.api_key(), None);
        assert!(app.config.read().await.nexus_api_key.is_none());
    }

    #[tokio::test]
    async fn test_poll_picks_up_game_selected_elsewhere() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        app.db.upsert_mod("fallout4", &ModRecord::new("f4se")).unwrap();
        assert!(app.poll_changes().await.unwrap().is_some());
        assert!(app.poll_changes().await.unwrap().is_none());

        // another process selects a game
        let mut other = Config::load_with(Paths::with_root(dir.path())).await.unwrap();
        other.active_game = Some("fallout4".into());
        other.save().await.unwrap();

        let snapshot = app.poll_changes().await.unwrap().unwrap();
        assert!(snapshot.contains_key("fallout4"));
        assert_eq!(app.host.active_game_id().as_deref(), Some("fallout4"));
        assert_eq!(app.config.read().await.active_game.as_deref(), Some("fallout4"));
        assert!(app.poll_changes().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nxm_rejects_malformed_links() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        assert!(app.cmd_nxm("https://example.com/file").await.is_err());
    }
}
