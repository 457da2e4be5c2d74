//! Application wiring for the CLI

mod actions;
mod host;
mod protocol;

pub use actions::ModFields;
pub use host::AppHost;
pub use protocol::DesktopRegistrar;

use crate::config::Config;
use crate::controller::{ControllerOptions, NexusController};
use crate::db::Database;
use crate::games::GameRegistry;
use crate::nexus::NexusClient;
use crate::state::{Host, HostEvent};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Main application struct that orchestrates all components
pub struct App {
    /// Application configuration
    pub config: Arc<RwLock<Config>>,

    /// Database connection
    pub db: Arc<Database>,

    /// Host state seen by the controller
    pub host: Arc<AppHost>,

    /// Nexus Mods API client
    pub nexus: Arc<NexusClient>,

    /// Nexus event handlers
    pub controller: NexusController,

    events: Mutex<mpsc::UnboundedReceiver<HostEvent>>,
    progress: ProgressBar,
}

impl App {
    /// Create a new App instance
    pub async fn new(config: Config) -> Result<Self> {
        config.ensure_dirs().context("Failed to create directories")?;

        let db = Database::open(&config.paths.database_file())
            .context("Failed to open database")?;
        let db = Arc::new(db);

        let registry = GameRegistry::new(&config.games);
        let api_key = config.api_key().map(ToOwned::to_owned);

        let (host, events) = AppHost::new(
            Arc::clone(&db),
            registry,
            config.active_game.clone(),
            api_key.clone(),
        )?;
        let host = Arc::new(host);

        let progress = ProgressBar::hidden();
        progress.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let nexus = {
            let bar = progress.clone();
            NexusClient::new(api_key, config.downloads_dir())?.with_progress(Arc::new(
                move |done: u64, total: u64| {
                    if bar.is_hidden() {
                        bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                    }
                    bar.set_length(total);
                    bar.set_position(done);
                },
            ))
        };
        let nexus = Arc::new(nexus);

        let registrar: Arc<dyn crate::state::ProtocolRegistrar> = Arc::new(DesktopRegistrar::new()?);
        let controller = NexusController::new(
            host.clone(),
            nexus.clone(),
            registrar,
            ControllerOptions::from(&config.nexus),
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            db,
            host,
            nexus,
            controller,
            events: Mutex::new(events),
            progress,
        })
    }

    /// Active game, or `explicit` if given
    pub async fn resolve_game(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(game) = explicit.map(str::trim).filter(|g| !g.is_empty()) {
            return Ok(game.to_string());
        }
        match self.host.active_game_id() {
            Some(game) => Ok(game),
            None => bail!("No game selected. Use 'modsync game select <id>' or pass --game."),
        }
    }

    /// Validate the stored API key so premium status is known
    pub async fn ensure_session(&self) -> Result<()> {
        if self.host.user_info().is_some() {
            return Ok(());
        }
        let key = self.host.api_key();
        if let Some(handle) = self.controller.on_api_key_changed(key) {
            handle.await.context("Key validation task failed")?;
        }
        Ok(())
    }

    /// Handle events raised since the last call
    pub(crate) async fn drain_events(&self) {
        let mut events = self.events.lock().await;
        while let Ok(event) = events.try_recv() {
            match event {
                HostEvent::StartInstallDownload { download_id } => {
                    tracing::info!("start-install-download {}", download_id);
                    println!("Ready to install download {}", download_id);
                }
            }
        }
    }
}
