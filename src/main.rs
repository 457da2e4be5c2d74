use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use modsync::app::ModFields;
use modsync::config::Paths;
use modsync::{App, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modsync")]
#[command(
    author,
    version,
    about = "Keeps installed mods in sync with Nexus Mods"
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv); also logs to stderr
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current status
    Status,

    /// Manage games
    Game {
        #[command(subcommand)]
        action: GameCommands,
    },

    /// Manage recorded mods
    Mod {
        #[command(subcommand)]
        action: ModCommands,
    },

    /// Store and validate a Nexus Mods API key
    Login { key: String },

    /// Forget the stored API key
    Logout,

    /// Check the mods of a game for updates
    Check {
        /// Game ID (defaults to the active game)
        #[arg(long)]
        game: Option<String>,
    },

    /// Download a file, or open its mod page without premium access
    Download {
        game: String,
        mod_id: i64,
        file_id: i64,
    },

    /// Handle an nxm:// link
    Nxm { url: String },

    /// Refresh mod metadata whenever the recorded mods change
    Watch,

    /// Endorse a mod of the active game
    Endorse {
        name: String,
        /// Withdraw the endorsement instead
        #[arg(long)]
        abstain: bool,
    },

    /// Open the Nexus Mods page of a mod
    Open { game: String, mod_id: String },

    /// List issues you reported
    Issues,

    /// Send feedback
    Feedback {
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        /// Attach a file (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Hash used to group duplicate reports
        #[arg(long)]
        hash: Option<String>,
        #[arg(long)]
        anonymous: bool,
    },

    /// Handle nxm:// links with modsync
    Associate { state: Toggle },
}

#[derive(Subcommand)]
enum GameCommands {
    /// List known games
    List,
    /// Select active game
    Select { game_id: String },
    /// Show the Nexus ids of a game
    Ids { game_id: String },
}

#[derive(Subcommand)]
enum ModCommands {
    /// List recorded mods
    List {
        #[arg(long)]
        game: Option<String>,
    },
    /// Record an installed mod (or update its ids)
    Add {
        game: String,
        name: String,
        /// Nexus mod id
        #[arg(long)]
        mod_id: Option<i64>,
        /// Nexus file id
        #[arg(long)]
        file_id: Option<i64>,
        /// Game the file was downloaded for
        #[arg(long)]
        download_game: Option<String>,
        /// Installed version
        #[arg(long)]
        version: Option<String>,
    },
    /// Forget a mod
    Remove { game: String, name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn setup_logging(verbosity: u8, log_file: PathBuf) {
    let filter = match verbosity {
        0 => "modsync=info",
        1 => "modsync=debug",
        2 => "modsync=trace",
        _ => "trace",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .ok();
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Arc::new(file))
    });

    let stderr_layer = (verbosity > 0 || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = Paths::new();
    setup_logging(cli.verbose, paths.log_file());

    let config = Config::load_with(paths).await?;
    let app = App::new(config).await?;

    match cli.command {
        Commands::Status => {
            app.ensure_session().await?;
            app.cmd_status().await?
        }
        Commands::Game { action } => match action {
            GameCommands::List => app.cmd_game_list().await?,
            GameCommands::Select { game_id } => app.cmd_game_select(&game_id).await?,
            GameCommands::Ids { game_id } => app.cmd_game_ids(&game_id).await?,
        },
        Commands::Mod { action } => match action {
            ModCommands::List { game } => app.cmd_mod_list(game.as_deref()).await?,
            ModCommands::Add {
                game,
                name,
                mod_id,
                file_id,
                download_game,
                version,
            } => {
                let fields = ModFields {
                    mod_id,
                    file_id,
                    download_game,
                    version,
                };
                app.cmd_mod_add(&game, &name, fields).await?
            }
            ModCommands::Remove { game, name } => app.cmd_mod_remove(&game, &name).await?,
        },
        Commands::Login { key } => app.cmd_login(&key).await?,
        Commands::Logout => app.cmd_logout().await?,
        Commands::Check { game } => app.cmd_check(game.as_deref()).await?,
        Commands::Download {
            game,
            mod_id,
            file_id,
        } => app.cmd_download(&game, mod_id, file_id).await?,
        Commands::Nxm { url } => app.cmd_nxm(&url).await?,
        Commands::Watch => app.cmd_watch().await?,
        Commands::Endorse { name, abstain } => app.cmd_endorse(&name, abstain).await?,
        Commands::Open { game, mod_id } => app.cmd_open(&game, &mod_id).await?,
        Commands::Issues => app.cmd_issues().await?,
        Commands::Feedback {
            title,
            message,
            files,
            hash,
            anonymous,
        } => {
            app.cmd_feedback(&title, &message, files, hash, anonymous)
                .await?
        }
        Commands::Associate { state } => {
            app.cmd_associate(matches!(state, Toggle::On)).await?
        }
    }

    Ok(())
}
