mod config;
mod logging;
mod ports;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

use crate::{
    config::Config,
    logging::{init_tracing, shutdown_tracing},
    services::{
        library_sync::{FilesystemLayout, SyncError, SyncOrchestrator, SyncSummary},
        transliterate::RussianLatinTransliterator,
        users::{AddUserOutcome, UserRegistry},
        yandex::YandexMusicClient,
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, global = true, env = "MUSIC_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "music_sync=debug"
    #[arg(long, default_value = "warn", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP collector to export spans to
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mirror a registered user's favorites and playlists to disk
    Sync {
        /// Registry id of the user to sync
        #[arg(short, long)]
        user: u32,

        /// OAuth token for the music service
        #[arg(short, long, env = "YANDEX_MUSIC_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    #[command(subcommand)]
    Users(UsersCommands),
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum UsersCommands {
    /// List registered users
    List,
    /// Look a login up on the music service and register it
    Add {
        #[arg(short, long)]
        login: String,

        /// OAuth token for the music service
        #[arg(short, long, env = "YANDEX_MUSIC_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Remove a user by registry id
    Remove {
        #[arg(short, long)]
        id: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

fn resolve_token(flag: Option<String>, config: &Config) -> Result<String> {
    flag.or_else(|| config.token().map(str::to_string))
        .ok_or_else(|| {
            eyre!("No token given. Pass --token, set YANDEX_MUSIC_TOKEN or add `token` to the config file")
        })
}

fn print_summary(login: &str, summary: &SyncSummary) {
    println!("Sync for {}:", login);
    println!("  playlists processed: {}", summary.playlists_processed);
    println!("  playlists failed:    {}", summary.playlists_failed);
    println!("  tracks downloaded:   {}", summary.tracks_succeeded);
    println!("  tracks skipped:      {}", summary.tracks_skipped);
    println!("  tracks failed:       {}", summary.tracks_failed);
    println!("  tracks cancelled:    {}", summary.tracks_cancelled);
    println!("  title collisions:    {}", summary.title_collisions);
    for (bitrate, count) in &summary.downloaded_by_bitrate {
        println!("  at {}kbps:          {}", bitrate, count);
    }

    if !summary.failed_tracks.is_empty() {
        println!("Failed tracks:");
        for failed in &summary.failed_tracks {
            let target = failed
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| failed.track.clone());
            println!(
                "  [{}] {} / {}: {}",
                failed.kind, failed.playlist, target, failed.message
            );
        }
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Sync { user, token } => {
            let registry = UserRegistry::new(config.users_file());
            let identity = registry
                .get(user)?
                .ok_or_else(|| {
                    eyre!("No user with id {} in {}", user, registry.path().display())
                })?;

            let token = resolve_token(token, &config)?;
            let policy = config.download_policy()?;
            let orchestrator = SyncOrchestrator::new(
                Arc::new(YandexMusicClient::new(token)),
                Arc::new(RussianLatinTransliterator),
                FilesystemLayout::new(config.music_directory(), policy.codec),
                policy,
            );

            match orchestrator.sync_user(&identity).await {
                Ok(summary) => {
                    if summary.playlists_processed + summary.playlists_failed == 0 {
                        println!("No favorites or playlists found, or they are hidden");
                    }
                    print_summary(&identity.login, &summary);
                }
                Err(SyncError::Unauthorized { summary }) => {
                    print_summary(&identity.login, &summary);
                    return Err(eyre!("Token was rejected; check or renew it"));
                }
                Err(SyncError::UpstreamUnavailable(error)) if error.is_unauthorized() => {
                    return Err(error).wrap_err("Token was rejected; check or renew it");
                }
                Err(error) => {
                    return Err(error)
                        .wrap_err_with(|| format!("Sync for {} failed", identity.login));
                }
            }
        }
        Commands::Users(users_command) => {
            let registry = UserRegistry::new(config.users_file());
            match users_command {
                UsersCommands::List => {
                    let users = registry.list()?;
                    if users.is_empty() {
                        println!("No users registered");
                    }
                    for user in users {
                        println!(
                            "{}\t{}\t{}",
                            user.id.unwrap_or_default(),
                            user.login,
                            user.remote_uid
                        );
                    }
                }
                UsersCommands::Add { login, token } => {
                    let client = YandexMusicClient::new(resolve_token(token, &config)?);
                    let identity = client
                        .lookup_user(&login)
                        .await
                        .ok_or_else(|| eyre!("User {} was not found", login))?;
                    match registry.add(identity)? {
                        AddUserOutcome::Added(user) => {
                            println!("Added {} as id {}", user.login, user.id.unwrap_or_default())
                        }
                        AddUserOutcome::AlreadyPresent(user) => println!(
                            "{} is already registered as id {}",
                            user.login,
                            user.id.unwrap_or_default()
                        ),
                    }
                }
                UsersCommands::Remove { id } => {
                    if registry.remove(id)? {
                        println!("Removed user {}", id);
                    } else {
                        println!("No user with id {}", id);
                    }
                }
            }
        }
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider =
        init_tracing("music-sync", args.otlp_endpoint.as_deref(), &args.log_level)?;

    tracing::debug!("Loading configuration");
    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .wrap_err("Failed to load music-sync config")?;

    let result = run(args.command, config).await;
    shutdown_tracing(tracer_provider);
    result
}
