pub mod cli;
pub mod coaching;
pub mod error;
pub mod live;
pub mod llm_client;
pub mod realtime;
pub mod replay;
pub mod retry;
pub mod server;
pub mod settings;

use anyhow::{bail, Context, Result};
use cli::{CliArgs, Command};
use coaching::{CoachClient, CoachResponder};
use log::info;
use realtime::credentials::EphemeralKeyMinter;
use server::{ApiServer, ServerState};
use settings::AppSettings;
use std::path::PathBuf;
use std::sync::Arc;

fn settings_path(args: &CliArgs) -> Option<PathBuf> {
    args.config.clone().or_else(settings::default_settings_path)
}

fn load(args: &CliArgs) -> Result<AppSettings> {
    match settings_path(args) {
        Some(path) => settings::load_settings(&path),
        None => Ok(AppSettings::default()),
    }
}

fn coach_client(settings: &AppSettings) -> CoachClient {
    CoachClient::new(&settings.coaching.chat_url)
        .with_system_prompt(settings.coaching.system_prompt())
}

pub async fn run(args: CliArgs) -> Result<()> {
    match &args.command {
        Command::InitConfig { path } => {
            let path = path
                .clone()
                .or_else(|| settings_path(&args))
                .context("No config directory available, pass --path")?;
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            settings::write_settings(&path, &AppSettings::default())?;
            println!("{}", path.display());
        }
        Command::Serve { bind } => {
            let mut settings = load(&args)?;
            if let Some(bind) = bind {
                settings.server.bind = bind.clone();
            }
            let api_key = settings::api_key_from_env();
            if api_key.is_none() {
                log::warn!(
                    "{} is not set, key minting and chat will fail",
                    settings::API_KEY_ENV
                );
            }

            let mut server = ApiServer::new(&settings.server.bind);
            server
                .start(ServerState::from_settings(&settings, api_key))
                .await?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
            server.stop();
            server.join().await;
        }
        Command::MintKey => {
            let settings = load(&args)?;
            let realtime = &settings.realtime;
            let minter = EphemeralKeyMinter::new(
                &realtime.api_base,
                settings::api_key_from_env(),
                &realtime.model,
                &realtime.voice,
            );
            let key = minter.mint().await?;
            println!("{}", serde_json::to_string_pretty(&key)?);
        }
        Command::CoachTurn { text } => {
            let settings = load(&args)?;
            let reply = coach_client(&settings).respond(text, &[]).await?;
            println!("{}", reply.text);
        }
        Command::Replay { file } => {
            let settings = load(&args)?;
            let entries = replay::load_log(file)?;
            info!("Replaying {} entries from {}", entries.len(), file.display());

            let coach: Arc<dyn CoachResponder> = Arc::new(coach_client(&settings));
            let outcome = replay::run_replay(&entries, settings.session_config(), coach).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }
    Ok(())
}
