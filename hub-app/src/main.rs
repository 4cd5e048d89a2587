//! Strategy Hub command-line entry point.
//!
//! `live` holds a voice conversation with the coach. The other subcommands
//! are one-shot media and advice requests.

mod commands;
mod live;
mod media;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use settings::{default_settings_path, load_settings};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "strategyhub", version, about = "Voice strategy coach and creator media tools")]
struct Cli {
    /// Settings file (defaults to the per-user app data directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Talk to the live strategy coach.
    Live {
        /// Input device name; overrides the saved preference.
        #[arg(long)]
        input_device: Option<String>,
    },
    /// List audio input and output devices.
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Generate a 16:9 thumbnail image.
    Thumbnail {
        prompt: String,
        /// Write the decoded PNG here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a short teaser video.
    Teaser { prompt: String },
    /// Ask the channel strategist a question.
    Advice {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Show or change saved settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    /// Print the settings file location.
    Path,
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        input_device: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        live_model: Option<String>,
        #[arg(long)]
        teaser_poll_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strategyhub=info,hub_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let app_settings = load_settings(&settings_path);
    info!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Command::Live { input_device } => commands::live(&app_settings, input_device).await,
        Command::Devices { json } => commands::devices(json),
        Command::Thumbnail { prompt, out } => commands::thumbnail(&app_settings, prompt, out).await,
        Command::Teaser { prompt } => commands::teaser(&app_settings, prompt).await,
        Command::Advice { message } => commands::advice(&app_settings, message.join(" ")).await,
        Command::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => commands::show_settings(&app_settings),
            SettingsAction::Path => {
                println!("{}", settings_path.display());
                Ok(())
            }
            SettingsAction::Set {
                api_key,
                input_device,
                voice,
                live_model,
                teaser_poll_secs,
            } => commands::update_settings(
                &settings_path,
                app_settings,
                commands::SettingsUpdate {
                    api_key,
                    input_device,
                    voice,
                    live_model,
                    teaser_poll_secs,
                },
            ),
        },
    }
}
