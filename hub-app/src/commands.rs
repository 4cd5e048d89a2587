//! Subcommand handlers.
//!
//! Media requests use the blocking HTTP client, so they run on the blocking
//! pool rather than the async workers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use hub_core::audio::device::{self, DeviceInfo};
use tracing::info;

use crate::media::{self, MediaClient, ThumbnailAsset};
use crate::settings::{save_settings, AppSettings};

fn require_api_key(settings: &AppSettings) -> Result<String> {
    settings.resolve_api_key().ok_or_else(|| {
        anyhow!("no API key: set STRATEGYHUB_API_KEY or run `strategyhub settings set --api-key <KEY>`")
    })
}

/// Run `job` with a fresh client on the blocking pool. The blocking client
/// owns its own runtime and must be created and dropped off the async workers.
async fn with_client<T, F>(settings: &AppSettings, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&MediaClient) -> Result<T> + Send + 'static,
{
    let api_key = require_api_key(settings)?;
    let poll = Duration::from_secs(settings.teaser_poll_secs);
    tokio::task::spawn_blocking(move || job(&MediaClient::new(api_key, poll)?))
        .await
        .context("media task panicked")?
}

pub async fn live(settings: &AppSettings, input_device: Option<String>) -> Result<()> {
    let api_key = require_api_key(settings)?;
    let mut config = settings.session_config();
    if input_device.is_some() {
        config.preferred_input_device = input_device;
    }
    crate::live::run_live(config, api_key).await
}

pub fn devices(json: bool) -> Result<()> {
    let mut all: Vec<DeviceInfo> = device::list_input_devices();
    all.extend(device::list_output_devices());
    device::sort_for_display(&mut all);

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    if all.is_empty() {
        println!("no audio devices found");
    }
    for d in &all {
        let mut tags = Vec::new();
        if d.is_default {
            tags.push("default");
        }
        if d.is_loopback_like {
            tags.push("loopback?");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        println!("{:<6} {}{}", format!("{:?}", d.direction).to_lowercase(), d.name, tags);
    }
    Ok(())
}

pub async fn thumbnail(settings: &AppSettings, prompt: String, out: Option<PathBuf>) -> Result<()> {
    let asset = with_client(settings, move |client| client.generate_thumbnail(&prompt)).await?;
    if let Some(path) = out {
        save_image(&asset, &path)?;
        println!("saved {}", path.display());
    }
    print_asset(&asset)
}

pub async fn teaser(settings: &AppSettings, prompt: String) -> Result<()> {
    println!("generating teaser, this usually takes a minute or two…");
    let asset = with_client(settings, move |client| client.generate_teaser(&prompt)).await?;
    if asset.url.is_empty() {
        println!("the operation finished without a video");
    }
    print_asset(&asset)
}

pub async fn advice(settings: &AppSettings, message: String) -> Result<()> {
    let reply = with_client(settings, move |client| client.strategy_advice(&message)).await?;
    println!("{reply}");
    Ok(())
}

pub fn show_settings(settings: &AppSettings) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&settings.runtime_settings())?
    );
    Ok(())
}

/// Fields to overwrite; `None` leaves the stored value alone.
#[derive(Debug, Default)]
pub struct SettingsUpdate {
    pub api_key: Option<String>,
    pub input_device: Option<String>,
    pub voice: Option<String>,
    pub live_model: Option<String>,
    pub teaser_poll_secs: Option<u64>,
}

pub fn update_settings(path: &Path, mut settings: AppSettings, update: SettingsUpdate) -> Result<()> {
    apply_update(&mut settings, update);
    save_settings(path, &settings)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "settings saved");
    show_settings(&settings)
}

fn apply_update(settings: &mut AppSettings, update: SettingsUpdate) {
    if let Some(key) = update.api_key {
        settings.api_key = Some(key);
    }
    if let Some(device) = update.input_device {
        settings.preferred_input_device = Some(device);
    }
    if let Some(voice) = update.voice {
        settings.voice_name = voice;
    }
    if let Some(model) = update.live_model {
        settings.live_model = model;
    }
    if let Some(secs) = update.teaser_poll_secs {
        settings.teaser_poll_secs = secs;
    }
    settings.normalize();
}

fn save_image(asset: &ThumbnailAsset, path: &Path) -> Result<()> {
    let payload = media::data_url_payload(&asset.url)
        .ok_or_else(|| anyhow!("asset is not an inline image"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("image payload is not valid base64")?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn print_asset(asset: &ThumbnailAsset) -> Result<()> {
    let mut shown = asset.clone();
    // Inline images are megabytes of base64.
    if shown.url.starts_with("data:") {
        shown.url = format!("{}… ({} bytes)", &asset.url[..32.min(asset.url.len())], asset.url.len());
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
