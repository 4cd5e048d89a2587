//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use hub_core::transport::{DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};
use hub_core::{LiveModelConfig, SessionConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEASER_POLL_SECS: u64 = 8;

/// Environment variables consulted for the API key, most specific first.
const API_KEY_ENV: &[&str] = &["STRATEGYHUB_API_KEY", "GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub preferred_input_device: Option<String>,
    pub live_model: String,
    pub voice_name: String,
    pub coach_instruction: String,
    pub teaser_poll_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            preferred_input_device: None,
            live_model: DEFAULT_LIVE_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            coach_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            teaser_poll_secs: DEFAULT_TEASER_POLL_SECS,
        }
    }
}

/// What `settings show` prints: everything except the key itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub preferred_input_device: Option<String>,
    pub live_model: String,
    pub voice_name: String,
    pub coach_instruction: String,
    pub teaser_poll_secs: u64,
    pub has_api_key: bool,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = normalize_optional(self.api_key.as_deref());
        self.preferred_input_device = normalize_optional(self.preferred_input_device.as_deref());
        self.live_model = normalize_or(&self.live_model, DEFAULT_LIVE_MODEL);
        self.voice_name = normalize_or(&self.voice_name, DEFAULT_VOICE);
        self.coach_instruction = normalize_or(&self.coach_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        self.teaser_poll_secs = self.teaser_poll_secs.clamp(1, 60);
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            preferred_input_device: self.preferred_input_device.clone(),
            live_model: self.live_model.clone(),
            voice_name: self.voice_name.clone(),
            coach_instruction: self.coach_instruction.clone(),
            teaser_poll_secs: self.teaser_poll_secs,
            has_api_key: self.resolve_api_key().is_some(),
        }
    }

    /// API key from the environment, falling back to the settings file.
    pub fn resolve_api_key(&self) -> Option<String> {
        API_KEY_ENV
            .iter()
            .find_map(|name| normalize_optional(std::env::var(name).ok().as_deref()))
            .or_else(|| self.api_key.clone())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            preferred_input_device: self.preferred_input_device.clone(),
            model: LiveModelConfig {
                model: self.live_model.clone(),
                voice_name: self.voice_name.clone(),
                system_instruction: self.coach_instruction.clone(),
            },
            ..SessionConfig::default()
        }
    }
}

fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn normalize_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("StrategyHub")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("strategyhub")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
