use crate::coaching::coach_client::COACH_SYSTEM_PROMPT;
use crate::coaching::proactive::default_prompts;
use crate::coaching::SessionConfig;
use crate::realtime::credentials::{DEFAULT_REALTIME_API_BASE, DEFAULT_REALTIME_MODEL, DEFAULT_VOICE};
use crate::realtime::sideband::DEFAULT_SIDEBAND_URL;
use crate::realtime::signaling::SignalingClient;
use crate::realtime::transport::{
    AudioConstraints, RtcConfiguration, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_STUN_SERVER,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    /// Backend endpoint the client fetches its ephemeral key from.
    #[serde(default = "default_ephemeral_key_url")]
    pub ephemeral_key_url: String,
    /// Where SDP offers are posted.
    #[serde(default = "default_calls_url")]
    pub calls_url: String,
    /// Upstream API used by the backend to mint client secrets.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_sideband_url")]
    pub sideband_url: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ephemeral_key_url: default_ephemeral_key_url(),
            calls_url: default_calls_url(),
            api_base: default_api_base(),
            sideband_url: default_sideband_url(),
            model: default_realtime_model(),
            voice: default_voice(),
            ice_servers: default_ice_servers(),
            data_channel_label: default_data_channel_label(),
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CoachingSettings {
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_min_new_chars")]
    pub min_new_chars: usize,
    #[serde(default = "default_proactive_interval_secs")]
    pub proactive_interval_secs: u64,
    #[serde(default = "default_proactive_min_chars")]
    pub proactive_min_chars: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_prompts")]
    pub proactive_prompts: Vec<String>,
}

impl Default for CoachingSettings {
    fn default() -> Self {
        Self {
            session_duration_secs: default_session_duration_secs(),
            tick_ms: default_tick_ms(),
            debounce_ms: default_debounce_ms(),
            min_new_chars: default_min_new_chars(),
            proactive_interval_secs: default_proactive_interval_secs(),
            proactive_min_chars: default_proactive_min_chars(),
            history_window: default_history_window(),
            chat_url: default_chat_url(),
            system_prompt: None,
            proactive_prompts: default_prompts(),
        }
    }
}

impl CoachingSettings {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(COACH_SYSTEM_PROMPT)
    }
}

/// OpenAI-compatible chat completion provider behind `POST /chat`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    #[serde(default = "default_llm_provider")]
    pub provider_id: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider_id: default_llm_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub coaching: CoachingSettings,
    #[serde(default)]
    pub llm: LlmSettings,
}

impl AppSettings {
    /// Client-side negotiator: key from our backend, offer to the realtime service.
    pub fn signaling_client(&self) -> SignalingClient {
        SignalingClient::new(&self.realtime.ephemeral_key_url, &self.realtime.calls_url)
    }

    pub fn session_config(&self) -> SessionConfig {
        let coaching = &self.coaching;
        SessionConfig {
            budget: Duration::from_secs(coaching.session_duration_secs),
            tick: Duration::from_millis(coaching.tick_ms.max(1)),
            debounce: Duration::from_millis(coaching.debounce_ms),
            min_new_chars: coaching.min_new_chars,
            proactive_interval: Duration::from_secs(coaching.proactive_interval_secs.max(1)),
            proactive_min_chars: coaching.proactive_min_chars,
            proactive_prompts: coaching.proactive_prompts.clone(),
            proactive_seed: None,
            history_window: coaching.history_window,
            rtc: RtcConfiguration {
                ice_servers: self.realtime.ice_servers.clone(),
                data_channel_label: self.realtime.data_channel_label.clone(),
            },
            constraints: AudioConstraints {
                sample_rate: self.realtime.sample_rate,
                ..AudioConstraints::default()
            },
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_ephemeral_key_url() -> String {
    "http://127.0.0.1:3001/realtime/ephemeral-key".to_string()
}

fn default_calls_url() -> String {
    format!("{}/realtime/calls", DEFAULT_REALTIME_API_BASE)
}

fn default_api_base() -> String {
    DEFAULT_REALTIME_API_BASE.to_string()
}

fn default_sideband_url() -> String {
    DEFAULT_SIDEBAND_URL.to_string()
}

fn default_realtime_model() -> String {
    DEFAULT_REALTIME_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_STUN_SERVER.to_string()]
}

fn default_data_channel_label() -> String {
    DEFAULT_DATA_CHANNEL_LABEL.to_string()
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_session_duration_secs() -> u64 {
    5 * 60
}

fn default_tick_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_min_new_chars() -> usize {
    10
}

fn default_proactive_interval_secs() -> u64 {
    30
}

fn default_proactive_min_chars() -> usize {
    50
}

fn default_history_window() -> usize {
    4
}

fn default_chat_url() -> String {
    "http://127.0.0.1:3001/chat".to_string()
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_settings_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "micropitch").map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
}

/// The long-lived upstream API key. Never read from the settings file.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Load settings from `path`. A missing file yields defaults; a file that
/// fails to parse is reported and replaced by defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        info!("No settings at {}, using defaults", path.display());
        return Ok(AppSettings::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;

    match serde_json::from_str::<AppSettings>(&raw) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            warn!("Failed to parse settings {}: {}", path.display(), e);
            Ok(AppSettings::default())
        }
    }
}

pub fn write_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    Ok(())
}
