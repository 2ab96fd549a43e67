use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    store: StoreConfig,
    chat: ChatConfig,
    voice: VoiceConfig,
    #[serde(default)]
    admin: AdminConfig,
    #[serde(default)]
    display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct StoreConfig {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    anon_key: String,
    #[serde(default = "default_bucket")]
    knowledge_bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatConfig {
    base_url: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct VoiceConfig {
    token_url: String,
    #[serde(default = "default_room")]
    room: String,
    #[serde(default = "default_identity")]
    identity: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdminConfig {
    #[serde(default = "default_log_window")]
    log_window: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DisplayConfig {
    timezone: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            log_window: default_log_window(),
        }
    }
}

fn default_backend() -> String {
    "supabase".to_string()
}

fn default_bucket() -> String {
    "knowledge".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_room() -> String {
    "aura-voice-room".to_string()
}

fn default_identity() -> String {
    "aura-user".to_string()
}

fn default_log_window() -> usize {
    50
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    Memory,
}

impl StoreBackend {
    pub fn label(self) -> &'static str {
        match self {
            StoreBackend::Supabase => "supabase",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub store_url: String,
    pub store_key: String,
    pub knowledge_bucket: String,
    pub chat_url: String,
    pub request_timeout: Duration,
    pub token_url: String,
    pub voice_room: String,
    pub voice_identity: String,
    pub log_window: usize,
    pub timezone: Tz,
}

impl Config {
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;

        let store_backend = match config_file.store.backend.as_str() {
            "supabase" => StoreBackend::Supabase,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("Unknown store backend: {}", other),
        };

        if store_backend == StoreBackend::Supabase
            && (config_file.store.url.is_empty() || config_file.store.anon_key.is_empty())
        {
            anyhow::bail!("store.url and store.anon_key are required for the supabase backend");
        }

        let timezone = match config_file.display.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid display.timezone '{}': {}", name, e))?,
            None => system_timezone(),
        };

        if config_file.admin.log_window == 0 {
            anyhow::bail!("admin.log_window must be at least 1");
        }

        Ok(Self {
            store_backend,
            store_url: config_file.store.url.trim_end_matches('/').to_string(),
            store_key: config_file.store.anon_key,
            knowledge_bucket: config_file.store.knowledge_bucket,
            chat_url: config_file.chat.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config_file.chat.timeout),
            token_url: config_file.voice.token_url.trim_end_matches('/').to_string(),
            voice_room: config_file.voice.room,
            voice_identity: config_file.voice.identity,
            log_window: config_file.admin.log_window,
            timezone,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse_toml(&content)
    }

    pub fn load() -> Result<Self> {
        let path = std::env::var("AURA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_file(&path)
    }
}

fn system_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse().ok())
        .unwrap_or(Tz::UTC)
}
