use std::path::{Path, PathBuf};

use anyhow::Context;
use ffmpeg_feed::StreamConfig;
use serde::Deserialize;
use twitch_chat::ChatConfig;

pub const CONFIG_ENV: &str = "TWITCH_STREAM_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "twitch-stream.json";

fn default_max_backlog() -> usize {
    30
}

fn default_tone_hz() -> f32 {
    440.0
}

fn default_tone_amplitude() -> f32 {
    0.5
}

fn default_greeting() -> Option<String> {
    Some("Taking requests!".into())
}

/// Caller-side production policy.
#[derive(Clone, Debug, Deserialize)]
pub struct ProducerConfig {
    /// Buffered chunks per lane above which nothing new is produced.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
    #[serde(default = "default_tone_hz")]
    pub tone_hz: f32,
    #[serde(default = "default_tone_amplitude")]
    pub tone_amplitude: f32,
    /// Posted to the chat once connected.
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
            tone_hz: default_tone_hz(),
            tone_amplitude: default_tone_amplitude(),
            greeting: default_greeting(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub stream: StreamConfig,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
    #[serde(default)]
    pub producer: ProducerConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .stream
            .validate()
            .with_context(|| format!("invalid stream section in {}", path.display()))?;
        Ok(config)
    }
}

/// Path from `TWITCH_STREAM_CONFIG`, or `twitch-stream.json` in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
