use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::AUDIO_CAPACITY;
use crate::channel::EQ_CAPACITY;
use crate::speech;

/// Default config directory: ~/.agenthost/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agenthost")
}

/// Default config file path: ~/.agenthost/settings.json
pub fn default_config_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub const ENV_API_KEY: &str = "AGENTHOST_API_KEY";
pub const ENV_BASE_URL: &str = "AGENTHOST_BASE_URL";
pub const ENV_MODEL: &str = "AGENTHOST_MODEL";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    /// Directory for per-session trace files; tracing is off when unset.
    #[serde(default)]
    pub trace_dir: Option<PathBuf>,
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
    #[serde(default = "default_audio_capacity")]
    pub audio_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeechConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_speech_url")]
    pub base_url: String,
    #[serde(default = "default_device")]
    pub tts_device: String,
    #[serde(default = "default_device")]
    pub stt_device: String,
    /// Player command; a WAV stream is written to its stdin.
    #[serde(default = "default_player")]
    pub player: String,
}

fn default_version() -> u32 {
    1
}
fn default_output_capacity() -> usize {
    EQ_CAPACITY
}
fn default_audio_capacity() -> usize {
    AUDIO_CAPACITY
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    16384
}
fn default_speech_url() -> String {
    "http://127.0.0.1:59001".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_player() -> String {
    "aplay -q".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            engine: EngineConfig::default(),
            speech: SpeechConfig::default(),
            trace_dir: None,
            output_capacity: default_output_capacity(),
            audio_capacity: default_audio_capacity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            system_prompt: None,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_speech_url(),
            tts_device: default_device(),
            stt_device: default_device(),
            player: default_player(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Overlay `AGENTHOST_*` environment variables.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup(ENV_API_KEY) {
            self.engine.api_key = v;
        }
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.engine.base_url = v;
        }
        if let Some(v) = lookup(ENV_MODEL) {
            self.engine.model = v;
        }
        self
    }

    pub fn has_required_env_vars() -> bool {
        std::env::var(ENV_API_KEY).is_ok_and(|v| !v.is_empty())
    }

    /// Reject settings that would only fail later, mid-session.
    pub fn validate(&self) -> Result<()> {
        if self.output_capacity == 0 || self.audio_capacity == 0 {
            anyhow::bail!("output_capacity and audio_capacity must be non-zero");
        }
        if self.speech.enabled {
            for device in [&self.speech.tts_device, &self.speech.stt_device] {
                if !speech::is_valid_device(device) {
                    anyhow::bail!(
                        "Invalid speech device '{device}': use cpu, cuda or cuda:<n>"
                    );
                }
            }
        }
        Ok(())
    }
}
