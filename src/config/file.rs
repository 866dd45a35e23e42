//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Capture and turn-taking
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Speech-to-text engine
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech output engine
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Cloud assistant backend
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Local model backend
    #[serde(default)]
    pub local: LocalFileConfig,

    /// Conversation history log
    #[serde(default)]
    pub history: HistoryFileConfig,

    /// UI relay
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Capture and turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Amplitude (L2 norm) a frame must exceed to count as speech
    pub threshold: Option<f32>,

    /// Samples per captured frame
    pub frame_samples: Option<usize>,

    /// Hand-off queue capacity in frames
    pub queue_capacity: Option<usize>,

    /// Turn loop poll interval
    pub poll_interval_ms: Option<u64>,

    /// Follow-up window length
    pub silence_timeout_secs: Option<u64>,

    /// Idle time after which pending audio is committed
    pub endpoint_gap_ms: Option<u64>,

    /// Pause after speaking before capture reopens
    pub speech_tail_ms: Option<u64>,

    /// Wake phrases
    pub wake_phrases: Option<Vec<String>>,

    /// Acknowledgement phrases spoken after a wake phrase
    pub acknowledgements: Option<Vec<String>>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "command"
    pub engine: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub command: Option<String>,
}

/// Cloud assistant configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
    pub instructions: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_polls: Option<u32>,
    pub max_action_rounds: Option<u32>,
}

/// Local model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LocalFileConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub memory_path: Option<String>,
    pub memory_window: Option<usize>,
}

/// History log configuration
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFileConfig {
    pub path: Option<String>,
}

/// UI relay configuration
#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    /// Relay endpoint; an empty string disables relaying
    pub url: Option<String>,
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    config_file_path().map_or_else(JarvisConfigFile::default, |path| load_from(&path))
}

/// Load a config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> JarvisConfigFile {
    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JarvisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/jarvis/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}
