//! Configuration management for Jarvis
//!
//! Layering is env > toml > default.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::{CommandSpeaker, DEFAULT_WAKE_PHRASES, FRAME_SAMPLES};
use file::JarvisConfigFile;

/// Default `OpenAI`-compatible API base
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default UI relay endpoint
pub const DEFAULT_RELAY_URL: &str = "http://localhost:8000/prompt_response";

/// Acknowledgements spoken after a wake phrase
pub const DEFAULT_ACKNOWLEDGEMENTS: &[&str] = &[
    "Yes, how can I help you?",
    "Yes, what can I do for you?",
    "Yes, how can I assist you?",
    "I'm here.",
];

const DEFAULT_INSTRUCTIONS: &str = "You are Jarvis, a helpful voice assistant. \
    Answer in one or two short spoken sentences without markdown or lists.";

/// Jarvis configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (history, local memory)
    pub data_dir: PathBuf,

    /// Capture and turn-taking
    pub voice: VoiceConfig,

    /// Speech-to-text engine
    pub stt: SttConfig,

    /// Speech output engine
    pub tts: TtsConfig,

    /// Cloud assistant backend
    pub assistant: AssistantConfig,

    /// Local model backend
    pub local: LocalConfig,

    /// Conversation history log
    pub history: HistoryConfig,

    /// UI relay
    pub relay: RelayConfig,
}

/// Capture and turn-taking configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Amplitude (L2 norm of i16 samples) a frame must exceed
    pub threshold: f32,

    /// Samples per captured frame
    pub frame_samples: usize,

    /// Hand-off queue capacity in frames
    pub queue_capacity: usize,

    /// Turn loop poll interval
    pub poll_interval: Duration,

    /// Follow-up window length
    pub silence_timeout: Duration,

    /// Queue idle time after which pending audio is committed
    pub endpoint_gap: Duration,

    /// Pause after speaking before capture reopens
    pub speech_tail: Duration,

    /// Wake phrases
    pub wake_phrases: Vec<String>,

    /// Acknowledgement phrases
    pub acknowledgements: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            threshold: 3000.0,
            frame_samples: FRAME_SAMPLES,
            queue_capacity: 32,
            poll_interval: Duration::from_millis(50),
            silence_timeout: Duration::from_secs(5),
            endpoint_gap: Duration::from_millis(800),
            speech_tail: Duration::from_millis(500),
            wake_phrases: DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            acknowledgements: DEFAULT_ACKNOWLEDGEMENTS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Transcription endpoint
    pub url: String,

    /// Transcription model
    pub model: String,
}

/// Which speech output engine to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsEngine {
    /// `OpenAI` speech API played on the output device
    OpenAi,
    /// Local TTS program
    Command,
}

impl TtsEngine {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "command" | "local" => Some(Self::Command),
            _ => None,
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub engine: TtsEngine,
    pub model: String,
    pub voice: String,
    pub speed: f32,

    /// Command line for the local engine; the text is appended
    pub command: String,
}

/// Cloud assistant configuration
#[derive(Debug)]
pub struct AssistantConfig {
    /// API key; without one the cloud backend is unavailable
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,

    /// Existing assistant to reuse; `None` creates one
    pub assistant_id: Option<String>,

    /// Existing thread to reuse; `None` creates one
    pub thread_id: Option<String>,
    pub instructions: String,
    pub poll_interval: Duration,
    pub max_polls: u32,

    /// Cap on `requires_action` rounds per run
    pub max_action_rounds: u32,
}

/// Local model configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub enabled: bool,
    pub url: String,
    pub model: String,

    /// Where the running message memory is persisted
    pub memory_path: PathBuf,

    /// Messages of context sent with each request
    pub memory_window: usize,
}

/// History log configuration
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub path: PathBuf,
}

/// UI relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay endpoint; `None` disables relaying
    pub url: Option<String>,

    /// Port for the embedded relay server
    pub port: u16,
}

impl Config {
    /// Load configuration from the environment and the config file
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();

        // Determine data directory (~/.local/share/jarvis on Linux)
        let data_dir = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("jarvis"));

        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(path = %data_dir.display(), error = %e, "failed to create data dir");
        }

        Self::resolve(fc, |key| std::env::var(key).ok(), data_dir)
    }

    /// Merge `env` over the file config over defaults
    ///
    /// `env` looks up a variable by name; empty values count as unset
    /// except for `JARVIS_RELAY_URL`, where empty disables the relay.
    pub fn resolve<F>(fc: JarvisConfigFile, env: F, data_dir: PathBuf) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            threshold: var("JARVIS_THRESHOLD")
                .and_then(|v| parse_logged("JARVIS_THRESHOLD", &v))
                .or(fc.voice.threshold)
                .unwrap_or(defaults.threshold),
            frame_samples: fc
                .voice
                .frame_samples
                .filter(|&n| n > 0)
                .unwrap_or(defaults.frame_samples),
            queue_capacity: fc
                .voice
                .queue_capacity
                .filter(|&n| n > 0)
                .unwrap_or(defaults.queue_capacity),
            poll_interval: fc
                .voice
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            silence_timeout: var("JARVIS_SILENCE_TIMEOUT")
                .and_then(|v| parse_logged("JARVIS_SILENCE_TIMEOUT", &v))
                .or(fc.voice.silence_timeout_secs)
                .map_or(defaults.silence_timeout, Duration::from_secs),
            endpoint_gap: fc
                .voice
                .endpoint_gap_ms
                .map_or(defaults.endpoint_gap, Duration::from_millis),
            speech_tail: fc
                .voice
                .speech_tail_ms
                .map_or(defaults.speech_tail, Duration::from_millis),
            wake_phrases: var("JARVIS_WAKE_PHRASES")
                .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
                .or(fc.voice.wake_phrases)
                .unwrap_or(defaults.wake_phrases),
            acknowledgements: fc
                .voice
                .acknowledgements
                .filter(|a| !a.is_empty())
                .unwrap_or(defaults.acknowledgements),
        };

        let api_key = var("OPENAI_API_KEY")
            .or(fc.assistant.api_key)
            .filter(|k| !k.is_empty());
        let base_url = var("OPENAI_BASE_URL")
            .or(fc.assistant.base_url)
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let stt = SttConfig {
            url: var("JARVIS_STT_URL")
                .or(fc.stt.url)
                .unwrap_or_else(|| format!("{base_url}/audio/transcriptions")),
            model: var("JARVIS_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
        };

        let engine_default = if api_key.is_some() {
            TtsEngine::OpenAi
        } else {
            TtsEngine::Command
        };
        let tts = TtsConfig {
            engine: var("JARVIS_TTS_ENGINE")
                .or(fc.tts.engine)
                .and_then(|e| {
                    let parsed = TtsEngine::parse(&e);
                    if parsed.is_none() {
                        tracing::warn!(engine = %e, "unknown TTS engine, using default");
                    }
                    parsed
                })
                .unwrap_or(engine_default),
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: fc.tts.voice.unwrap_or_else(|| "onyx".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            command: var("JARVIS_TTS_COMMAND")
                .or(fc.tts.command)
                .unwrap_or_else(|| CommandSpeaker::default_command().to_string()),
        };

        let assistant = AssistantConfig {
            api_key: api_key.map(SecretString::from),
            base_url,
            model: var("JARVIS_MODEL")
                .or(fc.assistant.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            assistant_id: var("JARVIS_ASSISTANT_ID").or(fc.assistant.assistant_id),
            thread_id: var("JARVIS_THREAD_ID").or(fc.assistant.thread_id),
            instructions: fc
                .assistant
                .instructions
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            poll_interval: Duration::from_millis(fc.assistant.poll_interval_ms.unwrap_or(1000)),
            max_polls: fc.assistant.max_polls.unwrap_or(120),
            max_action_rounds: fc.assistant.max_action_rounds.unwrap_or(3),
        };

        let local = LocalConfig {
            enabled: fc.local.enabled.unwrap_or(true),
            url: var("JARVIS_OLLAMA_URL")
                .or(fc.local.url)
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: var("JARVIS_OLLAMA_MODEL")
                .or(fc.local.model)
                .unwrap_or_else(|| "jarvis".to_string()),
            memory_path: fc
                .local
                .memory_path
                .map_or_else(|| data_dir.join("history.json"), PathBuf::from),
            memory_window: fc.local.memory_window.unwrap_or(50),
        };

        let history = HistoryConfig {
            path: var("JARVIS_HISTORY_PATH")
                .or(fc.history.path)
                .map_or_else(|| data_dir.join("conversation_history.json"), PathBuf::from),
        };

        // an explicitly empty relay URL disables relaying
        let relay_url = env("JARVIS_RELAY_URL")
            .or(fc.relay.url)
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let relay = RelayConfig {
            url: Some(relay_url.trim().to_string()).filter(|u| !u.is_empty()),
            port: var("JARVIS_RELAY_PORT")
                .and_then(|v| parse_logged("JARVIS_RELAY_PORT", &v))
                .or(fc.relay.port)
                .unwrap_or(8000),
        };

        Self {
            data_dir,
            voice,
            stt,
            tts,
            assistant,
            local,
            history,
            relay,
        }
    }

    /// Directory holding history and memory files
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Parse an environment value, warning when it is malformed
fn parse_logged<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "ignoring malformed environment value");
    }
    parsed
}
