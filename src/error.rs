//! Error types for Jarvis

use thiserror::Error;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front-end
///
/// An empty recognition result is not an error; it is reported as
/// [`crate::voice::RecognitionEvent::FinalEmpty`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (open, playback, encoding)
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture stream failed while listening
    #[error("capture failure: {0}")]
    Capture(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// No language-model backend is available
    #[error("no backend available")]
    BackendUnavailable,

    /// A backend call failed or timed out
    #[error("backend error: {0}")]
    Backend(String),

    /// History could not be persisted
    #[error("persistence error: {0}")]
    Persistence(String),

    /// UI relay error
    #[error("relay error: {0}")]
    Relay(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the turn loop should treat this as a lost capture stream
    #[must_use]
    pub const fn is_capture(&self) -> bool {
        matches!(self, Self::Capture(_) | Self::Audio(_))
    }
}
