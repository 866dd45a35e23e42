//! Streaming recognizer adapter
//!
//! Turns queued frames into recognition events. A fresh recognizer is
//! created for every listening phase so no acoustic state crosses phases.

use std::sync::Arc;

use async_trait::async_trait;

use super::capture::samples_to_wav;
use super::frame::{AudioFrame, SAMPLE_RATE};
use super::stt::Transcriber;

/// Outcome of feeding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// No utterance boundary yet
    Partial,
    /// Boundary detected, nothing transcribable
    FinalEmpty,
    /// Boundary detected with a transcript
    FinalText(String),
}

/// Streaming speech recognizer for one listening phase
#[async_trait]
pub trait Recognizer: Send {
    /// Consume a frame
    async fn feed(&mut self, frame: AudioFrame) -> RecognitionEvent;

    /// Force an utterance boundary over whatever audio is pending
    async fn finish(&mut self) -> RecognitionEvent;

    /// Whether audio has been fed since the last boundary
    fn has_pending(&self) -> bool;
}

/// Builds a fresh recognizer for each listening phase
pub trait RecognizerFactory: Send + Sync {
    /// Create a recognizer with empty state
    fn create(&self) -> Box<dyn Recognizer>;
}

/// Utterance boundary detection parameters
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    /// Analysis window in samples (20ms)
    pub window_samples: usize,
    /// RMS below which a window counts as quiet
    pub quiet_rms: f32,
    /// Trailing quiet that closes an utterance (300ms)
    pub trailing_quiet_samples: usize,
    /// Longest utterance before a boundary is forced (15s)
    pub max_utterance_samples: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            window_samples: 320,
            quiet_rms: 300.0,
            trailing_quiet_samples: 4_800,
            max_utterance_samples: SAMPLE_RATE as usize * 15,
        }
    }
}

/// Markers some engines emit for silent input
const BLANK_MARKERS: &[&str] = &["[blank_audio]", "(silence)", "[silence]", "[no speech]"];

/// Adapts a batch [`Transcriber`] to the streaming [`Recognizer`] contract
pub struct StreamingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    endpoint: EndpointConfig,
    utterance: Vec<i16>,
    heard_speech: bool,
}

impl StreamingRecognizer {
    /// Create a recognizer with no pending audio
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, endpoint: EndpointConfig) -> Self {
        Self {
            transcriber,
            endpoint,
            utterance: Vec::new(),
            heard_speech: false,
        }
    }

    /// Transcribe and clear the pending utterance
    async fn commit(&mut self) -> RecognitionEvent {
        let samples = std::mem::take(&mut self.utterance);
        self.heard_speech = false;

        if samples.is_empty() {
            return RecognitionEvent::FinalEmpty;
        }

        let wav = match samples_to_wav(&samples, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return RecognitionEvent::FinalEmpty;
            }
        };

        match self.transcriber.transcribe(wav).await {
            Ok(text) => normalize_transcript(&text)
                .map_or(RecognitionEvent::FinalEmpty, RecognitionEvent::FinalText),
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed, treating as silence");
                RecognitionEvent::FinalEmpty
            }
        }
    }
}

#[async_trait]
impl Recognizer for StreamingRecognizer {
    async fn feed(&mut self, frame: AudioFrame) -> RecognitionEvent {
        let activity = analyze(frame.samples(), &self.endpoint);
        self.utterance.extend_from_slice(frame.samples());
        self.heard_speech |= activity.has_speech;

        let boundary = (self.heard_speech
            && activity.trailing_quiet >= self.endpoint.trailing_quiet_samples)
            || self.utterance.len() >= self.endpoint.max_utterance_samples;

        tracing::trace!(
            pending = self.utterance.len(),
            trailing_quiet = activity.trailing_quiet,
            boundary,
            "fed frame"
        );

        if boundary {
            self.commit().await
        } else {
            RecognitionEvent::Partial
        }
    }

    async fn finish(&mut self) -> RecognitionEvent {
        self.commit().await
    }

    fn has_pending(&self) -> bool {
        !self.utterance.is_empty()
    }
}

/// Speech activity within one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameActivity {
    has_speech: bool,
    trailing_quiet: usize,
}

/// Window-level activity of a frame
fn analyze(samples: &[i16], endpoint: &EndpointConfig) -> FrameActivity {
    let window = endpoint.window_samples.max(1);
    let mut has_speech = false;
    let mut trailing_quiet = 0;

    for chunk in samples.chunks(window) {
        if rms(chunk) > endpoint.quiet_rms {
            has_speech = true;
            trailing_quiet = 0;
        } else {
            trailing_quiet += chunk.len();
        }
    }

    FrameActivity {
        has_speech,
        trailing_quiet,
    }
}

/// RMS of a window of i16 samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Clean up a transcript, returning `None` when nothing meaningful remains
#[must_use]
pub fn normalize_transcript(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    if BLANK_MARKERS.iter().any(|m| lowered == *m) {
        return None;
    }
    if !trimmed.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Creates [`StreamingRecognizer`]s sharing one transcription engine
pub struct StreamingRecognizers {
    transcriber: Arc<dyn Transcriber>,
    endpoint: EndpointConfig,
}

impl StreamingRecognizers {
    /// Create a factory over `transcriber`
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, endpoint: EndpointConfig) -> Self {
        Self {
            transcriber,
            endpoint,
        }
    }
}

impl RecognizerFactory for StreamingRecognizers {
    fn create(&self) -> Box<dyn Recognizer> {
        Box::new(StreamingRecognizer::new(
            Arc::clone(&self.transcriber),
            self.endpoint,
        ))
    }
}
