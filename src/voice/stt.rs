//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Batch speech-to-text engine
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one WAV-encoded utterance
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}

/// Default upper bound on one transcription request
pub const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes through a Whisper-compatible HTTP endpoint
///
/// Works against the `OpenAI` API or any local server exposing the same
/// `/audio/transcriptions` multipart contract.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl WhisperTranscriber {
    /// Create a transcriber posting to `url`
    #[must_use]
    pub fn new(url: String, model: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            model,
            api_key,
            timeout: TRANSCRIBE_TIMEOUT,
        }
    }

    /// Bound each request by `timeout` instead of [`TRANSCRIBE_TIMEOUT`]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
