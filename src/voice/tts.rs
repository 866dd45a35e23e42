//! Text-to-speech (TTS) output

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::AudioPlayback;
use crate::{Error, Result};

/// Speaks text aloud
///
/// Playback holds a device stream that cannot leave its thread, so
/// implementations are not required to be `Send`.
#[async_trait(?Send)]
pub trait Speaker {
    /// Speak `text`, resolving once playback has finished
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&mut self, text: &str) -> Result<()>;
}

/// Default upper bound on one synthesis request
pub const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// `OpenAI` speech synthesis (`/audio/speech`) to MP3 bytes
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
    voice: String,
    speed: f32,
    timeout: Duration,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer posting to `<base_url>/audio/speech`
    #[must_use]
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: String,
        voice: String,
        speed: f32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            api_key,
            model,
            voice,
            speed,
            timeout: SYNTHESIS_TIMEOUT,
        }
    }

    /// Bound each request by `timeout` instead of [`SYNTHESIS_TIMEOUT`]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Synthesize `text` to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the API rejects the request or does not answer in time
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// `OpenAI` speech synthesis played on the default output device
pub struct OpenAiSpeaker {
    synthesizer: OpenAiSynthesizer,
    playback: AudioPlayback,
}

impl OpenAiSpeaker {
    /// Play speech from `synthesizer` on the default output device
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn new(synthesizer: OpenAiSynthesizer) -> Result<Self> {
        let playback = AudioPlayback::new()?;
        Ok(Self {
            synthesizer,
            playback,
        })
    }
}

#[async_trait(?Send)]
impl Speaker for OpenAiSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        tracing::debug!(chars = text.len(), "synthesizing speech");
        let audio = self.synthesizer.synthesize(text).await?;
        self.playback.play_mp3(&audio).await
    }
}

/// Speaks through a local TTS program such as `say` or `espeak`
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// Create a speaker from a command line; the text is appended as the last argument
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("TTS command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Platform default offline TTS program
    #[must_use]
    pub const fn default_command() -> &'static str {
        if cfg!(target_os = "macos") {
            "say"
        } else {
            "espeak"
        }
    }

    /// Program that will be run
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait(?Send)]
impl Speaker for CommandSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Tts(format!("failed to run {}: {e}", self.program)))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Tts(format!("{} exited with {status}", self.program)))
        }
    }
}
