//! Jarvis daemon: wires configuration into a running turn loop

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;

use crate::backends::select_backend;
use crate::config::{Config, TtsEngine};
use crate::conversation::{Conversation, HistorySink, HistoryStore};
use crate::relay::{RelayHub, UiRelay};
use crate::turn::{TurnComponents, TurnController, TurnSettings};
use crate::voice::{
    CaptureGate, CommandSpeaker, CpalInput, EndpointConfig, OpenAiSpeaker, OpenAiSynthesizer,
    RecognizerFactory, Speaker, StreamingRecognizers, WakePhrases, WhisperTranscriber,
};
use crate::{Error, Result};

/// The voice assistant daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Loaded configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run the turn loop until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or speech output cannot be initialized
    #[allow(clippy::future_not_send)]
    pub async fn run(self, serve_relay: bool) -> Result<()> {
        // no microphone is fatal at startup; later capture faults are not
        let input = CpalInput::new(self.config.voice.frame_samples)?;
        let speaker = self.build_speaker()?;
        let (conversation, history) = self.build_conversation().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        let relay_task = serve_relay.then(|| {
            let port = self.config.relay.port;
            tokio::spawn(async move {
                if let Err(e) = crate::relay::serve(port, RelayHub::new()).await {
                    tracing::error!(error = %e, "relay server stopped");
                }
            })
        });

        let components = TurnComponents {
            gate: Arc::new(CaptureGate::new()),
            input: Box::new(input),
            recognizers: self.build_recognizers(),
            speaker,
            conversation,
            wake: WakePhrases::new(&self.config.voice.wake_phrases),
        };

        let mut controller = TurnController::new(
            components,
            TurnSettings::from_config(&self.config.voice),
            shutdown_rx,
        );
        controller.run().await;

        history.flush().await;
        if let Some(task) = relay_task {
            task.abort();
        }

        Ok(())
    }

    /// Dispatch one text turn without audio
    ///
    /// Records history and relays the turns like a spoken request.
    pub async fn ask(&self, text: &str) -> String {
        let (conversation, history) = self.build_conversation().await;
        let reply = conversation.dispatch(text).await;
        history.flush().await;
        reply
    }

    /// Speak `text` through the configured engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be built or playback fails
    #[allow(clippy::future_not_send)]
    pub async fn say(&self, text: &str) -> Result<()> {
        let mut speaker = self.build_speaker()?;
        speaker.speak(text).await
    }

    /// Select the backend and attach history and relay sinks
    async fn build_conversation(&self) -> (Conversation, HistorySink) {
        let backend = select_backend(&self.config).await;

        let history = HistorySink::spawn(HistoryStore::new(&self.config.history.path));
        let mut conversation = Conversation::new(backend).with_sink(Arc::new(history.clone()));

        if let Some(url) = &self.config.relay.url {
            tracing::debug!(url = %url, "relaying turns to UI");
            conversation = conversation.with_sink(Arc::new(UiRelay::new(url.clone())));
        }

        (conversation, history)
    }

    fn build_speaker(&self) -> Result<Box<dyn Speaker>> {
        let tts = &self.config.tts;
        match tts.engine {
            TtsEngine::OpenAi => {
                let api_key = self
                    .config
                    .assistant
                    .api_key
                    .as_ref()
                    .ok_or_else(|| Error::Config("OpenAI TTS requires OPENAI_API_KEY".to_string()))?;
                let speaker = OpenAiSpeaker::new(OpenAiSynthesizer::new(
                    &self.config.assistant.base_url,
                    SecretString::from(api_key.expose_secret().to_string()),
                    tts.model.clone(),
                    tts.voice.clone(),
                    tts.speed,
                ))?;
                tracing::debug!(voice = %tts.voice, "using OpenAI speech output");
                Ok(Box::new(speaker))
            }
            TtsEngine::Command => {
                let speaker = CommandSpeaker::new(&tts.command)?;
                tracing::debug!(program = speaker.program(), "using local speech command");
                Ok(Box::new(speaker))
            }
        }
    }

    fn build_recognizers(&self) -> Arc<dyn RecognizerFactory> {
        let api_key = self
            .config
            .assistant
            .api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_string()));
        if api_key.is_none() && self.config.stt.url.contains("api.openai.com") {
            tracing::warn!(url = %self.config.stt.url, "no API key for transcription endpoint");
        }

        let transcriber =
            WhisperTranscriber::new(self.config.stt.url.clone(), self.config.stt.model.clone(), api_key);
        Arc::new(StreamingRecognizers::new(
            Arc::new(transcriber),
            EndpointConfig::default(),
        ))
    }
}
