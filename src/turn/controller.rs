//! Turn loop
//!
//! Every listening phase has the same shape: drain the hand-off queue,
//! build a fresh recognizer, open capture, then poll the queue and feed the
//! recognizer until the phase resolves. Speaking closes capture first, so
//! the assistant never hears itself.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::Instant;

use super::state::{ListenPhase, TurnState};
use crate::config::{DEFAULT_ACKNOWLEDGEMENTS, VoiceConfig};
use crate::conversation::Conversation;
use crate::voice::{
    AudioInput, CaptureGate, FrameQueue, FrameSink, RecognitionEvent, Recognizer,
    RecognizerFactory, Speaker, WakePhrases,
};

/// Timing and phrasing of the turn loop
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// Amplitude a frame must exceed to be admitted
    pub threshold: f32,
    /// Hand-off queue capacity in frames
    pub queue_capacity: usize,
    /// How often the queue is polled; also the timeout resolution
    pub poll_interval: Duration,
    /// Follow-up window measured from the last user input
    pub silence_timeout: Duration,
    /// Queue idle time after which pending audio is committed
    pub endpoint_gap: Duration,
    /// Pause after speaking before capture reopens
    pub speech_tail: Duration,
    /// Pause before reopening capture after a device fault
    pub fault_backoff: Duration,
    /// Phrases spoken after a wake phrase
    pub acknowledgements: Vec<String>,
}

impl TurnSettings {
    /// Settings from the voice section of the configuration
    #[must_use]
    pub fn from_config(voice: &VoiceConfig) -> Self {
        Self {
            threshold: voice.threshold,
            queue_capacity: voice.queue_capacity,
            poll_interval: voice.poll_interval,
            silence_timeout: voice.silence_timeout,
            endpoint_gap: voice.endpoint_gap,
            speech_tail: voice.speech_tail,
            fault_backoff: Duration::from_secs(1),
            acknowledgements: voice.acknowledgements.clone(),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&VoiceConfig::default())
    }
}

/// Collaborators driven by the turn loop
pub struct TurnComponents {
    /// Shared with the capture callback
    pub gate: Arc<CaptureGate>,
    pub input: Box<dyn AudioInput>,
    pub recognizers: Arc<dyn RecognizerFactory>,
    pub speaker: Box<dyn Speaker>,
    pub conversation: Conversation,
    pub wake: WakePhrases,
}

/// How a listening phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// A wake phrase was heard
    Woken,
    /// The user said something
    Utterance(String),
    /// An utterance boundary with nothing transcribable
    Silence,
    /// The follow-up window elapsed
    TimedOut,
    /// The capture stream failed or could not be opened
    Fault,
    /// Shutdown was requested
    Shutdown,
}

/// Owns the turn state and drives every transition
pub struct TurnController {
    state: TurnState,
    gate: Arc<CaptureGate>,
    queue: FrameQueue,
    input: Box<dyn AudioInput>,
    recognizers: Arc<dyn RecognizerFactory>,
    speaker: Box<dyn Speaker>,
    conversation: Conversation,
    wake: WakePhrases,
    settings: TurnSettings,
    pending_reply: Option<String>,
    shutdown: watch::Receiver<bool>,
    snapshots: watch::Sender<TurnState>,
}

impl TurnController {
    /// Create a controller in [`TurnState::AwaitingWake`]
    ///
    /// The loop stops once `shutdown` reads `true`.
    #[must_use]
    pub fn new(
        components: TurnComponents,
        settings: TurnSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let TurnComponents {
            gate,
            input,
            recognizers,
            speaker,
            conversation,
            wake,
        } = components;

        gate.close_listening();
        gate.set_speaking(false);

        let (snapshots, _) = watch::channel(TurnState::AwaitingWake);

        Self {
            state: TurnState::AwaitingWake,
            gate,
            queue: FrameQueue::new(settings.queue_capacity),
            input,
            recognizers,
            speaker,
            conversation,
            wake,
            settings,
            pending_reply: None,
            shutdown,
            snapshots,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Capture gate shared with the audio callback
    #[must_use]
    pub const fn gate(&self) -> &Arc<CaptureGate> {
        &self.gate
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.snapshots.subscribe()
    }

    /// A producer handle onto this controller's hand-off queue
    #[must_use]
    pub fn frame_sink(&self) -> FrameSink {
        self.queue.sink(Arc::clone(&self.gate), self.settings.threshold)
    }

    /// Frames waiting in the hand-off queue
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Run until shutdown is requested
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) {
        tracing::info!(
            wake_phrases = ?self.wake.phrases(),
            backend = self.conversation.backend_name().unwrap_or("none"),
            "listening for wake phrase"
        );

        while self.step().await.is_some() {}

        self.gate.close_listening();
        self.gate.set_speaking(false);
        tracing::info!("turn loop stopped");
    }

    /// Perform the current state's work and transition once
    ///
    /// Returns the new state, or `None` if shutdown was requested.
    #[allow(clippy::future_not_send)]
    pub async fn step(&mut self) -> Option<TurnState> {
        if self.shutdown_requested() {
            return None;
        }

        let next = match self.state {
            TurnState::AwaitingWake => match self.listen(ListenPhase::Wake).await {
                ListenOutcome::Woken => TurnState::Acknowledging,
                ListenOutcome::Shutdown => return None,
                ListenOutcome::Fault => {
                    self.back_off().await;
                    TurnState::AwaitingWake
                }
                _ => TurnState::AwaitingWake,
            },
            TurnState::Acknowledging => {
                let ack = self.pick_acknowledgement();
                self.speak(&ack).await;
                TurnState::CapturingCommand
            }
            TurnState::CapturingCommand => {
                let outcome = self.listen(ListenPhase::Command).await;
                self.after_request(outcome).await?
            }
            TurnState::Speaking => {
                let reply = self.pending_reply.take().unwrap_or_default();
                self.speak(&reply).await;
                TurnState::AwaitingFollowUp
            }
            TurnState::AwaitingFollowUp => {
                let outcome = self.listen(ListenPhase::FollowUp).await;
                self.after_request(outcome).await?
            }
        };

        self.transition(next);
        Some(next)
    }

    /// Next state after a command or follow-up phase
    #[allow(clippy::future_not_send)]
    async fn after_request(&mut self, outcome: ListenOutcome) -> Option<TurnState> {
        match outcome {
            ListenOutcome::Utterance(text) => {
                tracing::info!(command = %text, "request received");
                let reply = self.conversation.dispatch(&text).await;
                self.pending_reply = Some(reply);
                Some(TurnState::Speaking)
            }
            ListenOutcome::Shutdown => None,
            ListenOutcome::Fault => {
                self.back_off().await;
                Some(TurnState::AwaitingWake)
            }
            ListenOutcome::TimedOut | ListenOutcome::Silence | ListenOutcome::Woken => {
                Some(TurnState::AwaitingWake)
            }
        }
    }

    fn transition(&mut self, next: TurnState) {
        if next != self.state {
            tracing::info!(from = %self.state, to = %next, "turn transition");
        }
        self.state = next;
        self.snapshots.send_replace(next);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run one listening phase
    #[allow(clippy::future_not_send)]
    async fn listen(&mut self, phase: ListenPhase) -> ListenOutcome {
        let stale = self.queue.drain();
        self.queue.take_dropped();
        if stale > 0 {
            tracing::debug!(stale, ?phase, "discarded stale frames");
        }

        let mut recognizer = self.recognizers.create();

        if phase == ListenPhase::FollowUp {
            self.gate.clock().touch();
        }

        self.gate.open_listening();
        let sink = self.frame_sink();
        let capture = match self.input.open(sink) {
            Ok(capture) => capture,
            Err(e) => {
                self.gate.close_listening();
                tracing::error!(error = %e, ?phase, "failed to open capture");
                return ListenOutcome::Fault;
            }
        };

        tracing::debug!(?phase, "listening");
        let outcome = self.poll(phase, recognizer.as_mut()).await;

        self.gate.close_listening();
        capture.close();
        tracing::debug!(?phase, ?outcome, "listening phase ended");

        outcome
    }

    /// Poll the hand-off queue until the phase resolves
    async fn poll(&mut self, phase: ListenPhase, recognizer: &mut dyn Recognizer) -> ListenOutcome {
        let mut last_frame = Instant::now();

        loop {
            if self.shutdown_requested() {
                return ListenOutcome::Shutdown;
            }

            if let Some(fault) = self.queue.try_fault() {
                tracing::warn!(error = %fault, ?phase, "capture failure");
                return ListenOutcome::Fault;
            }

            if phase == ListenPhase::FollowUp
                && self.gate.clock().since_last_input() > self.settings.silence_timeout
            {
                tracing::info!(
                    timeout_secs = self.settings.silence_timeout.as_secs_f32(),
                    "no follow-up, returning to wake phrase"
                );
                return ListenOutcome::TimedOut;
            }

            let dropped = self.queue.take_dropped();
            if dropped > 0 {
                tracing::debug!(dropped, ?phase, "hand-off queue full, frames dropped");
            }

            if let Some(frame) = self.queue.try_next() {
                last_frame = Instant::now();
                tracing::trace!(amplitude = frame.amplitude(), "frame");
                let event = recognizer.feed(frame).await;
                if let Some(outcome) = self.resolve(phase, event) {
                    return outcome;
                }
                continue;
            }

            if recognizer.has_pending() && last_frame.elapsed() >= self.settings.endpoint_gap {
                let event = recognizer.finish().await;
                if let Some(outcome) = self.resolve(phase, event) {
                    return outcome;
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Map a recognition event onto the phase's outcome, if it ends the phase
    fn resolve(&self, phase: ListenPhase, event: RecognitionEvent) -> Option<ListenOutcome> {
        match (phase, event) {
            (_, RecognitionEvent::Partial) | (ListenPhase::Wake, RecognitionEvent::FinalEmpty) => {
                None
            }
            (ListenPhase::Wake, RecognitionEvent::FinalText(text)) => {
                if let Some(phrase) = self.wake.matches(&text) {
                    tracing::info!(phrase, transcript = %text, "wake phrase detected");
                    Some(ListenOutcome::Woken)
                } else {
                    tracing::debug!(transcript = %text, "no wake phrase");
                    None
                }
            }
            (_, RecognitionEvent::FinalEmpty) => Some(ListenOutcome::Silence),
            (_, RecognitionEvent::FinalText(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Some(ListenOutcome::Silence);
                }
                self.gate.clock().touch();
                Some(ListenOutcome::Utterance(text.to_string()))
            }
        }
    }

    /// Speak with capture closed, returning once playback has finished
    #[allow(clippy::future_not_send)]
    async fn speak(&mut self, text: &str) {
        self.gate.close_listening();
        self.gate.set_speaking(true);

        if text.is_empty() {
            tracing::debug!("nothing to speak");
        } else if let Err(e) = self.speaker.speak(text).await {
            tracing::warn!(error = %e, "speech output failed");
        }

        if !self.settings.speech_tail.is_zero() {
            tokio::time::sleep(self.settings.speech_tail).await;
        }

        self.gate.set_speaking(false);
        self.gate.clock().touch();
    }

    fn pick_acknowledgement(&self) -> String {
        self.settings
            .acknowledgements
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACKNOWLEDGEMENTS[0].to_string())
    }

    #[allow(clippy::future_not_send)]
    async fn back_off(&self) {
        if !self.settings.fault_backoff.is_zero() {
            tokio::time::sleep(self.settings.fault_backoff).await;
        }
    }
}
