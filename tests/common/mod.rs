//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, recognizer, speaker, and backend
//! so the turn loop can be driven without audio hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jarvis_voice::backends::Backend;
use jarvis_voice::conversation::{Conversation, ConversationTurn, TurnSink};
use jarvis_voice::turn::{TurnComponents, TurnController, TurnSettings};
use jarvis_voice::voice::{
    ActiveCapture, Admission, AudioFrame, AudioInput, CaptureGate, FrameSink, RecognitionEvent,
    Recognizer, RecognizerFactory, Speaker, WakePhrases,
};
use jarvis_voice::{Error, Result};
use tokio::sync::watch;

/// A frame well above the default threshold
#[must_use]
pub fn loud_frame() -> Vec<i16> {
    vec![5000; 800]
}

/// A frame of digital silence
#[must_use]
pub fn quiet_frame() -> Vec<i16> {
    vec![0; 800]
}

/// What the scripted microphone does when a listening phase opens it
#[derive(Debug, Clone)]
pub enum InputScript {
    /// Offer these frames immediately
    Frames(Vec<Vec<i16>>),
    /// Report a device error
    Fault(&'static str),
    /// Fail to open
    OpenError,
}

/// Counters kept by [`ScriptedInput`]
#[derive(Debug, Default)]
pub struct InputLog {
    pub opens: usize,
    pub closes: usize,
    pub admissions: Vec<Admission>,
}

/// Microphone that replays one script per open
pub struct ScriptedInput {
    scripts: VecDeque<InputScript>,
    log: Arc<Mutex<InputLog>>,
}

impl ScriptedInput {
    pub fn new(scripts: Vec<InputScript>) -> (Self, Arc<Mutex<InputLog>>) {
        let log = Arc::new(Mutex::new(InputLog::default()));
        (
            Self {
                scripts: scripts.into(),
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl AudioInput for ScriptedInput {
    fn open(&mut self, sink: FrameSink) -> Result<Box<dyn ActiveCapture>> {
        self.log.lock().unwrap().opens += 1;

        match self.scripts.pop_front() {
            Some(InputScript::Frames(frames)) => {
                for frame in frames {
                    let admission = sink.offer(frame);
                    self.log.lock().unwrap().admissions.push(admission);
                }
            }
            Some(InputScript::Fault(message)) => sink.fault(message),
            Some(InputScript::OpenError) => {
                return Err(Error::Capture("device busy".to_string()));
            }
            None => {}
        }

        Ok(Box::new(ScriptedCapture {
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedCapture {
    log: Arc<Mutex<InputLog>>,
}

impl ActiveCapture for ScriptedCapture {
    fn close(self: Box<Self>) {
        self.log.lock().unwrap().closes += 1;
    }
}

/// Counters kept by [`ScriptedRecognizers`]
#[derive(Debug, Default)]
pub struct RecognizerLog {
    pub created: usize,
    /// Frames fed to each recognizer, by creation order
    pub fed: Vec<usize>,
    pub finishes: usize,
}

/// Hands out recognizers that replay one event script each
pub struct ScriptedRecognizers {
    scripts: Mutex<VecDeque<Vec<RecognitionEvent>>>,
    log: Arc<Mutex<RecognizerLog>>,
}

impl ScriptedRecognizers {
    pub fn new(scripts: Vec<Vec<RecognitionEvent>>) -> (Arc<Self>, Arc<Mutex<RecognizerLog>>) {
        let log = Arc::new(Mutex::new(RecognizerLog::default()));
        (
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                log: Arc::clone(&log),
            }),
            log,
        )
    }
}

impl RecognizerFactory for ScriptedRecognizers {
    fn create(&self) -> Box<dyn Recognizer> {
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let index = {
            let mut log = self.log.lock().unwrap();
            log.created += 1;
            log.fed.push(0);
            log.created - 1
        };
        Box::new(ScriptedRecognizer {
            events: events.into(),
            index,
            pending: false,
            log: Arc::clone(&self.log),
        })
    }
}

/// Returns the next scripted event for every feed or finish
struct ScriptedRecognizer {
    events: VecDeque<RecognitionEvent>,
    index: usize,
    pending: bool,
    log: Arc<Mutex<RecognizerLog>>,
}

impl ScriptedRecognizer {
    fn next_event(&mut self, default: RecognitionEvent) -> RecognitionEvent {
        let event = self.events.pop_front().unwrap_or(default);
        self.pending = event == RecognitionEvent::Partial;
        event
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn feed(&mut self, _frame: AudioFrame) -> RecognitionEvent {
        self.log.lock().unwrap().fed[self.index] += 1;
        self.next_event(RecognitionEvent::Partial)
    }

    async fn finish(&mut self) -> RecognitionEvent {
        self.log.lock().unwrap().finishes += 1;
        self.next_event(RecognitionEvent::FinalEmpty)
    }

    fn has_pending(&self) -> bool {
        self.pending
    }
}

/// One call to [`RecordingSpeaker::speak`]
#[derive(Debug, Clone)]
pub struct Spoken {
    pub text: String,
    /// Whether the gate was admitting frames during playback
    pub gate_admitted: bool,
    pub speaking_flag: bool,
    /// What happened to a loud frame offered during playback
    pub probe: Option<Admission>,
}

/// Speaker that records what it was asked to say and the gate state at the time
pub struct RecordingSpeaker {
    gate: Arc<CaptureGate>,
    spoken: Arc<Mutex<Vec<Spoken>>>,
    probe: Arc<Mutex<Option<FrameSink>>>,
    fail: bool,
}

impl RecordingSpeaker {
    pub fn new(gate: Arc<CaptureGate>) -> (Self, Arc<Mutex<Vec<Spoken>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                gate,
                spoken: Arc::clone(&spoken),
                probe: Arc::new(Mutex::new(None)),
                fail: false,
            },
            spoken,
        )
    }

    /// Report an error from every `speak` call
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Slot for a sink the speaker offers a loud frame into while speaking
    pub fn probe_slot(&self) -> Arc<Mutex<Option<FrameSink>>> {
        Arc::clone(&self.probe)
    }
}

#[async_trait(?Send)]
impl Speaker for RecordingSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        let probe = self
            .probe
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.offer(loud_frame()));

        self.spoken.lock().unwrap().push(Spoken {
            text: text.to_string(),
            gate_admitted: self.gate.admits(),
            speaking_flag: self.gate.is_speaking(),
            probe,
        });

        if self.fail {
            Err(Error::Tts("speaker unplugged".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Backend returning scripted replies
pub struct FakeBackend {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    timeout: Duration,
}

impl FakeBackend {
    pub fn new(replies: Vec<Result<String>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::clone(&calls),
                delay: None,
                timeout: Duration::from_secs(120),
            },
            calls,
        )
    }

    /// Take `delay` to answer, with calls bounded by `timeout`
    #[must_use]
    pub fn slow(mut self, delay: Duration, timeout: Duration) -> Self {
        self.delay = Some(delay);
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn reply(&self, _message: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Sink collecting every recorded turn
#[derive(Default)]
pub struct CollectingSink {
    turns: Mutex<Vec<ConversationTurn>>,
}

impl CollectingSink {
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().unwrap().clone()
    }
}

impl TurnSink for CollectingSink {
    fn record(&self, turn: &ConversationTurn) {
        self.turns.lock().unwrap().push(turn.clone());
    }
}

/// Timing used by turn loop tests
#[must_use]
pub fn test_settings() -> TurnSettings {
    TurnSettings {
        threshold: 3000.0,
        queue_capacity: 8,
        poll_interval: Duration::from_millis(50),
        silence_timeout: Duration::from_secs(5),
        endpoint_gap: Duration::from_millis(800),
        speech_tail: Duration::ZERO,
        fault_backoff: Duration::ZERO,
        acknowledgements: vec!["Yes?".to_string()],
    }
}

/// A controller wired to scripted collaborators
pub struct Harness {
    pub controller: TurnController,
    pub input: Arc<Mutex<InputLog>>,
    pub recognizers: Arc<Mutex<RecognizerLog>>,
    pub spoken: Arc<Mutex<Vec<Spoken>>>,
    pub turns: Arc<CollectingSink>,
    pub backend_calls: Arc<AtomicUsize>,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    /// Build a harness; `replies` of `None` means no backend is configured
    pub fn new(
        inputs: Vec<InputScript>,
        scripts: Vec<Vec<RecognitionEvent>>,
        replies: Option<Vec<Result<String>>>,
    ) -> Self {
        Self::build(inputs, scripts, replies, false)
    }

    /// Like [`Harness::new`] with a speaker that always fails
    pub fn with_failing_speaker(
        inputs: Vec<InputScript>,
        scripts: Vec<Vec<RecognitionEvent>>,
        replies: Option<Vec<Result<String>>>,
    ) -> Self {
        Self::build(inputs, scripts, replies, true)
    }

    fn build(
        inputs: Vec<InputScript>,
        scripts: Vec<Vec<RecognitionEvent>>,
        replies: Option<Vec<Result<String>>>,
        failing_speaker: bool,
    ) -> Self {
        let gate = Arc::new(CaptureGate::new());
        let (input, input_log) = ScriptedInput::new(inputs);
        let (recognizers, recognizer_log) = ScriptedRecognizers::new(scripts);
        let (speaker, spoken) = RecordingSpeaker::new(Arc::clone(&gate));
        let speaker = if failing_speaker {
            speaker.failing()
        } else {
            speaker
        };
        let probe = speaker.probe_slot();

        let (backend, backend_calls) = match replies {
            Some(replies) => {
                let (backend, calls) = FakeBackend::new(replies);
                (Some(Box::new(backend) as Box<dyn Backend>), calls)
            }
            None => (None, Arc::new(AtomicUsize::new(0))),
        };

        let turns = Arc::new(CollectingSink::default());
        let conversation =
            Conversation::new(backend).with_sink(Arc::clone(&turns) as Arc<dyn TurnSink>);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let controller = TurnController::new(
            TurnComponents {
                gate,
                input: Box::new(input),
                recognizers,
                speaker: Box::new(speaker),
                conversation,
                wake: WakePhrases::default(),
            },
            test_settings(),
            shutdown_rx,
        );

        *probe.lock().unwrap() = Some(controller.frame_sink());

        Self {
            controller,
            input: input_log,
            recognizers: recognizer_log,
            spoken,
            turns,
            backend_calls,
            shutdown,
        }
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.text.clone())
            .collect()
    }
}

/// Shorthand for a final transcript
pub fn text(s: &str) -> RecognitionEvent {
    RecognitionEvent::FinalText(s.to_string())
}
