//! Voice processing module
//!
//! Handles audio capture, the capture gate and hand-off queue, speech
//! recognition, wake phrase matching, and speech output.

mod capture;
mod frame;
mod gate;
mod playback;
mod recognizer;
mod stt;
mod tts;
mod wake_word;

pub use capture::{ActiveCapture, AudioInput, CpalInput, samples_to_wav};
pub use frame::{
    Admission, AudioFrame, FRAME_SAMPLES, FrameAssembler, FrameQueue, FrameSink, SAMPLE_RATE,
    f32_to_i16, l2_norm,
};
pub use gate::{CaptureGate, SessionClock};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use recognizer::{
    EndpointConfig, RecognitionEvent, Recognizer, RecognizerFactory, StreamingRecognizer,
    StreamingRecognizers, normalize_transcript,
};
pub use stt::{TRANSCRIBE_TIMEOUT, Transcriber, WhisperTranscriber};
pub use tts::{
    CommandSpeaker, OpenAiSpeaker, OpenAiSynthesizer, SYNTHESIS_TIMEOUT, Speaker,
};
pub use wake_word::{DEFAULT_WAKE_PHRASES, WakePhrases};
