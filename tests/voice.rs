//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jarvis_voice::Error;
use jarvis_voice::voice::{
    Admission, AudioFrame, CaptureGate, EndpointConfig, FrameQueue, RecognitionEvent, Recognizer,
    OpenAiSynthesizer, RecognizerFactory, SAMPLE_RATE, StreamingRecognizer, StreamingRecognizers,
    Transcriber, WakePhrases, WhisperTranscriber, samples_to_wav,
};
use secrecy::SecretString;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One utterance: 200ms of tone followed by 300ms of silence
fn spoken_frame() -> AudioFrame {
    let mut samples: Vec<i16> = (0..3_200)
        .map(|i| if i % 2 == 0 { 6_000 } else { -6_000 })
        .collect();
    samples.extend(std::iter::repeat_n(0, 4_800));
    AudioFrame::new(samples)
}

async fn whisper_server(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn transcriber_for(server: &MockServer, api_key: Option<&str>) -> WhisperTranscriber {
    WhisperTranscriber::new(
        format!("{}/v1/audio/transcriptions", server.uri()),
        "whisper-1".to_string(),
        api_key.map(|k| SecretString::from(k.to_string())),
    )
}

#[test]
fn test_default_wake_phrases() {
    let wake = WakePhrases::default();

    assert_eq!(wake.matches("Hey Jarvis, lights on"), Some("hey jarvis"));
    assert_eq!(wake.matches("jarvis?"), Some("jarvis"));
    assert_eq!(wake.matches("hey travis"), None);
}

#[test]
fn test_configured_wake_phrases_replace_defaults() {
    let wake = WakePhrases::new(["  Computer ", ""]);

    assert_eq!(wake.phrases(), &["computer".to_string()]);
    assert_eq!(wake.matches("hey jarvis"), None);
    assert_eq!(wake.matches("COMPUTER"), Some("computer"));
}

#[test]
fn test_wav_header_for_stt() {
    let samples: Vec<i16> = (0..1_600i16).map(|i| i % 100).collect();
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.duration(), 1_600);
}

#[test]
fn test_capture_thread_never_blocks_on_full_queue() {
    let gate = Arc::new(CaptureGate::new());
    gate.open_listening();

    let mut queue = FrameQueue::new(4);
    let sink = queue.sink(Arc::clone(&gate), 0.0);

    let producer = std::thread::spawn(move || {
        (1..=10i16)
            .map(|n| sink.offer(vec![n * 100; 800]))
            .collect::<Vec<_>>()
    });
    let admissions = producer.join().unwrap();

    assert_eq!(&admissions[..4], &[Admission::Accepted; 4]);
    assert!(admissions[4..].iter().all(|a| *a == Admission::Dropped));

    // oldest frames survive, newest were dropped
    let kept: Vec<i16> = std::iter::from_fn(|| queue.try_next())
        .map(|f| f.samples()[0])
        .collect();
    assert_eq!(kept, vec![100, 200, 300, 400]);
}

#[test]
fn test_muted_gate_keeps_queue_empty() {
    let gate = Arc::new(CaptureGate::new());
    let mut queue = FrameQueue::new(4);
    let sink = queue.sink(Arc::clone(&gate), 0.0);

    gate.open_listening();
    gate.set_speaking(true);
    assert_eq!(sink.offer(vec![9_000; 800]), Admission::Muted);

    gate.set_speaking(false);
    gate.close_listening();
    assert_eq!(sink.offer(vec![9_000; 800]), Admission::Muted);

    assert!(queue.try_next().is_none());
}

#[tokio::test]
async fn test_whisper_transcribe_sends_bearer_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hey jarvis"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let wav = samples_to_wav(&[0; 160], SAMPLE_RATE).unwrap();
    let text = transcriber_for(&server, Some("sk-test"))
        .transcribe(wav)
        .await
        .unwrap();

    assert_eq!(text, "hey jarvis");
}

#[tokio::test]
async fn test_whisper_error_status_is_stt_error() {
    let server = whisper_server(500, serde_json::json!({"error": "overloaded"})).await;

    let wav = samples_to_wav(&[0; 160], SAMPLE_RATE).unwrap();
    let err = transcriber_for(&server, None)
        .transcribe(wav)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Stt(_)), "{err:?}");
}

#[tokio::test]
async fn test_streaming_recognizer_over_whisper() {
    let server = whisper_server(200, serde_json::json!({"text": " Turn on the lights. "})).await;
    let mut recognizer = StreamingRecognizer::new(
        Arc::new(transcriber_for(&server, None)),
        EndpointConfig::default(),
    );

    let event = recognizer.feed(spoken_frame()).await;

    assert_eq!(
        event,
        RecognitionEvent::FinalText("Turn on the lights.".to_string())
    );
    assert!(!recognizer.has_pending());
}

#[tokio::test]
async fn test_blank_marker_is_final_empty() {
    let server = whisper_server(200, serde_json::json!({"text": "[BLANK_AUDIO]"})).await;
    let mut recognizer = StreamingRecognizer::new(
        Arc::new(transcriber_for(&server, None)),
        EndpointConfig::default(),
    );

    assert_eq!(
        recognizer.feed(spoken_frame()).await,
        RecognitionEvent::FinalEmpty
    );
}

#[tokio::test]
async fn test_transcription_failure_is_final_empty() {
    let server = whisper_server(503, serde_json::json!({})).await;
    let factory = StreamingRecognizers::new(
        Arc::new(transcriber_for(&server, None)),
        EndpointConfig::default(),
    );
    let mut recognizer = factory.create();

    assert_eq!(
        recognizer.feed(spoken_frame()).await,
        RecognitionEvent::FinalEmpty
    );
}

#[tokio::test]
async fn test_finish_commits_partial_audio() {
    let server = whisper_server(200, serde_json::json!({"text": "jarvis"})).await;
    let mut recognizer = StreamingRecognizer::new(
        Arc::new(transcriber_for(&server, None)),
        EndpointConfig::default(),
    );

    // continuous speech never closes on its own
    let frame = AudioFrame::new(vec![6_000; 8_000]);
    assert_eq!(recognizer.feed(frame).await, RecognitionEvent::Partial);
    assert!(recognizer.has_pending());

    assert_eq!(
        recognizer.finish().await,
        RecognitionEvent::FinalText("jarvis".to_string())
    );
    assert!(!recognizer.has_pending());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stalled_transcription_times_out_as_final_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"text": "too late"}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let transcriber = transcriber_for(&server, None).with_timeout(Duration::from_millis(200));
    let mut recognizer = StreamingRecognizer::new(Arc::new(transcriber), EndpointConfig::default());

    let started = Instant::now();
    assert_eq!(
        recognizer.feed(spoken_frame()).await,
        RecognitionEvent::FinalEmpty
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!recognizer.has_pending());
}

#[tokio::test]
async fn test_stalled_speech_synthesis_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 16])
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let synthesizer = OpenAiSynthesizer::new(
        &format!("{}/v1/", server.uri()),
        SecretString::from("sk-test".to_string()),
        "tts-1".to_string(),
        "onyx".to_string(),
        1.0,
    )
    .with_timeout(Duration::from_millis(200));

    let started = Instant::now();
    assert!(synthesizer.synthesize("hello").await.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_speech_synthesis_returns_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 16]))
        .expect(1)
        .mount(&server)
        .await;

    let synthesizer = OpenAiSynthesizer::new(
        &format!("{}/v1", server.uri()),
        SecretString::from("sk-test".to_string()),
        "tts-1".to_string(),
        "onyx".to_string(),
        1.0,
    );

    assert_eq!(synthesizer.synthesize("hello").await.unwrap(), vec![7u8; 16]);
}
