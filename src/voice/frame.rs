//! Audio frames and the capture hand-off queue
//!
//! The capture callback is the single producer and the turn loop the single
//! consumer. The producer never blocks: a full queue drops the incoming frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::gate::CaptureGate;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame (0.5 seconds at 16kHz)
pub const FRAME_SAMPLES: usize = 8_000;

/// A fixed-size block of 16-bit mono PCM plus its amplitude score
#[derive(Debug)]
pub struct AudioFrame {
    samples: Box<[i16]>,
    amplitude: f32,
}

impl AudioFrame {
    /// Build a frame, scoring its amplitude
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        let amplitude = l2_norm(&samples);
        Self {
            samples: samples.into_boxed_slice(),
            amplitude,
        }
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// L2 norm of the samples
    #[must_use]
    pub const fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Playback duration of the frame at [`SAMPLE_RATE`]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(SAMPLE_RATE))
    }

    /// Little-endian PCM bytes, as speech engines consume them
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// L2 norm (Euclidean length) of a block of samples
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn l2_norm(samples: &[i16]) -> f32 {
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    sum.sqrt() as f32
}

/// Result of offering a captured frame to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Frame queued for recognition
    Accepted,
    /// Too quiet to be speech
    BelowThreshold,
    /// Not listening, or the system is speaking
    Muted,
    /// Queue at capacity, frame dropped
    Dropped,
    /// Consumer has gone away
    Closed,
}

/// Bounded single-producer/single-consumer hand-off between capture and the turn loop
#[derive(Debug)]
pub struct FrameQueue {
    tx: mpsc::Sender<AudioFrame>,
    rx: mpsc::Receiver<AudioFrame>,
    fault_tx: mpsc::UnboundedSender<String>,
    fault_rx: mpsc::UnboundedReceiver<String>,
    dropped: Arc<AtomicU64>,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            fault_tx,
            fault_rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Producer handle for a capture stream
    #[must_use]
    pub fn sink(&self, gate: Arc<CaptureGate>, threshold: f32) -> FrameSink {
        FrameSink {
            tx: self.tx.clone(),
            faults: self.fault_tx.clone(),
            dropped: Arc::clone(&self.dropped),
            gate,
            threshold,
        }
    }

    /// Next queued frame, if any
    pub fn try_next(&mut self) -> Option<AudioFrame> {
        self.rx.try_recv().ok()
    }

    /// Next reported capture fault, if any
    pub fn try_fault(&mut self) -> Option<String> {
        self.fault_rx.try_recv().ok()
    }

    /// Frames dropped on a full queue since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Discard everything queued so far, returning the number of stale frames
    pub fn drain(&mut self) -> usize {
        let mut stale = 0;
        while self.rx.try_recv().is_ok() {
            stale += 1;
        }
        while self.fault_rx.try_recv().is_ok() {}
        stale
    }

    /// Frames currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer side of the hand-off queue, owned by a capture callback
///
/// Every operation is non-blocking.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    faults: mpsc::UnboundedSender<String>,
    dropped: Arc<AtomicU64>,
    gate: Arc<CaptureGate>,
    threshold: f32,
}

impl FrameSink {
    /// Score a captured block and queue it if it is loud enough and capture is enabled
    pub fn offer(&self, samples: Vec<i16>) -> Admission {
        if !self.gate.admits() {
            return Admission::Muted;
        }

        let frame = AudioFrame::new(samples);
        if frame.amplitude() <= self.threshold {
            return Admission::BelowThreshold;
        }

        match self.tx.try_send(frame) {
            Ok(()) => {
                self.gate.clock().touch();
                Admission::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Admission::Dropped
            }
            Err(TrySendError::Closed(_)) => Admission::Closed,
        }
    }

    /// Report a capture device error to the turn loop
    pub fn fault(&self, message: impl Into<String>) {
        let _ = self.faults.send(message.into());
    }

    /// Amplitude a frame must exceed to be admitted
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Cuts a continuous capture stream into fixed-size frames
///
/// Lives inside the capture callback, so it only buffers and converts.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    /// Create an assembler emitting frames of `frame_samples` samples
    #[must_use]
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append f32 samples in `[-1.0, 1.0]`, emitting each completed frame
    pub fn push_f32(&mut self, data: &[f32], mut emit: impl FnMut(Vec<i16>)) {
        for &sample in data {
            self.pending.push(f32_to_i16(sample));
            if self.pending.len() == self.frame_samples {
                let frame = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_samples),
                );
                emit(frame);
            }
        }
    }

    /// Samples waiting for the current frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Convert an f32 sample in `[-1.0, 1.0]` to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
