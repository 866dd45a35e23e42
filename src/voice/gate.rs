//! Capture gate shared between the audio callback and the turn loop
//!
//! The capture callback runs on the audio subsystem's own thread, so every
//! value it reads here is atomic. The turn loop is the only writer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Admission flags read by the capture callback
#[derive(Debug)]
pub struct CaptureGate {
    listening: AtomicBool,
    speaking: AtomicBool,
    clock: SessionClock,
}

impl CaptureGate {
    /// Create a closed gate (not listening, not speaking)
    #[must_use]
    pub fn new() -> Self {
        Self {
            listening: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            clock: SessionClock::new(),
        }
    }

    /// Allow frames into the hand-off queue
    pub fn open_listening(&self) {
        self.listening.store(true, Ordering::Release);
    }

    /// Stop admitting frames
    pub fn close_listening(&self) {
        self.listening.store(false, Ordering::Release);
    }

    /// Mark speech output as active or finished
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Release);
    }

    /// Whether a listening phase is active
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Whether the system is currently speaking
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Whether a captured frame may be admitted right now
    #[must_use]
    pub fn admits(&self) -> bool {
        self.is_listening() && !self.is_speaking()
    }

    /// Last meaningful user input
    #[must_use]
    pub const fn clock(&self) -> &SessionClock {
        &self.clock
    }
}

impl Default for CaptureGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp of the last meaningful user input
///
/// Stored as milliseconds since the clock was created so it can live in a
/// single atomic.
#[derive(Debug)]
pub struct SessionClock {
    origin: Instant,
    last_input_ms: AtomicU64,
}

impl SessionClock {
    /// Create a clock whose last input is "now"
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_input_ms: AtomicU64::new(0),
        }
    }

    /// Record user input at the current instant
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_input_ms.store(elapsed, Ordering::Release);
    }

    /// Time since the last recorded input
    #[must_use]
    pub fn since_last_input(&self) -> Duration {
        let last = Duration::from_millis(self.last_input_ms.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
