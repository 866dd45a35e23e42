//! Wake phrase detection
//!
//! Matching runs on finalized transcripts, never on raw audio.

/// Phrases that wake the assistant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePhrases {
    phrases: Vec<String>,
}

impl WakePhrases {
    /// Create a matcher over `phrases`
    ///
    /// Phrases are lowercased and trimmed; blank entries are dropped.
    #[must_use]
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        tracing::debug!(wake_phrases = ?phrases, "wake phrases configured");

        Self { phrases }
    }

    /// Return the first phrase contained in `transcript`, ignoring case
    #[must_use]
    pub fn matches(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|p| normalized.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Configured phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Whether no phrase is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl Default for WakePhrases {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_PHRASES)
    }
}

/// Phrases recognized out of the box, including common mis-hearings
pub const DEFAULT_WAKE_PHRASES: &[&str] = &[
    "hey jarvis",
    "hi jarvis",
    "he jarvis",
    "h jarvis",
    "jarvis",
];
