//! Conversation orchestration
//!
//! Turns recognized text into a spoken reply through the backend chosen at
//! startup, recording every user and assistant turn along the way.

mod history;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backends::Backend;

pub use history::{HistorySink, HistoryStore};

/// Spoken when no backend is available
pub const NO_BACKEND_REPLY: &str = "I'm sorry, but I don't have an AI model available right now.";

/// Spoken when a backend call fails
pub const BACKEND_ERROR_REPLY: &str = "I encountered an error processing your request.";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One user utterance or assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,

    /// Absent in records written by older tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    /// A user turn stamped now
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant turn stamped now
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Receives every recorded turn
///
/// Called on the turn loop, so implementations must hand the work off and
/// return immediately. Failures are theirs to log.
pub trait TurnSink: Send + Sync {
    /// Accept one turn
    fn record(&self, turn: &ConversationTurn);
}

/// Routes user text to the selected backend
pub struct Conversation {
    backend: Option<Box<dyn Backend>>,
    sinks: Vec<Arc<dyn TurnSink>>,
}

impl Conversation {
    /// Create an orchestrator; `None` means every request gets the apology
    #[must_use]
    pub fn new(backend: Option<Box<dyn Backend>>) -> Self {
        match &backend {
            Some(b) => tracing::info!(backend = b.name(), "conversation backend selected"),
            None => tracing::warn!("no conversation backend available"),
        }
        Self {
            backend,
            sinks: Vec::new(),
        }
    }

    /// Also deliver recorded turns to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TurnSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Name of the selected backend
    #[must_use]
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Produce the reply to speak for `text`
    ///
    /// Never fails: backend errors and timeouts become a fixed apology.
    /// Records the user turn before the backend call and the reply after.
    pub async fn dispatch(&self, text: &str) -> String {
        self.record(&ConversationTurn::user(text));

        let reply = match &self.backend {
            None => NO_BACKEND_REPLY.to_string(),
            Some(backend) => {
                let started = std::time::Instant::now();
                match tokio::time::timeout(backend.call_timeout(), backend.reply(text)).await {
                    Ok(Ok(reply)) if !reply.trim().is_empty() => {
                        tracing::debug!(
                            backend = backend.name(),
                            elapsed_ms = started.elapsed().as_millis(),
                            "backend replied"
                        );
                        reply
                    }
                    Ok(Ok(_)) => {
                        tracing::warn!(backend = backend.name(), "backend returned an empty reply");
                        BACKEND_ERROR_REPLY.to_string()
                    }
                    Ok(Err(e)) => {
                        tracing::error!(backend = backend.name(), error = %e, "backend call failed");
                        BACKEND_ERROR_REPLY.to_string()
                    }
                    Err(_) => {
                        tracing::error!(
                            backend = backend.name(),
                            timeout_secs = backend.call_timeout().as_secs(),
                            "backend call timed out"
                        );
                        BACKEND_ERROR_REPLY.to_string()
                    }
                }
            }
        };

        self.record(&ConversationTurn::assistant(reply.clone()));
        reply
    }

    fn record(&self, turn: &ConversationTurn) {
        tracing::info!(role = %turn.role, content = %turn.content, "turn");
        for sink in &self.sinks {
            sink.record(turn);
        }
    }
}
