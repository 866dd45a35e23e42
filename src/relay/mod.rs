//! UI relay
//!
//! Pushes each conversation turn to a web UI. The client side is a
//! best-effort [`TurnSink`]; the server side is a small axum app that
//! fans posted turns out to WebSocket subscribers.

mod server;

use std::time::Duration;

use serde::Serialize;

use crate::conversation::{ConversationTurn, Role, TurnSink};

pub use server::{RelayHub, router, serve};

/// Per-notification timeout
const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Body posted for each turn
#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    role: Role,
    content: &'a str,
}

/// Posts turns to the relay endpoint without blocking the conversation
#[derive(Debug, Clone)]
pub struct UiRelay {
    client: reqwest::Client,
    url: String,
}

impl UiRelay {
    /// Create a relay client posting to `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Endpoint turns are posted to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one turn, waiting for the response
    ///
    /// # Errors
    ///
    /// Returns error if the relay is unreachable or rejects the turn
    pub async fn notify(&self, turn: &ConversationTurn) -> crate::Result<()> {
        let payload = RelayPayload {
            role: turn.role,
            content: &turn.content,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(RELAY_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(crate::Error::Relay(format!(
                "relay returned {}",
                response.status()
            )))
        }
    }
}

impl TurnSink for UiRelay {
    fn record(&self, turn: &ConversationTurn) {
        let relay = self.clone();
        let turn = turn.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.notify(&turn).await {
                tracing::warn!(url = %relay.url, error = %e, "failed to relay turn");
            }
        });
    }
}
