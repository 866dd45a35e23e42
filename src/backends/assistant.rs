//! Cloud assistant backend (`OpenAI` Assistants v2)
//!
//! Each message is appended to a persistent thread and answered by a run
//! that is polled until it reaches a terminal status.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use super::Backend;
use crate::config::AssistantConfig;
use crate::{Error, Result};

const ASSISTANT_NAME: &str = "Jarvis";

/// Upper bound on one HTTP request to the service
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Slack on the polling deadline beyond `poll_interval * max_polls`
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Output submitted for tool calls, since no tools are implemented
const UNAVAILABLE_TOOL_OUTPUT: &str = r#"{"error":"tool not available"}"#;

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    message: String,
}

/// How polling a run ended
#[derive(Debug)]
enum RunEnd {
    Completed,
    /// Terminal status other than completed; the thread is free again
    Failed(Error),
    /// Polling gave up while the run may still hold the thread
    Abandoned(Error),
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

/// Cloud assistant service bound to one assistant and one thread
pub struct AssistantBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    assistant_id: String,
    thread_id: String,
    instructions: String,
    poll_interval: Duration,
    max_polls: u32,
    max_action_rounds: u32,
}

impl std::fmt::Debug for AssistantBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantBackend")
            .field("assistant_id", &self.assistant_id)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl AssistantBackend {
    /// Resolve the configured assistant and thread, creating any that are not configured
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the service rejects the session
    pub async fn connect(config: &AssistantConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_string()))
            .ok_or(Error::BackendUnavailable)?;

        let mut backend = Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            assistant_id: String::new(),
            thread_id: String::new(),
            instructions: config.instructions.clone(),
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
            max_action_rounds: config.max_action_rounds,
        };

        backend.assistant_id = match &config.assistant_id {
            Some(id) => {
                let existing: Created = backend.get(&format!("/assistants/{id}")).await?;
                existing.id
            }
            None => {
                let created: Created = backend
                    .post(
                        "/assistants",
                        &json!({
                            "name": ASSISTANT_NAME,
                            "model": config.model,
                            "instructions": config.instructions,
                        }),
                    )
                    .await?;
                tracing::info!(assistant_id = %created.id, "created assistant");
                created.id
            }
        };

        backend.thread_id = match &config.thread_id {
            Some(id) => {
                let existing: Created = backend.get(&format!("/threads/{id}")).await?;
                existing.id
            }
            None => {
                let created: Created = backend.post("/threads", &json!({})).await?;
                tracing::info!(thread_id = %created.id, "created thread");
                created.id
            }
        };

        tracing::info!(
            assistant_id = %backend.assistant_id,
            thread_id = %backend.thread_id,
            "cloud assistant connected"
        );

        Ok(backend)
    }

    /// Thread all messages are appended to
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Assistant answering the thread
    #[must_use]
    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(format!("{}{path}", self.base_url));
        self.send(request).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        self.send(request).await
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("assistant API error {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("malformed assistant response: {e}")))
    }

    /// Wait for `run` to complete
    ///
    /// A run that is given up on is cancelled, since an active run locks
    /// the thread against new messages.
    async fn await_run(&self, run: Run) -> Result<()> {
        let run_id = run.id.clone();
        match self.poll_run(run).await {
            RunEnd::Completed => Ok(()),
            RunEnd::Failed(e) => Err(e),
            RunEnd::Abandoned(e) => {
                self.cancel_run(&run_id).await;
                Err(e)
            }
        }
    }

    async fn poll_run(&self, mut run: Run) -> RunEnd {
        let deadline = Instant::now() + self.poll_budget();
        let mut action_rounds = 0;

        for _ in 0..self.max_polls {
            match run.status.as_str() {
                "completed" => return RunEnd::Completed,
                "failed" | "cancelled" | "expired" | "incomplete" => {
                    let reason = run
                        .last_error
                        .map(|e| e.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| run.status.clone());
                    return RunEnd::Failed(Error::Backend(format!("run {}: {reason}", run.status)));
                }
                "requires_action" => {
                    action_rounds += 1;
                    if action_rounds > self.max_action_rounds {
                        return RunEnd::Abandoned(Error::Backend(format!(
                            "run still requires action after {} rounds",
                            self.max_action_rounds
                        )));
                    }
                    if let Err(e) = self.submit_tool_outputs(&run).await {
                        return RunEnd::Abandoned(e);
                    }
                }
                status => tracing::trace!(run_id = %run.id, status, "run pending"),
            }

            if Instant::now() >= deadline {
                return RunEnd::Abandoned(Error::Backend(format!(
                    "run did not finish within {}s",
                    self.poll_budget().as_secs()
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
            run = match self
                .get(&format!("/threads/{}/runs/{}", self.thread_id, run.id))
                .await
            {
                Ok(run) => run,
                Err(e) => return RunEnd::Abandoned(e),
            };
        }

        RunEnd::Abandoned(Error::Backend(format!(
            "run did not finish after {} polls",
            self.max_polls
        )))
    }

    /// Best-effort cancel of a run that is no longer awaited
    async fn cancel_run(&self, run_id: &str) {
        let path = format!("/threads/{}/runs/{run_id}/cancel", self.thread_id);
        match self.post::<Run>(&path, &json!({})).await {
            Ok(run) => tracing::info!(run_id, status = %run.status, "cancelled abandoned run"),
            Err(e) => tracing::warn!(run_id, error = %e, "failed to cancel abandoned run"),
        }
    }

    /// Time allowed for polling one run
    fn poll_budget(&self) -> Duration {
        self.poll_interval
            .saturating_mul(self.max_polls)
            .saturating_add(POLL_GRACE)
    }

    async fn submit_tool_outputs(&self, run: &Run) -> Result<()> {
        let tool_outputs: Vec<serde_json::Value> = run
            .required_action
            .as_ref()
            .and_then(|a| a.submit_tool_outputs.as_ref())
            .map(|s| {
                s.tool_calls
                    .iter()
                    .map(|call| json!({"tool_call_id": call.id, "output": UNAVAILABLE_TOOL_OUTPUT}))
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(
            run_id = %run.id,
            tool_calls = tool_outputs.len(),
            "run requires action, submitting tool outputs"
        );

        let _: Run = self
            .post(
                &format!(
                    "/threads/{}/runs/{}/submit_tool_outputs",
                    self.thread_id, run.id
                ),
                &json!({ "tool_outputs": tool_outputs }),
            )
            .await?;
        Ok(())
    }

    async fn latest_reply(&self) -> Result<String> {
        let messages: MessageList = self
            .get(&format!(
                "/threads/{}/messages?order=desc&limit=1",
                self.thread_id
            ))
            .await?;

        let message = messages
            .data
            .into_iter()
            .next()
            .filter(|m| m.role == "assistant")
            .ok_or_else(|| Error::Backend("run completed without an assistant message".to_string()))?;

        let text: Vec<String> = message
            .content
            .into_iter()
            .filter_map(|c| c.text.map(|t| t.value))
            .collect();

        if text.is_empty() {
            return Err(Error::Backend("assistant message has no text".to_string()));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl Backend for AssistantBackend {
    fn name(&self) -> &'static str {
        "assistant"
    }

    async fn reply(&self, message: &str) -> Result<String> {
        let _: Created = self
            .post(
                &format!("/threads/{}/messages", self.thread_id),
                &json!({ "role": "user", "content": message }),
            )
            .await?;

        let run: Run = self
            .post(
                &format!("/threads/{}/runs", self.thread_id),
                &json!({
                    "assistant_id": self.assistant_id,
                    "instructions": self.instructions,
                }),
            )
            .await?;

        tracing::debug!(run_id = %run.id, "run started");
        self.await_run(run).await?;
        self.latest_reply().await
    }

    /// Outlasts every request plus the polling budget, so the run is
    /// always cancelled by [`AssistantBackend::await_run`] before the
    /// caller's timeout could drop it mid-poll
    fn call_timeout(&self) -> Duration {
        self.poll_budget()
            .saturating_add(self.poll_interval)
            .saturating_add(REQUEST_TIMEOUT.saturating_mul(6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_required_action() {
        let run: Run = serde_json::from_value(json!({
            "id": "run_1",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {"tool_calls": [{"id": "call_1", "type": "function"}]}
            }
        }))
        .unwrap();

        let calls = run
            .required_action
            .and_then(|a| a.submit_tool_outputs)
            .map(|s| s.tool_calls.len());
        assert_eq!(calls, Some(1));
    }

    #[test]
    fn test_run_without_action_parses() {
        let run: Run = serde_json::from_value(json!({"id": "run_1", "status": "queued"})).unwrap();
        assert!(run.required_action.is_none());
        assert!(run.last_error.is_none());
    }
}
