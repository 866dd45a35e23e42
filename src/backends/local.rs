//! Local model backend (Ollama chat API)

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::Backend;
use crate::config::LocalConfig;
use crate::{Error, Result};

/// Timeout for the startup reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// One message of the running chat memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Local model service with a persisted sliding-window memory
pub struct LocalBackend {
    client: reqwest::Client,
    config: LocalConfig,
    memory: Mutex<Vec<ChatMessage>>,
}

impl LocalBackend {
    /// Create a backend, seeding memory from `config.memory_path`
    pub async fn load(config: LocalConfig) -> Self {
        let memory = load_memory(&config.memory_path).await;
        tracing::debug!(
            messages = memory.len(),
            path = %config.memory_path.display(),
            "loaded local model memory"
        );
        Self {
            client: reqwest::Client::new(),
            config,
            memory: Mutex::new(memory),
        }
    }

    /// Check that the model server answers
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or unhealthy
    pub async fn probe(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "local model server returned {}",
                response.status()
            )))
        }
    }

    /// Messages currently held in memory
    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatMessage> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("local model error {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("malformed local model response: {e}")))?;
        Ok(parsed.message)
    }

    async fn persist(&self, memory: &[ChatMessage]) {
        let path = &self.config.memory_path;
        let result = async {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec_pretty(memory)?;
            tokio::fs::write(path, json).await?;
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist model memory");
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn reply(&self, message: &str) -> Result<String> {
        let mut memory = self.memory.lock().await;

        let start = memory.len().saturating_sub(self.config.memory_window);
        let mut request: Vec<ChatMessage> = memory[start..].to_vec();
        request.push(ChatMessage::user(message));

        // memory only grows once the model has answered
        let reply = self.chat(&request).await?;

        memory.push(ChatMessage::user(message));
        memory.push(ChatMessage {
            role: "assistant".to_string(),
            content: reply.content.clone(),
        });
        self.persist(&memory).await;

        Ok(reply.content)
    }
}

/// Read persisted memory; missing or corrupt files start empty
async fn load_memory(path: &Path) -> Vec<ChatMessage> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "model memory is corrupt, starting empty");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}
