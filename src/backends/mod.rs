//! Language-model backends
//!
//! One backend is selected at startup and kept for the life of the process.

mod assistant;
mod local;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::config::Config;

pub use assistant::AssistantBackend;
pub use local::{ChatMessage, LocalBackend};

/// A service that answers user messages
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Send `message` and wait for the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails, reports a terminal status, or
    /// returns a malformed response
    async fn reply(&self, message: &str) -> Result<String>;

    /// Upper bound on one [`Backend::reply`] call
    fn call_timeout(&self) -> Duration {
        Duration::from_secs(120)
    }
}

/// Pick the first available backend: cloud assistant, then local model
///
/// Returns `None` when neither is reachable.
pub async fn select_backend(config: &Config) -> Option<Box<dyn Backend>> {
    if config.assistant.api_key.is_some() {
        match AssistantBackend::connect(&config.assistant).await {
            Ok(backend) => return Some(Box::new(backend)),
            Err(e) => tracing::warn!(error = %e, "cloud assistant unavailable"),
        }
    } else {
        tracing::debug!("no API key configured, skipping cloud assistant");
    }

    if config.local.enabled {
        let backend = LocalBackend::load(config.local.clone()).await;
        match backend.probe().await {
            Ok(()) => return Some(Box::new(backend)),
            Err(e) => tracing::warn!(url = %config.local.url, error = %e, "local model unavailable"),
        }
    }

    None
}
