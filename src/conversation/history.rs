//! Append-only conversation history
//!
//! Stored as a JSON array of turns. Appends are read-modify-write through a
//! temporary file, so a crash mid-write leaves the previous log intact.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use super::{ConversationTurn, TurnSink};
use crate::{Error, Result};

/// History log on disk
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Open the log at `path`; the file is created on first append
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all turns
    ///
    /// A missing, unreadable or corrupt log reads as empty.
    pub async fn load(&self) -> Vec<ConversationTurn> {
        self.read().await.unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to read history");
            Vec::new()
        })
    }

    /// Append one turn
    ///
    /// # Errors
    ///
    /// Returns error if the existing log cannot be read or the log cannot be
    /// written; an unreadable log is left untouched
    pub async fn append(&self, turn: &ConversationTurn) -> Result<()> {
        let mut turns = self.read().await?;
        turns.push(turn.clone());
        self.write_all(&turns).await
    }

    /// Read the log, failing only when existing content cannot be read
    async fn read(&self) -> Result<Vec<ConversationTurn>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Persistence(format!("failed to read history: {e}"))),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "history is corrupt, treating as empty"
            );
            Vec::new()
        }))
    }

    async fn write_all(&self, turns: &[ConversationTurn]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("failed to create history dir: {e}")))?;
        }

        let json = serde_json::to_vec_pretty(turns)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write history: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("failed to replace history: {e}")))?;

        Ok(())
    }
}

enum Command {
    Append(ConversationTurn),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget [`TurnSink`] backed by a [`HistoryStore`]
///
/// Turns are written in order by a background task. Write failures are
/// logged and dropped.
#[derive(Debug, Clone)]
pub struct HistorySink {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append(turn) => f.debug_tuple("Append").field(&turn.role).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl HistorySink {
    /// Start the writer task
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn spawn(store: HistoryStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Append(turn) => {
                        if let Err(e) = store.append(&turn).await {
                            tracing::warn!(
                                path = %store.path().display(),
                                error = %e,
                                "failed to persist turn"
                            );
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("history writer stopped");
        });

        Self { tx }
    }

    /// Wait until every turn recorded so far has been written
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl TurnSink for HistorySink {
    fn record(&self, turn: &ConversationTurn) {
        if self.tx.send(Command::Append(turn.clone())).is_err() {
            tracing::warn!("history writer is gone, dropping turn");
        }
    }
}
