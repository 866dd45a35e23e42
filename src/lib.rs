//! Jarvis - wake-word voice assistant front-end
//!
//! This library provides the core functionality for the Jarvis daemon:
//! - Audio capture gated by a turn-taking state machine
//! - Streaming speech recognition and wake phrase matching
//! - Conversation routing to a cloud assistant or local model
//! - Append-only history and a web UI relay
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌────────────┐  events  ┌────────────────┐
//! │ capture      ├──────────►│ recognizer ├─────────►│ turn controller│
//! │ (callback)   │ bounded   └────────────┘          └───────┬────────┘
//! └──────▲───────┘ queue                                     │ text
//!        │ gate (listening / speaking)              ┌────────▼────────┐
//!        └──────────────────────────────────────────┤  conversation   │
//!                                                   └──┬───────────┬──┘
//!                                          history sink│           │UI relay
//! ```

pub mod backends;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod relay;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use conversation::{
    BACKEND_ERROR_REPLY, Conversation, ConversationTurn, NO_BACKEND_REPLY, Role, TurnSink,
};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use turn::{TurnController, TurnState};
