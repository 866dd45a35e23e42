//! Turn-taking state machine
//!
//! Decides at every moment whether the assistant is waiting for a wake
//! phrase, capturing a request, speaking, or waiting for a follow-up.

mod controller;
mod state;

pub use controller::{ListenOutcome, TurnComponents, TurnController, TurnSettings};
pub use state::{ListenPhase, TurnState};
