//! Dialogue session services.
//!
//! This module contains the proposal interview session, the factory that
//! opens sessions with their collaborators, and the values sessions report
//! back to callers.

mod dialogue;
mod factory;
mod outcome;

pub use dialogue::DialogueSession;
pub use factory::{SessionFactory, SessionServices};
pub use outcome::{SessionSnapshot, TurnOutcome, TurnPhase, TurnResolution};
