//! Domain layer of the CivicSense proposal engine.
//!
//! Holds the proposal model, the action payload parser, the proposal state
//! machine and the collaborator traits. Nothing in this crate talks to the
//! network.

pub mod action;
pub mod config;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod geo;
pub mod identity;
pub mod inference;
pub mod proposal;
pub mod scoring;

// Re-export common error type
pub use error::{CivicError, Result};
pub use geo::LatLng;
