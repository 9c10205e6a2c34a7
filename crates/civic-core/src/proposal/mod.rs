//! Proposal domain module.
//!
//! # Module Structure
//!
//! - `model`: persisted proposal entity, scores, vision images, site grouping
//! - `repository`: document store trait and the shared change feed
//! - `state_machine`: Draft → Validated | Rejected transition contract

mod model;
mod repository;
mod state_machine;

pub use model::{
    group_by_site, NewProposal, Proposal, ProposalChange, ProposalSite, Score, ScoreScale,
    VisionImage,
};
pub use repository::{ChangeFeed, ProposalRepository};
pub use state_machine::{
    AutoCompleteReason, GatheredFields, ProposalStateMachine, RequiredField, Transition,
    TurnDirective, ValidatedProposal,
};
