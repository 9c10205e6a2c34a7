//! Action payload module.
//!
//! # Module Structure
//!
//! - `payload`: wire and typed forms of the per-turn control signal
//! - `parser`: extraction from free agent text with cascading fallback

mod parser;
mod payload;

pub use parser::{parse, ParseContext, ParsedReply, PayloadSource};
pub use payload::{
    ActionPayload, DraftPayload, MapAction, MapDirective, ProposalStatus, RejectedPayload,
    ValidatedPayload, WirePayload,
};
