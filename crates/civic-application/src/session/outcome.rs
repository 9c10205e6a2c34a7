//! Values returned to callers of a dialogue session.

use crate::vision_orchestrator::VisionOutcome;
use civic_core::action::{MapDirective, ProposalStatus};
use civic_core::dialogue::ConversationMessage;
use civic_core::geo::LatLng;
use civic_core::proposal::{Proposal, RequiredField, Score};

/// Progress of the turn currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingAgent,
    /// Snapshots, scene analysis and image generation (the slow path).
    GeneratingVision,
    Saving,
    /// The proposal was persisted; the session is closed.
    Completed,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResolution {
    /// The interview continues.
    Drafting { missing: Vec<RequiredField> },
    /// The realism filter turned the idea down; the next message starts over.
    Rejected,
    /// No model answered. Nothing changed; the same message may be resent.
    AgentUnavailable { message: String },
    /// The validated proposal was written.
    Persisted {
        proposal: Proposal,
        vision: VisionOutcome,
    },
    /// The write failed or timed out. Status is back to `Draft` and
    /// `retry_save` may be called.
    SaveFailed { message: String },
}

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Agent text with structured blocks removed.
    pub display_text: String,
    pub status: ProposalStatus,
    pub score: Option<Score>,
    /// Map side effect for the caller to apply.
    pub map: MapDirective,
    pub resolution: TurnResolution,
}

impl TurnOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self.resolution, TurnResolution::Persisted { .. })
    }

    pub fn persisted_proposal(&self) -> Option<&Proposal> {
        match &self.resolution {
            TurnResolution::Persisted { proposal, .. } => Some(proposal),
            _ => None,
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub location: LatLng,
    pub parent_proposal_id: Option<String>,
    pub status: ProposalStatus,
    pub score: Option<Score>,
    pub stalled_turns: u32,
    pub history: Vec<ConversationMessage>,
    /// A validated proposal is waiting for `retry_save`.
    pub save_pending: bool,
    pub closed: bool,
}
