//! Action payload: the structured control signal embedded in agent replies.
//!
//! The wire form is a loosely-shaped JSON object; it is validated once at the
//! parser boundary into [`ActionPayload`], so downstream code never sees a
//! "maybe validated" shape.

use crate::geo::LatLng;
use serde::{Deserialize, Serialize};

/// Map side effect requested by the agent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum MapAction {
    #[serde(rename = "MOVE_TO")]
    #[strum(serialize = "MOVE_TO")]
    MoveTo,
    #[serde(rename = "SHOW_PINS")]
    #[strum(serialize = "SHOW_PINS")]
    ShowPins,
    #[serde(rename = "SHOW_3D_SIMULATION")]
    #[strum(serialize = "SHOW_3D_SIMULATION")]
    Show3D,
    #[default]
    #[serde(rename = "NONE")]
    #[strum(serialize = "NONE")]
    None,
}

/// Lifecycle status of a proposal under discussion.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ProposalStatus {
    #[default]
    #[serde(rename = "DRAFT")]
    #[strum(serialize = "DRAFT")]
    Draft,
    #[serde(rename = "VALIDATED")]
    #[strum(serialize = "VALIDATED")]
    Validated,
    #[serde(rename = "REJECTED")]
    #[strum(serialize = "REJECTED")]
    Rejected,
}

/// Map action plus the coordinates it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapDirective {
    pub action: MapAction,
    pub coordinates: LatLng,
}

impl MapDirective {
    pub fn none(coordinates: LatLng) -> Self {
        Self {
            action: MapAction::None,
            coordinates,
        }
    }
}

/// Interview still in progress. Partial fields are whatever the agent has
/// gathered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftPayload {
    pub map: MapDirective,
    pub score: f64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub flags: Vec<String>,
    /// The agent claimed VALIDATED without the required fields.
    pub incomplete_validation: bool,
}

/// Agent approved the idea and supplied every required field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload {
    pub map: MapDirective,
    pub score: f64,
    pub title: String,
    pub description: String,
    /// Optional only for refinements of an existing proposal.
    pub author: Option<String>,
    pub flags: Vec<String>,
}

/// Agent's realism filter rejected the idea.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedPayload {
    pub map: MapDirective,
    pub score: f64,
    pub title: Option<String>,
    pub flags: Vec<String>,
}

/// Typed action payload, one per agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    Draft(DraftPayload),
    Validated(ValidatedPayload),
    Rejected(RejectedPayload),
}

impl ActionPayload {
    /// The safe default used whenever agent output cannot be decoded.
    pub fn default_for(location: LatLng) -> Self {
        Self::Draft(DraftPayload {
            map: MapDirective::none(location),
            score: 0.0,
            title: None,
            description: None,
            author: None,
            flags: Vec::new(),
            incomplete_validation: false,
        })
    }

    pub fn status(&self) -> ProposalStatus {
        match self {
            Self::Draft(_) => ProposalStatus::Draft,
            Self::Validated(_) => ProposalStatus::Validated,
            Self::Rejected(_) => ProposalStatus::Rejected,
        }
    }

    pub fn map(&self) -> MapDirective {
        match self {
            Self::Draft(p) => p.map,
            Self::Validated(p) => p.map,
            Self::Rejected(p) => p.map,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::Draft(p) => p.score,
            Self::Validated(p) => p.score,
            Self::Rejected(p) => p.score,
        }
    }
}

/// Serializable wire form, as the agent is instructed to emit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePayload {
    pub map_action: MapAction,
    pub coordinates: LatLng,
    pub feasibility_score: f64,
    pub status: ProposalStatus,
    pub idea_title: Option<String>,
    pub idea_description: Option<String>,
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl WirePayload {
    pub fn draft(coordinates: LatLng) -> Self {
        Self {
            map_action: MapAction::None,
            coordinates,
            feasibility_score: 0.0,
            status: ProposalStatus::Draft,
            idea_title: None,
            idea_description: None,
            author: None,
            flags: Vec::new(),
        }
    }

    /// Renders the payload as the fenced block appended to agent replies.
    pub fn to_fenced_block(&self) -> String {
        let body = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        format!("```json\n{body}\n```")
    }
}
