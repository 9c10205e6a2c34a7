//! Proposal domain model.
//!
//! A `Proposal` is only ever created from a validated dialogue; drafts and
//! rejected ideas live exclusively in dialogue session memory.

use crate::geo::LatLng;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scale a numeric score is expressed on.
///
/// The scale is fixed when a dialogue session starts and travels with the
/// value, so 0–10 and 0–100 numbers are never compared or mixed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoreScale {
    /// Feasibility score on 0–100, assigned by the planning agent.
    #[default]
    Feasibility100,
    /// Legacy saturation/feasibility score on 0–10.
    Saturation10,
}

impl ScoreScale {
    pub fn max(&self) -> f64 {
        match self {
            Self::Feasibility100 => 100.0,
            Self::Saturation10 => 10.0,
        }
    }

    /// Default assigned when a proposal is auto-completed without a score.
    pub fn midpoint(&self) -> f64 {
        self.max() / 2.0
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(0.0, self.max())
        } else {
            0.0
        }
    }
}

/// A numeric score together with the scale it was assigned on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub scale: ScoreScale,
}

impl Score {
    /// Creates a score, clamping the value into the scale's range.
    pub fn new(value: f64, scale: ScoreScale) -> Self {
        Self {
            value: scale.clamp(value),
            scale,
        }
    }

    pub fn midpoint(scale: ScoreScale) -> Self {
        Self::new(scale.midpoint(), scale)
    }

    pub fn is_zero(&self) -> bool {
        self.value <= 0.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.value, self.scale.max())
    }
}

/// Rendered illustration attached to a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisionImage {
    /// Image hosted elsewhere.
    Url { url: String },
    /// Base64-encoded image bytes.
    Inline { mime_type: String, data: String },
}

impl VisionImage {
    /// Returns a value suitable for an `<img src>` attribute.
    pub fn to_src(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
        }
    }
}

/// A validated, persisted civic idea tied to a map coordinate ("pin").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Store-assigned identifier.
    pub id: String,
    pub location: LatLng,
    /// Short label of the business or renovation type.
    pub business_type: String,
    /// Free-text description of the idea.
    pub review: String,
    /// Display name, or "Anonymous".
    pub author: String,
    pub agreement_count: u64,
    pub score: Score,
    #[serde(default)]
    pub vision_image: Option<VisionImage>,
    /// Set when this proposal refines an earlier one.
    #[serde(default)]
    pub parent_proposal_id: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Write payload for a new proposal.
///
/// `submission_key` identifies the dialogue session that produced the
/// proposal; stores use it to make repeated create attempts idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub submission_key: String,
    pub location: LatLng,
    pub business_type: String,
    pub review: String,
    pub author: String,
    pub score: Score,
    pub vision_image: Option<VisionImage>,
    pub parent_proposal_id: Option<String>,
    pub flags: Vec<String>,
    pub owner_id: Option<String>,
}

impl NewProposal {
    /// Materializes the stored entity with a fresh agreement count.
    pub fn into_proposal(self, id: impl Into<String>, created_at: DateTime<Utc>) -> Proposal {
        Proposal {
            id: id.into(),
            location: self.location,
            business_type: self.business_type,
            review: self.review,
            author: self.author,
            agreement_count: 0,
            score: self.score,
            vision_image: self.vision_image,
            parent_proposal_id: self.parent_proposal_id,
            flags: self.flags,
            owner_id: self.owner_id,
            created_at,
        }
    }
}

/// Change notification emitted by proposal stores.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalChange {
    Created(Proposal),
    Upvoted { id: String, agreement_count: u64 },
    Deleted { id: String },
}

/// Proposals sharing one site, as shown together in the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalSite {
    pub key: String,
    pub location: LatLng,
    /// Id of the first proposal seen at this site; used as the marker id.
    pub main_proposal_id: String,
    pub proposals: Vec<Proposal>,
}

/// Groups proposals by their rounded coordinates, keeping first-seen order.
pub fn group_by_site(proposals: &[Proposal]) -> Vec<ProposalSite> {
    let mut sites: Vec<ProposalSite> = Vec::new();
    for proposal in proposals {
        let key = proposal.location.site_key();
        match sites.iter_mut().find(|site| site.key == key) {
            Some(site) => site.proposals.push(proposal.clone()),
            None => sites.push(ProposalSite {
                key,
                location: proposal.location,
                main_proposal_id: proposal.id.clone(),
                proposals: vec![proposal.clone()],
            }),
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn proposal(id: &str, lat: f64, lng: f64) -> Proposal {
        NewProposal {
            submission_key: format!("key-{id}"),
            location: LatLng::new(lat, lng),
            business_type: "Cafe".to_string(),
            review: "Small corner cafe".to_string(),
            author: "Anonymous".to_string(),
            score: Score::new(70.0, ScoreScale::Feasibility100),
            vision_image: None,
            parent_proposal_id: None,
            flags: Vec::new(),
            owner_id: None,
        }
        .into_proposal(id, Utc::now())
    }

    #[test]
    fn test_score_clamps_into_scale() {
        assert_eq!(Score::new(140.0, ScoreScale::Feasibility100).value, 100.0);
        assert_eq!(Score::new(14.0, ScoreScale::Saturation10).value, 10.0);
        assert_eq!(Score::new(-3.0, ScoreScale::Saturation10).value, 0.0);
        assert_eq!(Score::new(f64::NAN, ScoreScale::Saturation10).value, 0.0);
        assert_eq!(Score::midpoint(ScoreScale::Feasibility100).value, 50.0);
        assert_eq!(Score::midpoint(ScoreScale::Saturation10).value, 5.0);
    }

    #[test]
    fn test_score_scale_string_forms() {
        assert_eq!(ScoreScale::Feasibility100.to_string(), "feasibility100");
        assert_eq!(
            ScoreScale::from_str("saturation10").unwrap(),
            ScoreScale::Saturation10
        );
    }

    #[test]
    fn test_vision_image_src() {
        let inline = VisionImage::Inline {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        assert_eq!(inline.to_src(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_group_by_site() {
        let proposals = vec![
            proposal("a", 40.7128, -74.0060),
            proposal("b", 40.7135, -74.0045),
            proposal("c", 40.71280000004, -74.0060),
        ];

        let sites = group_by_site(&proposals);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].main_proposal_id, "a");
        assert_eq!(sites[0].proposals.len(), 2);
        assert_eq!(sites[1].proposals[0].id, "b");
    }

    #[test]
    fn test_new_proposal_starts_with_zero_agreement() {
        let p = proposal("x", 1.0, 2.0);
        assert_eq!(p.agreement_count, 0);
        assert_eq!(p.id, "x");
    }
}
