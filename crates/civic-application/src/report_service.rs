//! Neighborhood needs report over nearby proposals.

use crate::prompts::PromptRenderer;
use civic_core::error::Result;
use civic_core::geo::LatLng;
use civic_core::inference::{InferenceGateway, InferenceRequest};
use civic_core::proposal::ProposalRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Radius of the proposals considered, in kilometres.
pub const REPORT_RADIUS_KM: f64 = 1.0;

const NO_RECOMMENDATION: &str = "None";
const NOT_ENOUGH_DATA: &str = "Not enough data";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborhoodReport {
    pub top_recommendation: String,
    pub community_sentiment: String,
    pub market_gaps: Vec<String>,
    pub proposals_analyzed: usize,
    /// Set when the summary could not be produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NeighborhoodReport {
    fn empty(proposals_analyzed: usize) -> Self {
        Self {
            top_recommendation: NO_RECOMMENDATION.to_string(),
            community_sentiment: NOT_ENOUGH_DATA.to_string(),
            market_gaps: Vec::new(),
            proposals_analyzed,
            error: None,
        }
    }

    fn failed(proposals_analyzed: usize, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(proposals_analyzed)
        }
    }
}

/// Shape the model is asked to answer with.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelReport {
    top_recommendation: String,
    community_sentiment: String,
    #[serde(default)]
    market_gaps: Vec<String>,
}

pub struct NeighborhoodReportService {
    repository: Arc<dyn ProposalRepository>,
    gateway: InferenceGateway,
    prompts: Arc<PromptRenderer>,
}

impl NeighborhoodReportService {
    pub fn new(
        repository: Arc<dyn ProposalRepository>,
        gateway: InferenceGateway,
        prompts: Arc<PromptRenderer>,
    ) -> Self {
        Self {
            repository,
            gateway,
            prompts,
        }
    }

    /// Summarizes proposals within [`REPORT_RADIUS_KM`] of `center`.
    ///
    /// Without nearby proposals no model is called. A model or decoding
    /// failure yields a report carrying `error`; only store failures are
    /// returned as errors.
    pub async fn generate(&self, center: LatLng) -> Result<NeighborhoodReport> {
        let center = center.validated()?;
        let proposals = self.repository.list_near(center, REPORT_RADIUS_KM).await?;
        if proposals.is_empty() {
            info!(%center, "No proposals nearby, skipping report");
            return Ok(NeighborhoodReport::empty(0));
        }

        let count = proposals.len();
        let prompt = match self.prompts.neighborhood_report(&proposals) {
            Ok(prompt) => prompt,
            Err(e) => return Ok(NeighborhoodReport::failed(count, e.to_string())),
        };

        let response = match self.gateway.generate(&InferenceRequest::new(prompt).json()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Neighborhood report generation failed");
                return Ok(NeighborhoodReport::failed(count, e.to_string()));
            }
        };

        match serde_json::from_str::<ModelReport>(strip_code_fence(&response.text)) {
            Ok(report) => {
                info!(proposals = count, "Neighborhood report generated");
                Ok(NeighborhoodReport {
                    top_recommendation: report.top_recommendation,
                    community_sentiment: report.community_sentiment,
                    market_gaps: report.market_gaps,
                    proposals_analyzed: count,
                    error: None,
                })
            }
            Err(e) => {
                warn!(error = %e, "Neighborhood report was not valid JSON");
                Ok(NeighborhoodReport::failed(
                    count,
                    format!("could not read the report: {e}"),
                ))
            }
        }
    }
}

/// Some models wrap JSON-mode answers in a ```json fence anyway.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
