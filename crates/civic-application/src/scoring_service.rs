//! Market saturation scoring for a business type at a site.

use crate::prompts::PromptRenderer;
use civic_core::context::NearbySearch;
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::inference::{InferenceGateway, InferenceRequest};
use civic_core::scoring::{
    COMPETITOR_RADIUS_M, DEFAULT_DEMAND_WEIGHT, compute_saturation, parse_demand_weight,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Inputs and result of one saturation analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationReport {
    pub demand_weight: u8,
    pub competitor_count: u32,
    /// `demand_weight / (competitor_count + 1)`; larger is less saturated.
    pub saturation_index: f64,
}

/// Rates demand with the JSON-mode gateway and counts nearby competitors.
///
/// Both inputs are fail-soft: an unusable rating becomes the default weight
/// and a failed search counts zero competitors.
pub struct ScoringService {
    gateway: InferenceGateway,
    nearby: Option<Arc<dyn NearbySearch>>,
    prompts: Arc<PromptRenderer>,
    search_timeout: Duration,
}

impl ScoringService {
    pub fn new(
        gateway: InferenceGateway,
        nearby: Option<Arc<dyn NearbySearch>>,
        prompts: Arc<PromptRenderer>,
        search_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            nearby,
            prompts,
            search_timeout,
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for a blank business type or invalid
    /// coordinates. Collaborator failures never surface.
    pub async fn analyze(
        &self,
        business_type: &str,
        review: &str,
        location: LatLng,
    ) -> Result<SaturationReport> {
        let business_type = business_type.trim();
        if business_type.is_empty() {
            return Err(CivicError::invalid_input("business type must not be empty"));
        }
        let location = location.validated()?;

        let (demand_weight, competitor_count) = tokio::join!(
            self.demand_weight(business_type, review),
            self.competitor_count(business_type, location),
        );
        let saturation_index = compute_saturation(demand_weight, competitor_count);

        info!(
            business_type,
            demand_weight, competitor_count, saturation_index, "Saturation computed"
        );
        Ok(SaturationReport {
            demand_weight,
            competitor_count,
            saturation_index,
        })
    }

    async fn demand_weight(&self, business_type: &str, review: &str) -> u8 {
        let prompt = match self.prompts.demand_weight(business_type, review) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "Demand prompt failed to render");
                return DEFAULT_DEMAND_WEIGHT;
            }
        };
        match self.gateway.generate(&InferenceRequest::new(prompt).json()).await {
            Ok(response) => parse_demand_weight(&response.text),
            Err(e) => {
                warn!(error = %e, "Demand rating failed, using default weight");
                DEFAULT_DEMAND_WEIGHT
            }
        }
    }

    async fn competitor_count(&self, keyword: &str, location: LatLng) -> u32 {
        let Some(nearby) = &self.nearby else {
            return 0;
        };
        let search = nearby.count_nearby(location, COMPETITOR_RADIUS_M, keyword);
        match tokio::time::timeout(self.search_timeout, search).await {
            Ok(Ok(count)) => u32::try_from(count).unwrap_or(u32::MAX),
            Ok(Err(e)) => {
                warn!(error = %e, "Nearby search failed, assuming no competitors");
                0
            }
            Err(_) => {
                warn!("Nearby search timed out, assuming no competitors");
                0
            }
        }
    }
}
