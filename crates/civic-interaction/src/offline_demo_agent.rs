//! OfflineDemoAgent - canned planning agent used without an API key.
//!
//! Answers chat turns by keyword so the full dialogue flow (draft, reject,
//! validate) can be exercised offline. JSON-mode requests get one canned
//! object carrying every field the scoring and report services read.

use async_trait::async_trait;
use civic_core::action::{MapAction, ProposalStatus, WirePayload};
use civic_core::geo::LatLng;
use civic_core::inference::{
    InferenceBackend, InferenceError, InferenceRequest, InferenceResponse, ResponseFormat,
};
use std::time::Duration;

pub const DEMO_BACKEND_NAME: &str = "offline-demo";

const REJECT_TEXT: &str = "I cannot approve this proposal. The street is too narrow for a 50-story building; it would block sunlight to the surrounding properties and cause severe traffic congestion. Please suggest a more realistic idea for this site.";
const LIBRARY_DETAILS_TEXT: &str = "A community library is a wonderful idea! Before I can validate it, could you share some building details (how large it should be, any features like a rooftop garden) and your name so we can credit you?";
const VALIDATED_TEXT: &str = "Thank you for those details! A 2-story community library with a children's section and a rooftop reading space suits this area well. I am approving your proposal for the map.";
const SPECIFICS_TEXT: &str = "That's an interesting idea, but I need more specifics to judge whether it is realistic. What exactly would you like to build, are there any design constraints or features in mind, and what is your name?";

const DEMO_JSON: &str = r#"{"weight": 6, "topRecommendation": "Community Library & Learning Center", "communitySentiment": "Residents favour small-scale civic amenities and green space.", "marketGaps": ["Public study space", "Weekend farmers market"]}"#;
const DEMO_ANALYSIS: &str = "Mid-rise mixed-use street with moderate density and a few street trees.";

/// Keyword-driven stand-in for the hosted chat model.
#[derive(Debug, Clone, Default)]
pub struct OfflineDemoAgent {
    latency: Duration,
}

impl OfflineDemoAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated response delay.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn chat_reply(message: &str, location: LatLng) -> String {
        let lower = message.to_lowercase();
        let mut payload = WirePayload::draft(location);

        let text = if lower.contains("skyscraper") {
            payload.status = ProposalStatus::Rejected;
            REJECT_TEXT
        } else if lower.contains("library") && !lower.contains("size") && !lower.contains("name") {
            LIBRARY_DETAILS_TEXT
        } else if lower.contains("size") || lower.contains("name") || lower.contains("john") {
            payload.status = ProposalStatus::Validated;
            payload.map_action = MapAction::Show3D;
            payload.feasibility_score = 90.0;
            payload.idea_title = Some("Community Library & Learning Center".to_string());
            payload.idea_description = Some(
                "A 2-story facility featuring a dedicated children's wing, public computers, and a rooftop reading garden."
                    .to_string(),
            );
            payload.author = Some("John Doe".to_string());
            VALIDATED_TEXT
        } else {
            SPECIFICS_TEXT
        };

        format!("{text}\n{}", payload.to_fenced_block())
    }
}

#[async_trait]
impl InferenceBackend for OfflineDemoAgent {
    fn name(&self) -> &str {
        DEMO_BACKEND_NAME
    }

    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let text = if request.response_format == ResponseFormat::Json {
            DEMO_JSON.to_string()
        } else if request.system_instruction.is_some() {
            let location = request.location.unwrap_or(LatLng::new(0.0, 0.0));
            Self::chat_reply(&request.message, location)
        } else if request.wants_image() {
            // No image model offline: text only, so the vision step falls back
            "Image generation is unavailable in demo mode.".to_string()
        } else {
            DEMO_ANALYSIS.to_string()
        };

        Ok(InferenceResponse::text(DEMO_BACKEND_NAME, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::action::{ParseContext, parse};

    fn chat(message: &str) -> InferenceRequest {
        InferenceRequest::new(message)
            .with_system_instruction("planning agent")
            .with_location(LatLng::new(40.7128, -74.006))
    }

    async fn status_of(message: &str) -> ProposalStatus {
        let response = OfflineDemoAgent::new().generate(&chat(message)).await.unwrap();
        let ctx = ParseContext {
            location: LatLng::new(40.7128, -74.006),
            author_required: true,
        };
        parse(&response.text, &ctx).payload.status()
    }

    #[tokio::test]
    async fn test_keyword_routing() {
        assert_eq!(status_of("I want a skyscraper here").await, ProposalStatus::Rejected);
        assert_eq!(status_of("How about a library?").await, ProposalStatus::Draft);
        assert_eq!(
            status_of("A library, size 2 floors, my name is John").await,
            ProposalStatus::Validated
        );
        assert_eq!(status_of("Something nice").await, ProposalStatus::Draft);
    }

    #[tokio::test]
    async fn test_reply_uses_session_coordinates() {
        let response = OfflineDemoAgent::new().generate(&chat("hello")).await.unwrap();
        assert!(response.text.contains("40.7128"));
        assert_eq!(response.backend, DEMO_BACKEND_NAME);
    }

    #[tokio::test]
    async fn test_json_mode_and_image_requests() {
        let agent = OfflineDemoAgent::new();
        let json = agent.generate(&InferenceRequest::new("rate").json()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json.text).unwrap();
        assert_eq!(value["weight"], 6);

        let image = agent
            .generate(&InferenceRequest::new("render").with_image_output())
            .await
            .unwrap();
        assert!(image.first_image().is_none());
    }
}
