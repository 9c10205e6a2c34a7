//! Context capture and vision generation for validated proposals.
//!
//! Every step is best-effort: a failed snapshot, analysis or brief degrades
//! the result, and a failed image leaves `vision_image` empty. Nothing here
//! returns an error to the dialogue.

use crate::prompts::PromptRenderer;
use civic_core::config::TimeoutSettings;
use civic_core::context::{SnapshotProvider, SnapshotView};
use civic_core::geo::LatLng;
use civic_core::inference::{InferenceGateway, InferenceRequest, InlineImage};
use civic_core::proposal::VisionImage;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const STREET_LABEL: &str = "Context A: street view (style)";
const OVERHEAD_LABEL: &str = "Context B: satellite (layout)";

/// What the orchestrator needs to know about a validated idea.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub title: String,
    /// The citizen's idea in their own words, or the validated description.
    pub idea_text: String,
    pub location: LatLng,
    pub place_name: Option<String>,
}

/// Scene descriptions derived from the snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneAnalysis {
    pub street: Option<String>,
    pub overhead: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionOutcome {
    /// An image was generated.
    pub success: bool,
    pub vision_image: Option<VisionImage>,
    pub analysis: SceneAnalysis,
    /// Design brief used for the image prompt.
    pub brief: String,
}

impl VisionOutcome {
    fn without_image(idea_text: &str) -> Self {
        Self {
            success: false,
            vision_image: None,
            analysis: SceneAnalysis::default(),
            brief: idea_text.to_string(),
        }
    }
}

/// Runs snapshot capture, scene analysis, design brief and image generation.
pub struct VisionOrchestrator {
    snapshots: Option<Arc<dyn SnapshotProvider>>,
    analysis: InferenceGateway,
    image: InferenceGateway,
    prompts: Arc<PromptRenderer>,
    timeouts: TimeoutSettings,
}

/// Awaits `future` for at most `limit`, folding errors and timeouts into `None`.
async fn best_effort<T, E, F>(step: &str, limit: Duration, future: F) -> Option<T>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, future).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            warn!(step, error = %error, "Vision step failed");
            None
        }
        Err(_) => {
            warn!(step, timeout_ms = limit.as_millis() as u64, "Vision step timed out");
            None
        }
    }
}

impl VisionOrchestrator {
    /// `snapshots` is `None` when no mapping service is configured.
    pub fn new(
        snapshots: Option<Arc<dyn SnapshotProvider>>,
        analysis: InferenceGateway,
        image: InferenceGateway,
        prompts: Arc<PromptRenderer>,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            snapshots,
            analysis,
            image,
            prompts,
            timeouts,
        }
    }

    /// Produces an illustration for a validated proposal within the
    /// configured overall bound.
    pub async fn on_validated(&self, request: &VisionRequest) -> VisionOutcome {
        let started = Instant::now();
        let limit = self.timeouts.vision_total();
        match timeout(limit, self.run(request)).await {
            Ok(outcome) => {
                info!(
                    success = outcome.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Vision pipeline finished"
                );
                outcome
            }
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Vision pipeline timed out");
                VisionOutcome::without_image(&request.idea_text)
            }
        }
    }

    async fn run(&self, request: &VisionRequest) -> VisionOutcome {
        let (street_image, overhead_image) = tokio::join!(
            self.capture(SnapshotView::StreetLevel, request.location),
            self.capture(SnapshotView::Overhead, request.location),
        );

        let (street, overhead) = tokio::join!(
            self.analyze(street_image.as_ref(), self.prompts.street_analysis()),
            self.analyze(overhead_image.as_ref(), self.prompts.overhead_analysis()),
        );
        let analysis = SceneAnalysis { street, overhead };

        let brief = self.design_brief(request, &analysis).await;
        let vision_image = self
            .generate_image(request, &brief, street_image, overhead_image)
            .await;

        VisionOutcome {
            success: vision_image.is_some(),
            vision_image,
            analysis,
            brief,
        }
    }

    async fn capture(&self, view: SnapshotView, at: LatLng) -> Option<InlineImage> {
        let provider = self.snapshots.as_ref()?;
        let image = best_effort("snapshot", self.timeouts.snapshot(), provider.capture(view, at)).await;
        debug!(%view, captured = image.is_some(), "Snapshot attempt");
        image
    }

    async fn analyze(&self, image: Option<&InlineImage>, prompt: &str) -> Option<String> {
        let image = image?.clone();
        let request = InferenceRequest::new(prompt).with_attachment(None, image);
        let response = best_effort("scene_analysis", self.timeouts.analysis(), self.analysis.generate(&request)).await?;
        let text = response.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Falls back to the citizen's own words.
    async fn design_brief(&self, request: &VisionRequest, analysis: &SceneAnalysis) -> String {
        let prompt = match self.prompts.design_brief(
            &request.idea_text,
            request.place_name.as_deref(),
            analysis.street.as_deref(),
            analysis.overhead.as_deref(),
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "Design brief prompt failed to render");
                return request.idea_text.clone();
            }
        };

        let inference = InferenceRequest::new(prompt).with_location(request.location);
        match best_effort("design_brief", self.timeouts.analysis(), self.analysis.generate(&inference)).await {
            Some(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            _ => request.idea_text.clone(),
        }
    }

    async fn generate_image(
        &self,
        request: &VisionRequest,
        brief: &str,
        street: Option<InlineImage>,
        overhead: Option<InlineImage>,
    ) -> Option<VisionImage> {
        let prompt = match self.prompts.image_prompt(
            &request.title,
            brief,
            request.location,
            request.place_name.as_deref(),
            street.is_some(),
            overhead.is_some(),
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "Image prompt failed to render");
                return None;
            }
        };

        let mut inference = InferenceRequest::new(prompt)
            .with_image_output()
            .with_location(request.location);
        if let Some(image) = street {
            inference = inference.with_attachment(Some(STREET_LABEL.to_string()), image);
        }
        if let Some(image) = overhead {
            inference = inference.with_attachment(Some(OVERHEAD_LABEL.to_string()), image);
        }

        // Bounded by the overall pipeline timeout
        let response = match self.image.generate(&inference).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Image generation failed");
                return None;
            }
        };
        match response.first_image() {
            Some(image) => Some(image.clone().into_vision_image()),
            None => {
                warn!(backend = %response.backend, "Image model returned no image");
                None
            }
        }
    }
}
