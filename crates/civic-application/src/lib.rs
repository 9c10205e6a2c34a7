//! Application layer for CivicSense.
//!
//! Use cases coordinating the domain core with the model, mapping and
//! storage adapters: proposal interviews, vision generation, saturation
//! scoring, neighborhood reports and sample data.

pub mod app;
pub mod prompts;
pub mod report_service;
pub mod scoring_service;
pub mod seed;
pub mod session;
pub mod vision_orchestrator;

pub use app::{CivicApp, MapServices};
pub use prompts::PromptRenderer;
pub use report_service::{NeighborhoodReport, NeighborhoodReportService};
pub use scoring_service::{SaturationReport, ScoringService};
pub use seed::seed_if_empty;
pub use session::{
    DialogueSession, SessionFactory, SessionServices, SessionSnapshot, TurnOutcome, TurnPhase,
    TurnResolution,
};
pub use vision_orchestrator::{SceneAnalysis, VisionOrchestrator, VisionOutcome, VisionRequest};
