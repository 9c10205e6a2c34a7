use super::DialogueSession;
use crate::prompts::PromptRenderer;
use crate::vision_orchestrator::VisionOrchestrator;
use civic_core::config::DialogueSettings;
use civic_core::error::Result;
use civic_core::geo::LatLng;
use civic_core::identity::IdentityProvider;
use civic_core::inference::InferenceGateway;
use civic_core::proposal::{Proposal, ProposalRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Collaborators shared by every dialogue session.
pub struct SessionServices {
    /// Chat models in fallback order.
    pub chat: InferenceGateway,
    pub vision: Arc<VisionOrchestrator>,
    pub repository: Arc<dyn ProposalRepository>,
    /// Explicit identity; sessions never look up a global "current user".
    pub identity: Arc<dyn IdentityProvider>,
    pub prompts: Arc<PromptRenderer>,
    pub dialogue: DialogueSettings,
    /// Upper bound for one proposal write.
    pub persistence_timeout: Duration,
}

/// Factory for creating dialogue sessions.
///
/// Every session gets a fresh UUID that doubles as the submission key of
/// the proposal it may produce.
pub struct SessionFactory {
    services: Arc<SessionServices>,
}

impl SessionFactory {
    /// Creates a new SessionFactory.
    ///
    /// # Arguments
    ///
    /// * `services` - Collaborators handed to every session
    pub fn new(services: SessionServices) -> Self {
        Self {
            services: Arc::new(services),
        }
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Opens an interview for a new proposal at `location`.
    ///
    /// # Arguments
    ///
    /// * `location` - Site under discussion
    /// * `place_name` - Optional label of the site, used for the vision prompt
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the coordinates are out of range.
    pub fn open(&self, location: LatLng, place_name: Option<String>) -> Result<DialogueSession> {
        let location = location.validated()?;
        let id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %id, %location, "Opening dialogue session");
        Ok(DialogueSession::new(
            id,
            location,
            place_name,
            None,
            self.services.clone(),
        ))
    }

    /// Opens an interview refining an existing proposal.
    ///
    /// The session sits at the parent's coordinates, does not ask for an
    /// author, and links the new proposal to the parent.
    pub fn open_refinement(&self, parent: &Proposal) -> Result<DialogueSession> {
        let location = parent.location.validated()?;
        let id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %id, parent_id = %parent.id, "Opening refinement session");
        Ok(DialogueSession::new(
            id,
            location,
            None,
            Some(parent.clone()),
            self.services.clone(),
        ))
    }
}
