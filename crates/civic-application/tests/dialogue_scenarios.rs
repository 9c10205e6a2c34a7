//! End-to-end interview scenarios against the offline demo agent.

use async_trait::async_trait;
use civic_application::{
    DialogueSession, PromptRenderer, SessionFactory, SessionServices, TurnPhase, TurnResolution,
    VisionOrchestrator,
};
use civic_core::action::{MapAction, ProposalStatus, WirePayload};
use civic_core::config::{DialogueSettings, TimeoutSettings};
use civic_core::context::{SnapshotProvider, SnapshotView};
use civic_core::dialogue::MessageRole;
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::identity::{GuestIdentity, Identity, IdentityProvider};
use civic_core::inference::{
    InferenceBackend, InferenceError, InferenceGateway, InferenceRequest, InferenceResponse,
    InlineImage,
};
use civic_core::proposal::{NewProposal, Proposal, ProposalChange, ProposalRepository, ScoreScale};
use civic_infrastructure::{InMemoryProposalRepository, StaticIdentity};
use civic_interaction::OfflineDemoAgent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Test doubles
// ============================================================================

/// Every snapshot fetch fails as if the network were down.
struct NetworkDown;

#[async_trait]
impl SnapshotProvider for NetworkDown {
    async fn capture(&self, _view: SnapshotView, _at: LatLng) -> Result<InlineImage> {
        Err(CivicError::gateway("google_maps", "network unreachable", true))
    }
}

/// Model endpoint that always fails.
struct UnreachableModel;

#[async_trait]
impl InferenceBackend for UnreachableModel {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn generate(
        &self,
        _request: &InferenceRequest,
    ) -> std::result::Result<InferenceResponse, InferenceError> {
        Err(InferenceError::Http {
            status: None,
            message: "connection refused".to_string(),
            retryable: true,
            retry_after: None,
        })
    }
}

/// Answers with prepared replies, in order.
struct ScriptedAgent {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedAgent {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
        })
    }
}

#[async_trait]
impl InferenceBackend for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _request: &InferenceRequest,
    ) -> std::result::Result<InferenceResponse, InferenceError> {
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => Ok(InferenceResponse::text("scripted", reply)),
            None => Err(InferenceError::EmptyResponse),
        }
    }
}

/// Store whose first write hangs past the persistence timeout and then
/// lands late, like a slow network write.
struct SlowFirstWrite {
    inner: Arc<InMemoryProposalRepository>,
    slow: AtomicBool,
}

#[async_trait]
impl ProposalRepository for SlowFirstWrite {
    async fn create(&self, proposal: NewProposal) -> Result<String> {
        if self.slow.swap(false, Ordering::SeqCst) {
            let inner = self.inner.clone();
            let late = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                inner.create(proposal).await
            });
            return late
                .await
                .map_err(|e| CivicError::internal(e.to_string()))?;
        }
        self.inner.create(proposal).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>> {
        self.inner.find_by_id(id).await
    }

    async fn upvote(&self, id: &str) -> Result<u64> {
        self.inner.upvote(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn list_all(&self) -> Result<Vec<Proposal>> {
        self.inner.list_all().await
    }

    fn subscribe(&self) -> broadcast::Receiver<ProposalChange> {
        self.inner.subscribe()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn site() -> LatLng {
    LatLng::new(40.7128, -74.0060)
}

fn gateway(backend: Arc<dyn InferenceBackend>) -> InferenceGateway {
    InferenceGateway::new(Duration::from_secs(10)).with_backend(backend)
}

/// Sessions whose vision collaborators are all unreachable.
fn factory(
    chat: Arc<dyn InferenceBackend>,
    repository: Arc<dyn ProposalRepository>,
    identity: Arc<dyn IdentityProvider>,
) -> SessionFactory {
    let timeouts = TimeoutSettings::default();
    let prompts = Arc::new(PromptRenderer::new().unwrap());
    let unreachable: Arc<dyn InferenceBackend> = Arc::new(UnreachableModel);
    let vision = VisionOrchestrator::new(
        Some(Arc::new(NetworkDown)),
        gateway(unreachable.clone()),
        gateway(unreachable),
        prompts.clone(),
        timeouts.clone(),
    );
    SessionFactory::new(SessionServices {
        chat: gateway(chat),
        vision: Arc::new(vision),
        repository,
        identity,
        prompts,
        dialogue: DialogueSettings::default(),
        persistence_timeout: timeouts.persistence(),
    })
}

fn demo_factory(repository: Arc<InMemoryProposalRepository>) -> SessionFactory {
    factory(Arc::new(OfflineDemoAgent::new()), repository, Arc::new(GuestIdentity))
}

fn reply(text: &str, payload: WirePayload) -> String {
    format!("{text}\n{}", payload.to_fenced_block())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_unrealistic_idea_is_rejected_and_never_persisted() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let outcome = session
        .submit_user_message("I want a skyscraper here")
        .await
        .unwrap();

    assert_eq!(outcome.status, ProposalStatus::Rejected);
    assert_eq!(outcome.resolution, TurnResolution::Rejected);
    assert_eq!(outcome.map.action, MapAction::None);
    assert!(outcome.display_text.contains("too narrow"));
    assert!(!outcome.display_text.contains("```"));
    assert!(repository.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_idea_validates_in_one_turn() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let outcome = session
        .submit_user_message(
            "A public library, size: two floors with a rooftop reading garden. My name is John Doe.",
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ProposalStatus::Validated);
    assert_eq!(outcome.map.action, MapAction::Show3D);
    let proposal = outcome.persisted_proposal().expect("proposal persisted").clone();
    assert_eq!(proposal.business_type, "Community Library & Learning Center");
    assert_eq!(proposal.author, "John Doe");
    assert!(!proposal.review.is_empty());
    assert_eq!(proposal.score.value, 90.0);
    assert_eq!(proposal.score.scale, ScoreScale::Feasibility100);
    assert_eq!(proposal.location, site());

    let stored = repository.list_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, proposal.id);
    assert_eq!(*session.phases().borrow(), TurnPhase::Completed);
}

#[tokio::test]
async fn test_failed_snapshots_still_persist_without_image() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let outcome = session
        .submit_user_message("A library, size 2 floors, my name is John")
        .await
        .unwrap();

    match outcome.resolution {
        TurnResolution::Persisted { proposal, vision } => {
            assert!(proposal.vision_image.is_none());
            assert!(!vision.success);
            assert!(vision.analysis.street.is_none());
            assert!(vision.analysis.overhead.is_none());
            // Brief falls back to the citizen's words
            assert_eq!(vision.brief, "A library, size 2 floors, my name is John");
        }
        other => panic!("expected persisted, got {other:?}"),
    }
    assert!(repository.list_all().await.unwrap()[0].vision_image.is_none());
}

#[tokio::test]
async fn test_stalled_interview_is_auto_completed() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let first = session.submit_user_message("Maybe something green").await.unwrap();
    assert_eq!(first.status, ProposalStatus::Draft);
    let second = session.submit_user_message("Not sure really").await.unwrap();
    assert_eq!(second.status, ProposalStatus::Draft);
    assert_eq!(session.snapshot().await.stalled_turns, 2);

    let third = session.submit_user_message("Just make it nice").await.unwrap();
    assert_eq!(third.status, ProposalStatus::Validated);
    let proposal = third.persisted_proposal().expect("auto-completed proposal");
    assert_eq!(proposal.business_type, "Maybe something green");
    assert!(proposal.review.contains("Not sure really"));
    assert_eq!(proposal.author, "Anonymous");
    assert_eq!(proposal.score.value, 50.0);
    assert_eq!(repository.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_force_finalize_validates_next_turn() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let draft = session.submit_user_message("A library").await.unwrap();
    assert_eq!(draft.status, ProposalStatus::Draft);

    let outcome = session.force_finalize().await.unwrap();
    assert_eq!(outcome.status, ProposalStatus::Validated);
    let proposal = outcome.persisted_proposal().expect("finalized proposal");
    assert_eq!(proposal.business_type, "A library");
    assert_eq!(proposal.review, "A library");

    let history = session.snapshot().await.history;
    let finalize_turn = history
        .iter()
        .find(|m| m.role == MessageRole::User && m.synthetic)
        .expect("synthetic submit request");
    assert!(finalize_turn.content.contains("submit"));
}

#[tokio::test]
async fn test_closed_session_refuses_messages() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository).open(site(), None).unwrap();
    session
        .submit_user_message("A library, size 2 floors, my name is John")
        .await
        .unwrap();

    let err = session.submit_user_message("One more thing").await.unwrap_err();
    assert!(matches!(err, CivicError::SessionClosed));
    assert!(matches!(session.force_finalize().await, Err(CivicError::SessionClosed)));
    assert!(session.snapshot().await.closed);
}

#[tokio::test]
async fn test_rejected_interview_restarts() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();

    let rejected = session.submit_user_message("A skyscraper please").await.unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);

    let validated = session
        .submit_user_message("Fine, a library then, size 2 floors, my name is John")
        .await
        .unwrap();
    assert!(validated.is_persisted());
    assert_eq!(repository.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_blank_message_is_rejected_before_any_call() {
    let agent = ScriptedAgent::new(Vec::new());
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = factory(agent.clone(), repository, Arc::new(GuestIdentity))
        .open(site(), None)
        .unwrap();

    let err = session.submit_user_message("   ").await.unwrap_err();
    assert!(err.is_invalid_input());
    assert_eq!(session.snapshot().await.history.len(), 1);
}

#[test]
fn test_out_of_range_location_is_rejected() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let err = demo_factory(repository)
        .open(LatLng::new(95.0, 0.0), None)
        .unwrap_err();
    assert!(err.is_invalid_input());
}

#[tokio::test]
async fn test_agent_failure_leaves_state_unchanged() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let chat: Arc<dyn InferenceBackend> = Arc::new(UnreachableModel);
    let session = factory(chat, repository.clone(), Arc::new(GuestIdentity))
        .open(site(), None)
        .unwrap();

    let outcome = session.submit_user_message("A small park").await.unwrap();
    assert_eq!(outcome.status, ProposalStatus::Draft);
    assert!(outcome.score.is_none());
    assert!(matches!(outcome.resolution, TurnResolution::AgentUnavailable { .. }));

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.status, ProposalStatus::Draft);
    assert_eq!(snapshot.stalled_turns, 0);
    let last = snapshot.history.last().unwrap();
    assert_eq!(last.role, MessageRole::Agent);
    assert!(last.synthetic);
    assert!(repository.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_busy_session_refuses_concurrent_turns() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let slow_agent: Arc<dyn InferenceBackend> =
        Arc::new(OfflineDemoAgent::new().with_latency(Duration::from_millis(300)));
    let session: Arc<DialogueSession> = Arc::new(
        factory(slow_agent, repository, Arc::new(GuestIdentity))
            .open(site(), None)
            .unwrap(),
    );

    let mut phases = session.phases();
    let first = tokio::spawn({
        let session = session.clone();
        async move { session.submit_user_message("A library").await }
    });
    phases
        .wait_for(|phase| *phase == TurnPhase::AwaitingAgent)
        .await
        .unwrap();

    let err = session.submit_user_message("Hello?").await.unwrap_err();
    assert!(matches!(err, CivicError::SessionBusy));
    assert!(matches!(session.retry_save().await, Err(CivicError::SessionBusy)));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.status, ProposalStatus::Draft);
}

#[tokio::test(start_paused = true)]
async fn test_save_timeout_rolls_back_and_retry_writes_once() {
    let inner = Arc::new(InMemoryProposalRepository::new());
    let repository = Arc::new(SlowFirstWrite {
        inner: inner.clone(),
        slow: AtomicBool::new(true),
    });
    let session = factory(Arc::new(OfflineDemoAgent::new()), repository, Arc::new(GuestIdentity))
        .open(site(), None)
        .unwrap();

    let outcome = session
        .submit_user_message("A library, size 2 floors, my name is John")
        .await
        .unwrap();
    assert_eq!(outcome.status, ProposalStatus::Draft);
    assert!(matches!(outcome.resolution, TurnResolution::SaveFailed { .. }));
    assert!(outcome.display_text.contains("retry"));
    let snapshot = session.snapshot().await;
    assert!(snapshot.save_pending);
    assert!(!snapshot.closed);
    assert!(inner.list_all().await.unwrap().is_empty());

    let retried = session.retry_save().await.unwrap();
    assert_eq!(retried.status, ProposalStatus::Validated);
    assert!(retried.is_persisted());
    assert_eq!(inner.list_all().await.unwrap().len(), 1);

    // Let the timed-out first write land
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(inner.list_all().await.unwrap().len(), 1);
    assert!(matches!(session.retry_save().await, Err(CivicError::SessionClosed)));
}

fn validated_reply(title: &str, description: &str) -> String {
    let mut payload = WirePayload::draft(site());
    payload.status = ProposalStatus::Validated;
    payload.feasibility_score = 75.0;
    payload.idea_title = Some(title.to_string());
    payload.idea_description = Some(description.to_string());
    payload.author = Some("Ann".to_string());
    reply("Approved.", payload)
}

#[tokio::test(start_paused = true)]
async fn test_revalidation_after_late_write_reports_stored_proposal() {
    let inner = Arc::new(InMemoryProposalRepository::new());
    let repository = Arc::new(SlowFirstWrite {
        inner: inner.clone(),
        slow: AtomicBool::new(true),
    });
    let agent = ScriptedAgent::new(vec![
        validated_reply("Community Garden", "Raised beds for the block"),
        validated_reply("Rooftop Garden", "Greens on the warehouse roof"),
    ]);
    let session = factory(agent, repository, Arc::new(GuestIdentity))
        .open(site(), None)
        .unwrap();

    let first = session.submit_user_message("A garden for the block").await.unwrap();
    assert!(matches!(first.resolution, TurnResolution::SaveFailed { .. }));

    // The timed-out write lands before the citizen changes the idea
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(inner.list_all().await.unwrap().len(), 1);

    let second = session
        .submit_user_message("Actually, put it on the roof")
        .await
        .unwrap();
    let proposal = second.persisted_proposal().expect("session resolves to the stored pin");
    assert_eq!(proposal.business_type, "Community Garden");
    assert_eq!(proposal.review, "Raised beds for the block");

    let stored = inner.list_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, proposal.id);
}

#[tokio::test]
async fn test_retry_without_pending_save_is_invalid() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository).open(site(), None).unwrap();
    let err = session.retry_save().await.unwrap_err();
    assert!(err.is_invalid_input());
}

#[tokio::test]
async fn test_refinement_links_parent_and_credits_signed_in_user() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let parent_id = repository
        .create(NewProposal {
            submission_key: "parent".to_string(),
            location: site(),
            business_type: "Corner Cafe".to_string(),
            review: "A small cafe".to_string(),
            author: "Sarah Jenkins".to_string(),
            score: civic_core::proposal::Score::new(70.0, ScoreScale::Feasibility100),
            vision_image: None,
            parent_proposal_id: None,
            flags: Vec::new(),
            owner_id: None,
        })
        .await
        .unwrap();
    let parent = repository.find_by_id(&parent_id).await.unwrap().unwrap();

    let mut payload = WirePayload::draft(site());
    payload.status = ProposalStatus::Validated;
    payload.feasibility_score = 82.0;
    payload.idea_title = Some("Corner Cafe with Terrace".to_string());
    payload.idea_description = Some("The cafe gains an outdoor terrace with planters.".to_string());
    let agent = ScriptedAgent::new(vec![reply("Great addition, approved.", payload)]);

    let identity = StaticIdentity::new(Some(Identity {
        user_id: "u-77".to_string(),
        display_name: Some("Marcus Chen".to_string()),
        id_token: None,
    }));
    let session = factory(agent, repository.clone(), Arc::new(identity))
        .open_refinement(&parent)
        .unwrap();

    let outcome = session.submit_user_message("Add a terrace").await.unwrap();
    let proposal = outcome.persisted_proposal().expect("refinement persisted");
    assert_eq!(proposal.parent_proposal_id.as_deref(), Some(parent_id.as_str()));
    assert_eq!(proposal.author, "Marcus Chen");
    assert_eq!(proposal.owner_id.as_deref(), Some("u-77"));
    assert_eq!(repository.list_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_validation_without_fields_stays_draft() {
    let mut payload = WirePayload::draft(site());
    payload.status = ProposalStatus::Validated;
    payload.idea_title = Some("Bike Repair Kiosk".to_string());
    let agent = ScriptedAgent::new(vec![reply("Looks good!", payload)]);
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = factory(agent, repository.clone(), Arc::new(GuestIdentity))
        .open(site(), None)
        .unwrap();

    let outcome = session.submit_user_message("A bike repair kiosk").await.unwrap();
    assert_eq!(outcome.status, ProposalStatus::Draft);
    assert!(matches!(outcome.resolution, TurnResolution::Drafting { .. }));
    assert!(repository.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_persisted_proposal_accepts_concurrent_upvotes() {
    let repository = Arc::new(InMemoryProposalRepository::new());
    let session = demo_factory(repository.clone()).open(site(), None).unwrap();
    let outcome = session
        .submit_user_message("A library, size 2 floors, my name is John")
        .await
        .unwrap();
    let id = outcome.persisted_proposal().unwrap().id.clone();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let repository = repository.clone();
            let id = id.clone();
            tokio::spawn(async move { repository.upvote(&id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = repository.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.agreement_count, 12);
}
