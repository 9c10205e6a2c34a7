//! One proposal interview between a citizen and the planning agent.

use super::SessionServices;
use super::outcome::{SessionSnapshot, TurnOutcome, TurnPhase, TurnResolution};
use crate::prompts::{FINALIZE_REQUEST, GREETING, SystemPromptContext};
use crate::vision_orchestrator::{VisionOutcome, VisionRequest};
use chrono::Utc;
use civic_core::action::{MapDirective, ParseContext, parse};
use civic_core::dialogue::{ConversationMessage, MessageRole, coalesce};
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::inference::InferenceRequest;
use civic_core::proposal::{
    NewProposal, Proposal, ProposalStateMachine, Transition, TurnDirective, ValidatedProposal,
};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

const AGENT_UNAVAILABLE_TEXT: &str = "Sorry, I couldn't reach the planning service just now. Your proposal is still a draft; please send your message again.";
const SAVE_FAILED_TEXT: &str = "Your proposal was validated, but saving it failed. It is back in draft; please retry saving.";
const SAVED_TEXT: &str = "Your proposal has been saved to the map.";

/// A validated proposal whose write has not succeeded yet.
#[derive(Debug, Clone)]
struct PendingSave {
    proposal: NewProposal,
    validated: ValidatedProposal,
    vision: VisionOutcome,
}

#[derive(Debug)]
struct SessionState {
    history: Vec<ConversationMessage>,
    machine: ProposalStateMachine,
    pending: Option<PendingSave>,
    closed: bool,
}

/// A single interview session.
///
/// Turns are strictly sequential: a message submitted while another turn is
/// in flight is refused with [`CivicError::SessionBusy`]. The session id is
/// also the submission key of the proposal it produces, so a session writes
/// at most one document however often the save is retried.
pub struct DialogueSession {
    id: String,
    location: LatLng,
    place_name: Option<String>,
    refinement: Option<Proposal>,
    services: Arc<SessionServices>,
    state: Mutex<SessionState>,
    phase: watch::Sender<TurnPhase>,
}

impl DialogueSession {
    pub(super) fn new(
        id: String,
        location: LatLng,
        place_name: Option<String>,
        refinement: Option<Proposal>,
        services: Arc<SessionServices>,
    ) -> Self {
        let machine = ProposalStateMachine::new(services.dialogue.score_scale, refinement.is_none())
            .with_stall_limit(services.dialogue.stall_limit);
        let (phase, _) = watch::channel(TurnPhase::Idle);

        Self {
            id,
            location,
            place_name,
            refinement,
            services,
            state: Mutex::new(SessionState {
                history: vec![ConversationMessage::agent(GREETING).synthetic()],
                machine,
                pending: None,
                closed: false,
            }),
            phase,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> LatLng {
        self.location
    }

    /// The proposal this session refines, if any.
    pub fn refinement(&self) -> Option<&Proposal> {
        self.refinement.as_ref()
    }

    /// Subscribes to phase changes of the turn in flight.
    pub fn phases(&self) -> watch::Receiver<TurnPhase> {
        self.phase.subscribe()
    }

    /// Sends one citizen message and runs the turn to completion.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a blank message (before any network call)
    /// - `SessionBusy` while another turn is in flight
    /// - `SessionClosed` once the proposal has been persisted
    ///
    /// Model and persistence failures are not errors; they are reported in
    /// [`TurnOutcome::resolution`].
    pub async fn submit_user_message(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CivicError::invalid_input("message must not be empty"));
        }
        let mut state = self.state.try_lock().map_err(|_| CivicError::SessionBusy)?;
        self.run_turn(&mut state, ConversationMessage::user(text))
            .instrument(info_span!("dialogue_turn", session_id = %self.id))
            .await
    }

    /// Asks the agent to submit now.
    ///
    /// The next agent reply validates the proposal whatever it says, with
    /// title and description synthesized from the conversation if needed.
    pub async fn force_finalize(&self) -> Result<TurnOutcome> {
        let mut state = self.state.try_lock().map_err(|_| CivicError::SessionBusy)?;
        if state.closed {
            return Err(CivicError::SessionClosed);
        }
        info!(session_id = %self.id, "Citizen requested submission");
        state.machine.request_finalize();
        self.run_turn(&mut state, ConversationMessage::user(FINALIZE_REQUEST).synthetic())
            .instrument(info_span!("dialogue_turn", session_id = %self.id, forced = true))
            .await
    }

    /// Re-attempts the write of a validated proposal after a failed save.
    ///
    /// No model is called; the stored proposal and vision are reused.
    pub async fn retry_save(&self) -> Result<TurnOutcome> {
        let mut state = self.state.try_lock().map_err(|_| CivicError::SessionBusy)?;
        if state.closed {
            return Err(CivicError::SessionClosed);
        }
        let Some(pending) = state.pending.clone() else {
            return Err(CivicError::invalid_input("no validated proposal is waiting to be saved"));
        };

        Ok(async {
            state.machine.restore_validated(&pending.validated);
            let resolution = self.persist(&mut state).await;
            let display_text = match resolution {
                TurnResolution::Persisted { .. } => SAVED_TEXT.to_string(),
                _ => SAVE_FAILED_TEXT.to_string(),
            };
            self.outcome(&state, display_text, pending.validated.map, resolution)
        }
        .instrument(info_span!("dialogue_retry_save", session_id = %self.id))
        .await)
    }

    /// Current state of the session; waits for a turn in flight to finish.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            id: self.id.clone(),
            location: self.location,
            parent_proposal_id: self.refinement.as_ref().map(|p| p.id.clone()),
            status: state.machine.status(),
            score: state.machine.score(),
            stalled_turns: state.machine.stalled_turns(),
            history: state.history.clone(),
            save_pending: state.pending.is_some(),
            closed: state.closed,
        }
    }

    async fn run_turn(
        &self,
        state: &mut SessionState,
        message: ConversationMessage,
    ) -> Result<TurnOutcome> {
        if state.closed {
            return Err(CivicError::SessionClosed);
        }

        state.history.push(message);
        let request = self.build_request(state)?;

        self.set_phase(TurnPhase::AwaitingAgent);
        let response = match self.services.chat.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Agent unavailable, keeping state unchanged");
                state
                    .history
                    .push(ConversationMessage::agent(AGENT_UNAVAILABLE_TEXT).synthetic());
                self.set_phase(TurnPhase::Idle);
                return Ok(self.outcome(
                    state,
                    AGENT_UNAVAILABLE_TEXT.to_string(),
                    MapDirective::none(self.location),
                    TurnResolution::AgentUnavailable {
                        message: e.to_string(),
                    },
                ));
            }
        };

        state.machine.begin_turn()?;

        let ctx = ParseContext {
            location: self.location,
            author_required: state.machine.author_required(),
        };
        let parsed = parse(&response.text, &ctx);
        debug!(
            backend = %response.backend,
            source = ?parsed.source,
            status = %parsed.payload.status(),
            "Parsed agent reply"
        );

        let map = parsed.payload.map();
        state.history.push(ConversationMessage::agent(parsed.clean_text.clone()));
        let transition = state.machine.apply(parsed.payload, &state.history)?;

        let (display_text, map, resolution) = match transition {
            Transition::Drafting {
                missing,
                incomplete_validation,
                stalled_turns,
            } => {
                if incomplete_validation {
                    warn!(?missing, "Agent validated without the required fields");
                }
                debug!(stalled_turns, "Turn ended in draft");
                self.set_phase(TurnPhase::Idle);
                (parsed.clean_text, map, TurnResolution::Drafting { missing })
            }
            Transition::Rejected => {
                self.set_phase(TurnPhase::Idle);
                (parsed.clean_text, map, TurnResolution::Rejected)
            }
            Transition::Validated(validated) => {
                let map = validated.map;
                let resolution = self.finalize(state, validated).await;
                let display_text = match resolution {
                    TurnResolution::SaveFailed { .. } => {
                        format!("{}\n\n{SAVE_FAILED_TEXT}", parsed.clean_text)
                    }
                    _ => parsed.clean_text,
                };
                (display_text, map, resolution)
            }
        };

        info!(
            status = %state.machine.status(),
            stalled_turns = state.machine.stalled_turns(),
            "Turn completed"
        );
        Ok(self.outcome(state, display_text, map, resolution))
    }

    fn build_request(&self, state: &SessionState) -> Result<InferenceRequest> {
        let auto_complete = match state.machine.directive() {
            TurnDirective::AutoComplete(reason) => Some(reason),
            TurnDirective::Interview => None,
        };
        let instruction = self.services.prompts.system_instruction(&SystemPromptContext {
            location: self.location,
            scale: state.machine.scale(),
            refinement: self.refinement.as_ref(),
            auto_complete,
        })?;

        // Application notices (greeting, apologies) never reach the model
        let visible: Vec<ConversationMessage> = state
            .history
            .iter()
            .filter(|m| !(m.role == MessageRole::Agent && m.synthetic))
            .filter(|m| !m.content.trim().is_empty())
            .cloned()
            .collect();
        let mut turns = coalesce(&visible);
        let message = match turns.pop() {
            Some(last) if last.role == MessageRole::User => last.content,
            _ => return Err(CivicError::internal("turn has no user message")),
        };

        Ok(InferenceRequest::new(message)
            .with_system_instruction(instruction)
            .with_history(turns)
            .with_temperature(self.services.dialogue.temperature)
            .with_location(self.location))
    }

    /// Runs the vision pipeline and writes the proposal.
    async fn finalize(&self, state: &mut SessionState, validated: ValidatedProposal) -> TurnResolution {
        self.set_phase(TurnPhase::GeneratingVision);
        let request = VisionRequest {
            title: validated.title.clone(),
            idea_text: idea_text(&state.history).unwrap_or_else(|| validated.description.clone()),
            location: self.location,
            place_name: self.place_name.clone(),
        };
        let vision = self.services.vision.on_validated(&request).await;

        let identity = self.services.identity.current();
        let proposal = NewProposal {
            submission_key: self.id.clone(),
            location: self.location,
            business_type: validated.title.clone(),
            review: validated.description.clone(),
            author: validated
                .author
                .clone()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| self.services.identity.author_fallback()),
            score: validated.score,
            vision_image: vision.vision_image.clone(),
            parent_proposal_id: self.refinement.as_ref().map(|p| p.id.clone()),
            flags: validated.flags.clone(),
            owner_id: identity.map(|i| i.user_id),
        };

        if state.pending.is_some() {
            debug!("Replacing proposal awaiting save");
        }
        state.pending = Some(PendingSave {
            proposal,
            validated,
            vision,
        });
        self.persist(state).await
    }

    /// Writes the pending proposal within the persistence bound.
    async fn persist(&self, state: &mut SessionState) -> TurnResolution {
        let Some(pending) = state.pending.clone() else {
            return TurnResolution::SaveFailed {
                message: "no validated proposal to save".to_string(),
            };
        };

        self.set_phase(TurnPhase::Saving);
        let limit = self.services.persistence_timeout;
        let result = match tokio::time::timeout(limit, self.services.repository.create(pending.proposal.clone())).await {
            Ok(result) => result,
            Err(_) => Err(CivicError::timeout("proposal save", limit)),
        };

        match result {
            Ok(id) => {
                info!(proposal_id = %id, vision = pending.vision.success, "Proposal saved");
                let proposal = self.stored_proposal(&id, &pending.proposal).await;
                state.pending = None;
                state.closed = true;
                self.set_phase(TurnPhase::Completed);
                TurnResolution::Persisted {
                    proposal,
                    vision: pending.vision,
                }
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "Failed to save validated proposal");
                state.machine.rollback_to_draft();
                state
                    .history
                    .push(ConversationMessage::agent(SAVE_FAILED_TEXT).synthetic());
                self.set_phase(TurnPhase::Idle);
                TurnResolution::SaveFailed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// The document as stored under `id`.
    ///
    /// A write that timed out earlier may have landed with older content; the
    /// submission key then resolves to that document, not the one just sent.
    async fn stored_proposal(&self, id: &str, sent: &NewProposal) -> Proposal {
        let limit = self.services.persistence_timeout;
        match tokio::time::timeout(limit, self.services.repository.find_by_id(id)).await {
            Ok(Ok(Some(stored))) => {
                if stored.business_type != sent.business_type || stored.review != sent.review {
                    warn!(proposal_id = %id, "An earlier write for this session was kept");
                }
                stored
            }
            _ => {
                debug!(proposal_id = %id, "Saved proposal not readable back, reporting sent content");
                sent.clone().into_proposal(id, Utc::now())
            }
        }
    }

    fn outcome(
        &self,
        state: &SessionState,
        display_text: String,
        map: MapDirective,
        resolution: TurnResolution,
    ) -> TurnOutcome {
        TurnOutcome {
            display_text,
            status: state.machine.status(),
            score: state.machine.score(),
            map,
            resolution,
        }
    }

    fn set_phase(&self, phase: TurnPhase) {
        self.phase.send_replace(phase);
    }
}

impl std::fmt::Debug for DialogueSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueSession")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("refinement", &self.refinement.as_ref().map(|p| &p.id))
            .finish_non_exhaustive()
    }
}

/// The citizen's own words, oldest first.
fn idea_text(history: &[ConversationMessage]) -> Option<String> {
    let parts: Vec<&str> = history
        .iter()
        .filter(|m| m.role == MessageRole::User && !m.synthetic)
        .map(|m| m.content.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idea_text_skips_synthetic_and_agent_messages() {
        let history = vec![
            ConversationMessage::agent(GREETING).synthetic(),
            ConversationMessage::user("A library"),
            ConversationMessage::agent("How big?"),
            ConversationMessage::user(" two floors "),
            ConversationMessage::user(FINALIZE_REQUEST).synthetic(),
        ];
        assert_eq!(idea_text(&history).as_deref(), Some("A library two floors"));
        assert_eq!(idea_text(&history[..1]), None);
    }
}
