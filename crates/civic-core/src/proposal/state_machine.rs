//! Proposal state machine.
//!
//! Drives one proposal through `Draft → Validated | Rejected`, one transition
//! per agent turn. Stall detection is an explicit counter over the gathered
//! fields; it never inspects message wording.

use super::model::{Score, ScoreScale};
use crate::action::{ActionPayload, MapAction, MapDirective, ProposalStatus};
use crate::dialogue::{ConversationMessage, MessageRole};
use crate::error::{CivicError, Result};
use tracing::{debug, info};

/// Consecutive stalled turns after which the next turn auto-completes.
pub const DEFAULT_STALL_LIMIT: u32 = 2;

const FALLBACK_TITLE: &str = "Community Proposal";
const TITLE_MAX_CHARS: usize = 60;

/// A field that must be present before a proposal can be validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequiredField {
    Title,
    Description,
    Author,
}

/// Fields the agent has reported so far in this session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatheredFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub flags: Vec<String>,
}

impl GatheredFields {
    /// Merges the payload's fields, latest wording wins.
    fn absorb(&mut self, payload: &ActionPayload) {
        match payload {
            ActionPayload::Draft(p) => {
                merge(&mut self.title, p.title.as_ref());
                merge(&mut self.description, p.description.as_ref());
                merge(&mut self.author, p.author.as_ref());
                self.merge_flags(&p.flags);
            }
            ActionPayload::Validated(p) => {
                merge(&mut self.title, Some(&p.title));
                merge(&mut self.description, Some(&p.description));
                merge(&mut self.author, p.author.as_ref());
                self.merge_flags(&p.flags);
            }
            ActionPayload::Rejected(p) => self.merge_flags(&p.flags),
        }
    }

    fn merge_flags(&mut self, flags: &[String]) {
        for flag in flags {
            if !self.flags.contains(flag) {
                self.flags.push(flag.clone());
            }
        }
    }

    /// Required fields still absent.
    pub fn missing(&self, author_required: bool) -> Vec<RequiredField> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push(RequiredField::Title);
        }
        if self.description.is_none() {
            missing.push(RequiredField::Description);
        }
        if author_required && self.author.is_none() {
            missing.push(RequiredField::Author);
        }
        missing
    }
}

fn merge(slot: &mut Option<String>, incoming: Option<&String>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// Why the next turn must validate regardless of what the agent says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCompleteReason {
    /// The agent re-asked for missing details this many turns in a row.
    Stalled { turns: u32 },
    /// The citizen asked to submit now.
    UserRequested,
}

/// How the next agent turn should be conducted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirective {
    /// Keep interviewing.
    Interview,
    /// Fill plausible details and validate.
    AutoComplete(AutoCompleteReason),
}

/// A proposal that passed validation and awaits persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProposal {
    pub title: String,
    pub description: String,
    /// Absent for refinements and for auto-completed anonymous ideas.
    pub author: Option<String>,
    pub score: Score,
    pub flags: Vec<String>,
    pub map: MapDirective,
    /// Title or description were derived from the conversation rather than
    /// reported by the agent.
    pub synthesized: bool,
}

/// Outcome of applying one agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Drafting {
        missing: Vec<RequiredField>,
        stalled_turns: u32,
        /// The agent claimed validation without the required fields.
        incomplete_validation: bool,
    },
    Validated(ValidatedProposal),
    Rejected,
}

/// Per-session proposal state.
#[derive(Debug, Clone)]
pub struct ProposalStateMachine {
    status: ProposalStatus,
    scale: ScoreScale,
    score: Option<Score>,
    stalled_turns: u32,
    stall_limit: u32,
    author_required: bool,
    finalize_requested: bool,
    gathered: GatheredFields,
}

impl ProposalStateMachine {
    /// Creates a machine in `Draft`.
    ///
    /// `author_required` is false for refinements of an existing proposal.
    pub fn new(scale: ScoreScale, author_required: bool) -> Self {
        Self {
            status: ProposalStatus::Draft,
            scale,
            score: None,
            stalled_turns: 0,
            stall_limit: DEFAULT_STALL_LIMIT,
            author_required,
            finalize_requested: false,
            gathered: GatheredFields::default(),
        }
    }

    /// Overrides the stall limit (minimum 1).
    pub fn with_stall_limit(mut self, limit: u32) -> Self {
        self.stall_limit = limit.max(1);
        self
    }

    pub fn status(&self) -> ProposalStatus {
        self.status
    }

    pub fn score(&self) -> Option<Score> {
        self.score
    }

    pub fn scale(&self) -> ScoreScale {
        self.scale
    }

    pub fn stalled_turns(&self) -> u32 {
        self.stalled_turns
    }

    pub fn author_required(&self) -> bool {
        self.author_required
    }

    pub fn gathered(&self) -> &GatheredFields {
        &self.gathered
    }

    pub fn directive(&self) -> TurnDirective {
        if self.finalize_requested {
            TurnDirective::AutoComplete(AutoCompleteReason::UserRequested)
        } else if self.stalled_turns >= self.stall_limit {
            TurnDirective::AutoComplete(AutoCompleteReason::Stalled {
                turns: self.stalled_turns,
            })
        } else {
            TurnDirective::Interview
        }
    }

    /// Makes the next agent turn authoritative for validation.
    pub fn request_finalize(&mut self) {
        self.finalize_requested = true;
    }

    /// Prepares for a new turn. A rejected interview restarts from scratch.
    pub fn begin_turn(&mut self) -> Result<()> {
        match self.status {
            ProposalStatus::Validated => Err(CivicError::SessionClosed),
            ProposalStatus::Rejected => {
                debug!("Restarting interview after rejection");
                self.status = ProposalStatus::Draft;
                self.score = None;
                self.stalled_turns = 0;
                self.gathered = GatheredFields::default();
                Ok(())
            }
            ProposalStatus::Draft => Ok(()),
        }
    }

    /// Applies one parsed agent turn.
    ///
    /// `transcript` is the session history, used to synthesize a title and
    /// description when auto-completing.
    pub fn apply(
        &mut self,
        payload: ActionPayload,
        transcript: &[ConversationMessage],
    ) -> Result<Transition> {
        if self.status != ProposalStatus::Draft {
            return Err(CivicError::internal(format!(
                "cannot apply a turn in {} state",
                self.status
            )));
        }

        // Only newly supplied required fields count as progress; rewording
        // one already gathered is still a stall.
        let missing_before = self.gathered.missing(self.author_required).len();
        self.gathered.absorb(&payload);
        let progressed = self.gathered.missing(self.author_required).len() < missing_before;

        if let TurnDirective::AutoComplete(reason) = self.directive() {
            let proposal = self.auto_complete(&payload, transcript);
            info!(
                ?reason,
                synthesized = proposal.synthesized,
                score = proposal.score.value,
                "Proposal auto-completed"
            );
            return Ok(self.enter_validated(proposal));
        }

        match payload {
            ActionPayload::Rejected(p) => {
                self.record_score(p.score);
                self.status = ProposalStatus::Rejected;
                self.stalled_turns = 0;
                info!("Proposal rejected by realism filter");
                Ok(Transition::Rejected)
            }
            ActionPayload::Validated(p) => {
                let score = self.resolve_score(p.score);
                let proposal = ValidatedProposal {
                    title: p.title,
                    description: p.description,
                    author: p.author,
                    score,
                    flags: self.gathered.flags.clone(),
                    map: p.map,
                    synthesized: false,
                };
                info!(score = score.value, "Proposal validated");
                Ok(self.enter_validated(proposal))
            }
            ActionPayload::Draft(p) => {
                self.record_score(p.score);
                let missing = self.gathered.missing(self.author_required);
                self.stalled_turns = if missing.is_empty() {
                    0
                } else if progressed {
                    1
                } else {
                    self.stalled_turns + 1
                };
                debug!(
                    stalled_turns = self.stalled_turns,
                    missing = missing.len(),
                    "Interview continues"
                );
                Ok(Transition::Drafting {
                    missing,
                    stalled_turns: self.stalled_turns,
                    incomplete_validation: p.incomplete_validation,
                })
            }
        }
    }

    /// Returns to `Draft` after a failed save, keeping gathered fields.
    pub fn rollback_to_draft(&mut self) {
        if self.status == ProposalStatus::Validated {
            info!("Rolling proposal back to draft");
            self.status = ProposalStatus::Draft;
            self.stalled_turns = 0;
            self.finalize_requested = false;
        }
    }

    /// Re-enters `Validated` for a proposal that was saved on retry.
    pub fn restore_validated(&mut self, proposal: &ValidatedProposal) {
        self.status = ProposalStatus::Validated;
        self.score = Some(proposal.score);
    }

    fn enter_validated(&mut self, proposal: ValidatedProposal) -> Transition {
        self.status = ProposalStatus::Validated;
        self.score = Some(proposal.score);
        self.stalled_turns = 0;
        self.finalize_requested = false;
        Transition::Validated(proposal)
    }

    fn record_score(&mut self, value: f64) {
        if value > 0.0 {
            self.score = Some(Score::new(value, self.scale));
        }
    }

    /// Reported score if positive, else the last known one, else the midpoint.
    fn resolve_score(&self, reported: f64) -> Score {
        if reported > 0.0 {
            return Score::new(reported, self.scale);
        }
        match self.score {
            Some(score) if !score.is_zero() => score,
            _ => Score::midpoint(self.scale),
        }
    }

    fn auto_complete(
        &self,
        payload: &ActionPayload,
        transcript: &[ConversationMessage],
    ) -> ValidatedProposal {
        let user_text: Vec<&str> = transcript
            .iter()
            .filter(|m| m.role == MessageRole::User && !m.synthetic)
            .map(|m| m.content.trim())
            .filter(|s| !s.is_empty())
            .collect();

        let mut synthesized = false;
        let title = match &self.gathered.title {
            Some(title) => title.clone(),
            None => {
                synthesized = true;
                user_text
                    .first()
                    .map(|first| derive_title(first))
                    .unwrap_or_else(|| FALLBACK_TITLE.to_string())
            }
        };
        let description = match &self.gathered.description {
            Some(description) => description.clone(),
            None => {
                synthesized = true;
                if user_text.is_empty() {
                    title.clone()
                } else {
                    user_text.join(" ")
                }
            }
        };

        let mut map = payload.map();
        if map.action == MapAction::None {
            map.action = MapAction::Show3D;
        }

        ValidatedProposal {
            title,
            description,
            author: self.gathered.author.clone(),
            score: self.resolve_score(payload.score()),
            flags: self.gathered.flags.clone(),
            map,
            synthesized,
        }
    }
}

/// First sentence of the text, cut at a word boundary.
fn derive_title(text: &str) -> String {
    let sentence = text
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(text);

    if sentence.chars().count() <= TITLE_MAX_CHARS {
        return sentence.to_string();
    }

    let mut title = String::new();
    for word in sentence.split_whitespace() {
        let next_len = title.chars().count() + word.chars().count() + 1;
        if next_len > TITLE_MAX_CHARS && !title.is_empty() {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }
    title.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{DraftPayload, RejectedPayload, ValidatedPayload};
    use crate::geo::LatLng;

    fn here() -> LatLng {
        LatLng::new(40.7128, -74.0060)
    }

    fn draft(title: Option<&str>, description: Option<&str>, author: Option<&str>) -> ActionPayload {
        ActionPayload::Draft(DraftPayload {
            map: MapDirective::none(here()),
            score: 0.0,
            title: title.map(String::from),
            description: description.map(String::from),
            author: author.map(String::from),
            flags: Vec::new(),
            incomplete_validation: false,
        })
    }

    fn validated(score: f64) -> ActionPayload {
        ActionPayload::Validated(ValidatedPayload {
            map: MapDirective {
                action: MapAction::Show3D,
                coordinates: here(),
            },
            score,
            title: "Community Library".to_string(),
            description: "Two floors with a reading garden".to_string(),
            author: Some("John Doe".to_string()),
            flags: vec!["parking".to_string()],
        })
    }

    fn rejected() -> ActionPayload {
        ActionPayload::Rejected(RejectedPayload {
            map: MapDirective::none(here()),
            score: 3.0,
            title: Some("Skyscraper".to_string()),
            flags: Vec::new(),
        })
    }

    fn transcript(lines: &[&str]) -> Vec<ConversationMessage> {
        lines.iter().map(|l| ConversationMessage::user(*l)).collect()
    }

    #[test]
    fn test_single_turn_validation() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        let transition = machine.apply(validated(88.0), &[]).unwrap();

        match transition {
            Transition::Validated(p) => {
                assert_eq!(p.title, "Community Library");
                assert_eq!(p.score, Score::new(88.0, ScoreScale::Feasibility100));
                assert_eq!(p.flags, vec!["parking".to_string()]);
                assert!(!p.synthesized);
            }
            other => panic!("expected validated, got {other:?}"),
        }
        assert_eq!(machine.status(), ProposalStatus::Validated);
        assert!(matches!(machine.begin_turn(), Err(CivicError::SessionClosed)));
    }

    #[test]
    fn test_rejection_then_restart() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        machine.apply(draft(Some("Tower"), None, None), &[]).unwrap();
        assert_eq!(machine.apply(rejected(), &[]).unwrap(), Transition::Rejected);
        assert_eq!(machine.status(), ProposalStatus::Rejected);
        assert_eq!(machine.score().map(|s| s.value), Some(3.0));

        machine.begin_turn().unwrap();
        assert_eq!(machine.status(), ProposalStatus::Draft);
        assert_eq!(machine.score(), None);
        assert_eq!(machine.gathered(), &GatheredFields::default());
    }

    #[test]
    fn test_stall_counter_and_auto_complete() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        let history = transcript(&["I want a library here", "not sure", "no idea"]);

        // First ask after the idea was named counts as one stall
        let t1 = machine.apply(draft(Some("Library"), None, None), &history).unwrap();
        assert!(matches!(t1, Transition::Drafting { stalled_turns: 1, .. }));

        // Nothing new supplied
        let t2 = machine.apply(draft(Some("Library"), None, None), &history).unwrap();
        assert!(matches!(t2, Transition::Drafting { stalled_turns: 2, .. }));
        assert_eq!(
            machine.directive(),
            TurnDirective::AutoComplete(AutoCompleteReason::Stalled { turns: 2 })
        );

        // Whatever the agent says now, the proposal validates
        match machine.apply(draft(None, None, None), &history).unwrap() {
            Transition::Validated(p) => {
                assert_eq!(p.title, "Library");
                assert_eq!(p.description, "I want a library here not sure no idea");
                assert_eq!(p.author, None);
                assert_eq!(p.score, Score::midpoint(ScoreScale::Feasibility100));
                assert_eq!(p.map.action, MapAction::Show3D);
                assert!(p.synthesized);
            }
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_progress_keeps_stall_low() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        machine.apply(draft(Some("Cafe"), None, None), &[]).unwrap();
        machine.apply(draft(Some("Cafe"), Some("Corner cafe"), None), &[]).unwrap();
        assert_eq!(machine.stalled_turns(), 1);
        assert_eq!(
            machine.gathered().missing(true),
            vec![RequiredField::Author]
        );
        assert_eq!(machine.directive(), TurnDirective::Interview);
    }

    #[test]
    fn test_reworded_title_still_counts_as_stall() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        let history = transcript(&["A library please", "hmm", "maybe"]);

        let t1 = machine.apply(draft(Some("Library"), None, None), &history).unwrap();
        assert!(matches!(t1, Transition::Drafting { stalled_turns: 1, .. }));
        let t2 = machine
            .apply(draft(Some("Community Library"), None, None), &history)
            .unwrap();
        assert!(matches!(t2, Transition::Drafting { stalled_turns: 2, .. }));
        assert_eq!(
            machine.directive(),
            TurnDirective::AutoComplete(AutoCompleteReason::Stalled { turns: 2 })
        );

        match machine.apply(draft(Some("Library"), None, None), &history).unwrap() {
            Transition::Validated(p) => {
                assert_eq!(p.title, "Library");
                assert_eq!(p.description, "A library please hmm maybe");
                assert!(p.synthesized);
            }
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_auto_complete_overrides_rejection() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        machine.request_finalize();
        let transition = machine.apply(rejected(), &transcript(&["A bakery."])).unwrap();
        match transition {
            Transition::Validated(p) => {
                assert_eq!(p.title, "A bakery");
                assert_eq!(p.score.value, 3.0);
            }
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_force_finalize_ignores_synthetic_messages() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Saturation10, true);
        machine.request_finalize();
        assert_eq!(
            machine.directive(),
            TurnDirective::AutoComplete(AutoCompleteReason::UserRequested)
        );

        let history = vec![
            ConversationMessage::agent("Hi! What would you like to build?"),
            ConversationMessage::user("A small dog park"),
            ConversationMessage::user("Please finalize my proposal now.").synthetic(),
        ];
        match machine.apply(draft(None, None, Some("Ann")), &history).unwrap() {
            Transition::Validated(p) => {
                assert_eq!(p.title, "A small dog park");
                assert_eq!(p.description, "A small dog park");
                assert_eq!(p.author.as_deref(), Some("Ann"));
                assert_eq!(p.score, Score::new(5.0, ScoreScale::Saturation10));
            }
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_force_finalize_with_empty_transcript() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, false);
        machine.request_finalize();
        match machine.apply(draft(None, None, None), &[]).unwrap() {
            Transition::Validated(p) => {
                assert_eq!(p.title, FALLBACK_TITLE);
                assert_eq!(p.description, FALLBACK_TITLE);
            }
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_validation_stays_draft() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        let payload = ActionPayload::Draft(DraftPayload {
            map: MapDirective::none(here()),
            score: 70.0,
            title: Some("Cafe".to_string()),
            description: Some("Corner cafe".to_string()),
            author: None,
            flags: Vec::new(),
            incomplete_validation: true,
        });
        match machine.apply(payload, &[]).unwrap() {
            Transition::Drafting {
                missing,
                incomplete_validation,
                ..
            } => {
                assert_eq!(missing, vec![RequiredField::Author]);
                assert!(incomplete_validation);
            }
            other => panic!("expected drafting, got {other:?}"),
        }
        assert_eq!(machine.status(), ProposalStatus::Draft);
        assert_eq!(machine.score().map(|s| s.value), Some(70.0));
    }

    #[test]
    fn test_rollback_and_restore() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Feasibility100, true);
        let proposal = match machine.apply(validated(0.0), &[]).unwrap() {
            Transition::Validated(p) => p,
            other => panic!("expected validated, got {other:?}"),
        };
        // Zero score with no history falls back to the midpoint
        assert_eq!(proposal.score.value, 50.0);

        machine.rollback_to_draft();
        assert_eq!(machine.status(), ProposalStatus::Draft);
        assert_eq!(machine.gathered().title.as_deref(), Some("Community Library"));
        machine.begin_turn().unwrap();

        machine.restore_validated(&proposal);
        assert_eq!(machine.status(), ProposalStatus::Validated);
    }

    #[test]
    fn test_scores_clamped_into_active_scale() {
        let mut machine = ProposalStateMachine::new(ScoreScale::Saturation10, true);
        match machine.apply(validated(88.0), &[]).unwrap() {
            Transition::Validated(p) => assert_eq!(p.score.value, 10.0),
            other => panic!("expected validated, got {other:?}"),
        }
    }

    #[test]
    fn test_derive_title_truncates_long_sentences() {
        let long = "I would really love to see a wonderful community garden with benches and a fountain right here";
        let title = derive_title(long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS);
        assert!(title.starts_with("I would really love"));
        assert!(!title.ends_with(' '));
    }
}
