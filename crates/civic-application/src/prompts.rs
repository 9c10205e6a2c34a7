//! Prompt templates.
//!
//! Every outbound model prompt is a Jinja template rendered with
//! `minijinja`, so wording lives in one place and the call sites only pass
//! data.

use civic_core::action::{MapAction, ProposalStatus};
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::proposal::{AutoCompleteReason, Proposal, ScoreScale};
use minijinja::{Environment, context};
use serde::Serialize;

const SYSTEM_INSTRUCTION: &str = r#"Role: You are the CivicSense urban planning agent. You help citizens turn neighborhood ideas into realistic, well-described proposals and you turn down ideas that cannot work.

Rules:
1. Realism filter: if an idea is physically impossible for the site, environmentally harmful, or clearly a joke, reject it politely and firmly and explain the planning reason.
2. The active site is lat {{ location.lat }}, lng {{ location.lng }}. Reason about it as a real urban context.
{% if refinement -%}
3. This conversation refines an existing proposal:
   Title: {{ refinement.business_type }}
   Description: {{ refinement.review }}
   Ask only for the new details the citizen wants to add. Do not ask for a name.
{%- else -%}
3. Do not approve an idea on first mention. Collect:
   - concrete building details (size, features, design constraints)
   - the citizen's name, credited as the author
{%- endif %}

Scoring: once the idea is clear, give a feasibility score from 0 to {{ scale_max }}. Use the SHOW_3D_SIMULATION map action only for ideas scoring at least {{ show_threshold }}.
{% if auto_complete %}
IMPORTANT: {{ auto_complete_reason }} Do not ask any further questions. Fill in plausible details from the conversation so far, assign a feasibility score, and answer with status VALIDATED including idea_title and idea_description{% if not refinement %} and author (use null if no name was given){% endif %}.
{% endif %}
Output format: write your conversational reply first, then end with exactly one JSON block:
```json
{
  "map_action": "{{ map_actions | join('" | "') }}",
  "coordinates": {"lat": number, "lng": number},
  "feasibility_score": number,
  "status": "{{ statuses | join('" | "') }}",
  "idea_title": string | null,
  "idea_description": string | null,
  "author": string | null,
  "flags": [string]
}
```
Use DRAFT while details are missing, REJECTED when the realism filter applies, and VALIDATED only with a title, a description summarizing the building details{% if not refinement %} and the author{% endif %}. Put short risk or conflict labels (zoning, noise, traffic) in flags."#;

const STREET_ANALYSIS: &str = "Analyze this street-level photo. In 2-3 short sentences describe (1) the architectural style of the surroundings, (2) the urban density, (3) any vegetation or climate clues.";

const OVERHEAD_ANALYSIS: &str = "This is a satellite view. In 2-3 short factual sentences describe (1) the type of area, (2) the density and kind of structures, (3) the road layout.";

const DESIGN_BRIEF: &str = r#"You are the head architect of a city planning office. Write one descriptive paragraph of about 150 words that a renderer can use to visualize this citizen proposal.

Citizen vision: {{ idea }}
{% if place_name %}Place: {{ place_name }}
{% endif %}{% if street %}Street-level context: {{ street }}
{% endif %}{% if overhead %}Overhead context: {{ overhead }}
{% endif %}
Describe massing, materials, facade, landscaping and how the building sits in its surroundings. Reply with the paragraph only."#;

const IMAGE_PROMPT: &str = r#"Generate a crisp 3D digital-twin architectural visualization of a proposed civic project.
PROJECT: {{ title }}
COORDINATES: {{ coordinates }}
{% if place_name %}PLACE: {{ place_name }}
{% endif %}
DESIGN BRIEF:
{{ brief }}

{% if has_street %}Match the architectural style and scale of context image A.
{% endif %}{% if has_overhead %}Match the surrounding density and road layout of context image B.
{% endif %}Render in daylight with sharp geometry, legible signage and no blur, haze or lens effects."#;

const DEMAND_WEIGHT: &str = r#"Rate how strongly this resident review expresses demand for a "{{ business_type }}".
Review: "{{ review }}"
Answer with a JSON object {"weight": <integer 1-10>} where 10 is the most urgent."#;

const NEIGHBORHOOD_REPORT: &str = r#"Analyze these community proposals within a 1 km radius and write a neighborhood needs report.
Proposals:
{% for p in proposals -%}
- Type: {{ p.business_type }}; Description: "{{ p.review }}"; Score: {{ p.score }}; Agreements: {{ p.agreement_count }}
{% endfor %}
Answer with a JSON object:
{
  "topRecommendation": "one sentence naming the most needed business or renovation",
  "communitySentiment": "a short summary of why residents want these things",
  "marketGaps": ["gap classification", "..."]
}"#;

/// Offered by the planning agent before the citizen says anything.
pub const GREETING: &str = "Hi! I'm the CivicSense planning agent. What would you like to see built or improved at this location?";

/// Text of the synthetic user turn sent by "submit now".
pub const FINALIZE_REQUEST: &str = "Please submit my proposal now with the details we have discussed so far.";

/// Data for the interview system instruction.
#[derive(Debug, Clone)]
pub struct SystemPromptContext<'a> {
    pub location: LatLng,
    pub scale: ScoreScale,
    pub refinement: Option<&'a Proposal>,
    /// Set when the next reply must validate.
    pub auto_complete: Option<AutoCompleteReason>,
}

#[derive(Serialize)]
struct ProposalLine<'a> {
    business_type: &'a str,
    review: &'a str,
    score: String,
    agreement_count: u64,
}

/// Renders every prompt from the built-in templates.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer").finish_non_exhaustive()
    }
}

impl PromptRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system_instruction", SYSTEM_INSTRUCTION),
            ("design_brief", DESIGN_BRIEF),
            ("image_prompt", IMAGE_PROMPT),
            ("demand_weight", DEMAND_WEIGHT),
            ("neighborhood_report", NEIGHBORHOOD_REPORT),
        ] {
            env.add_template(name, source)
                .map_err(|e| CivicError::internal(format!("Invalid prompt template '{name}': {e}")))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        self.env
            .get_template(name)
            .and_then(|template| template.render(ctx))
            .map_err(|e| CivicError::internal(format!("Failed to render prompt '{name}': {e}")))
    }

    pub fn system_instruction(&self, ctx: &SystemPromptContext<'_>) -> Result<String> {
        let (show_threshold, scale_max) = match ctx.scale {
            ScoreScale::Feasibility100 => (80, 100),
            ScoreScale::Saturation10 => (8, 10),
        };
        let auto_complete_reason = match ctx.auto_complete {
            Some(AutoCompleteReason::Stalled { .. }) => {
                "You have already asked for the missing details repeatedly without getting them."
            }
            Some(AutoCompleteReason::UserRequested) => "The citizen asked to submit the proposal now.",
            None => "",
        };
        let refinement = ctx.refinement.map(|p| {
            context! {
                business_type => p.business_type,
                review => p.review,
            }
        });

        self.render(
            "system_instruction",
            context! {
                location => ctx.location,
                scale_max,
                show_threshold,
                refinement,
                auto_complete => ctx.auto_complete.is_some(),
                auto_complete_reason,
                map_actions => [MapAction::MoveTo, MapAction::ShowPins, MapAction::Show3D, MapAction::None],
                statuses => [ProposalStatus::Draft, ProposalStatus::Validated, ProposalStatus::Rejected],
            },
        )
    }

    pub fn street_analysis(&self) -> &'static str {
        STREET_ANALYSIS
    }

    pub fn overhead_analysis(&self) -> &'static str {
        OVERHEAD_ANALYSIS
    }

    pub fn design_brief(
        &self,
        idea: &str,
        place_name: Option<&str>,
        street: Option<&str>,
        overhead: Option<&str>,
    ) -> Result<String> {
        self.render(
            "design_brief",
            context! { idea, place_name, street, overhead },
        )
    }

    pub fn image_prompt(
        &self,
        title: &str,
        brief: &str,
        location: LatLng,
        place_name: Option<&str>,
        has_street: bool,
        has_overhead: bool,
    ) -> Result<String> {
        self.render(
            "image_prompt",
            context! {
                title,
                brief,
                coordinates => format!("{:.6}, {:.6}", location.lat, location.lng),
                place_name,
                has_street,
                has_overhead,
            },
        )
    }

    pub fn demand_weight(&self, business_type: &str, review: &str) -> Result<String> {
        self.render("demand_weight", context! { business_type, review })
    }

    pub fn neighborhood_report(&self, proposals: &[Proposal]) -> Result<String> {
        let lines: Vec<ProposalLine<'_>> = proposals
            .iter()
            .map(|p| ProposalLine {
                business_type: &p.business_type,
                review: &p.review,
                score: p.score.to_string(),
                agreement_count: p.agreement_count,
            })
            .collect();
        self.render("neighborhood_report", context! { proposals => lines })
    }
}
