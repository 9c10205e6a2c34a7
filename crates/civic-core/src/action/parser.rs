//! Action payload parser.
//!
//! Extracts the structured control block from free agent text. Malformed
//! model output is an expected condition: [`parse`] never fails, it falls back
//! to [`ActionPayload::default_for`] instead.

use super::payload::{
    ActionPayload, DraftPayload, MapAction, MapDirective, ProposalStatus, RejectedPayload,
    ValidatedPayload,
};
use crate::geo::LatLng;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::{debug, warn};

const FENCE: &str = "```";

/// Keys that identify a JSON object as an action payload.
const MARKER_KEYS: [&str; 3] = ["map_action", "status", "feasibility_score"];

/// Session facts the parser needs to fill defaults and validate.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    /// Coordinates copied into payloads that carry none.
    pub location: LatLng,
    /// Refinement sessions do not require an author.
    pub author_required: bool,
}

/// Where the payload was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    Fenced,
    Brace,
    Default,
}

/// Result of parsing one agent reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// The reply with every structured block removed, ready for display.
    pub clean_text: String,
    pub payload: ActionPayload,
    pub source: PayloadSource,
}

/// Parses an agent reply into display text plus a typed payload.
pub fn parse(agent_text: &str, ctx: &ParseContext) -> ParsedReply {
    let clean_text = clean_text(agent_text);

    let fenced = fenced_blocks(agent_text)
        .into_iter()
        .rev()
        .filter(|block| block.is_json_candidate())
        .find_map(|block| decode(block.body, ctx));
    if let Some(payload) = fenced {
        return ParsedReply {
            clean_text,
            payload,
            source: PayloadSource::Fenced,
        };
    }

    if let Some(payload) = brace_candidates(agent_text)
        .into_iter()
        .find_map(|candidate| decode(candidate, ctx))
    {
        debug!("Action payload recovered from unfenced object");
        return ParsedReply {
            clean_text,
            payload,
            source: PayloadSource::Brace,
        };
    }

    warn!(
        text_len = agent_text.len(),
        "No decodable action payload in agent reply, using default"
    );
    ParsedReply {
        clean_text,
        payload: ActionPayload::default_for(ctx.location),
        source: PayloadSource::Default,
    }
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug)]
struct FencedBlock<'a> {
    lang: &'a str,
    body: &'a str,
    /// Byte range of the whole block including both fences.
    start: usize,
    end: usize,
}

impl FencedBlock<'_> {
    fn is_json_candidate(&self) -> bool {
        self.lang.is_empty() || self.lang.eq_ignore_ascii_case("json")
    }
}

/// Finds every fenced block. An unterminated block runs to the end of text.
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(FENCE) {
        let start = cursor + offset;
        let after_open = start + FENCE.len();
        let header_end = text[after_open..]
            .find('\n')
            .map(|i| after_open + i)
            .unwrap_or(text.len());
        let header = text[after_open..header_end].trim();

        // "```{...}```" on a single line: no language tag, body starts right away
        let (lang, body_start) = if header.starts_with('{') {
            ("", after_open)
        } else {
            (header, (header_end + 1).min(text.len()))
        };

        let (body_end, end) = match text[body_start..].find(FENCE) {
            Some(i) => (body_start + i, body_start + i + FENCE.len()),
            None => (text.len(), text.len()),
        };

        blocks.push(FencedBlock {
            lang,
            body: &text[body_start..body_end],
            start,
            end,
        });
        cursor = end;
    }

    blocks
}

/// Returns the exclusive end of the balanced object starting at `start`.
///
/// Braces inside string literals are ignored. All delimiters are ASCII, so
/// byte offsets always fall on char boundaries.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Brace-delimited substrings in scan order, then the greedy first-to-last span.
fn brace_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        match balanced_object_end(text, start) {
            Some(end) => {
                candidates.push(&text[start..end]);
                cursor = end;
            }
            None => cursor = start + 1,
        }
    }

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if first < last {
            let greedy = &text[first..=last];
            if !candidates.contains(&greedy) {
                candidates.push(greedy);
            }
        }
    }

    candidates
}

// ============================================================================
// Decoding
// ============================================================================

fn decode(raw: &str, ctx: &ParseContext) -> Option<ActionPayload> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Candidate block is not valid JSON");
            return None;
        }
    };
    let object = value.as_object()?;
    if !object.contains_key("status") && !object.contains_key("map_action") {
        return None;
    }
    Some(into_payload(object, ctx))
}

fn into_payload(object: &Map<String, Value>, ctx: &ParseContext) -> ActionPayload {
    let action = string_field(object, "map_action")
        .and_then(|s| MapAction::from_str(&s).ok())
        .unwrap_or_default();
    let coordinates = object
        .get("coordinates")
        .and_then(coordinates_value)
        .unwrap_or(ctx.location);
    let map = MapDirective {
        action,
        coordinates,
    };
    let score = object
        .get("feasibility_score")
        .or_else(|| object.get("score"))
        .and_then(number_value)
        .unwrap_or(0.0);
    let status = string_field(object, "status")
        .and_then(|s| ProposalStatus::from_str(&s).ok())
        .unwrap_or_default();
    let title = string_field(object, "idea_title");
    let description = string_field(object, "idea_description");
    let author = string_field(object, "author");
    let flags = object
        .get("flags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match status {
        ProposalStatus::Rejected => ActionPayload::Rejected(RejectedPayload {
            map,
            score,
            title,
            flags,
        }),
        ProposalStatus::Validated => {
            let author_ok = !ctx.author_required || author.is_some();
            match (title, description) {
                (Some(title), Some(description)) if author_ok => {
                    ActionPayload::Validated(ValidatedPayload {
                        map,
                        score,
                        title,
                        description,
                        author,
                        flags,
                    })
                }
                (title, description) => {
                    warn!(
                        has_title = title.is_some(),
                        has_description = description.is_some(),
                        has_author = author.is_some(),
                        "Agent claimed VALIDATED without required fields, staying in DRAFT"
                    );
                    ActionPayload::Draft(DraftPayload {
                        map,
                        score,
                        title,
                        description,
                        author,
                        flags,
                        incomplete_validation: true,
                    })
                }
            }
        }
        ProposalStatus::Draft => ActionPayload::Draft(DraftPayload {
            map,
            score,
            title,
            description,
            author,
            flags,
            incomplete_validation: false,
        }),
    }
}

/// Non-empty trimmed string; the literal "null" counts as absent.
fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    let s = object.get(key)?.as_str()?.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s.to_string())
    }
}

fn number_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coordinates_value(value: &Value) -> Option<LatLng> {
    let object = value.as_object()?;
    let lat = object.get("lat").and_then(number_value)?;
    let lng = object
        .get("lng")
        .or_else(|| object.get("lon"))
        .and_then(number_value)?;
    LatLng::new(lat, lng).validated().ok()
}

// ============================================================================
// Display text
// ============================================================================

fn looks_like_payload(fragment: &str) -> bool {
    MARKER_KEYS.iter().any(|key| fragment.contains(key))
}

/// Truncated objects only count when a marker appears as a quoted key.
fn looks_like_truncated_payload(fragment: &str) -> bool {
    MARKER_KEYS
        .iter()
        .any(|key| fragment.contains(&format!("\"{key}\"")))
}

/// Removes JSON fences and stray payload-looking objects from agent text.
fn clean_text(text: &str) -> String {
    let mut without_fences = String::with_capacity(text.len());
    let mut cursor = 0;
    for block in fenced_blocks(text) {
        let strip = block.lang.eq_ignore_ascii_case("json")
            || (block.lang.is_empty() && looks_like_payload(block.body));
        if strip {
            without_fences.push_str(&text[cursor..block.start]);
            cursor = block.end;
        }
    }
    without_fences.push_str(&text[cursor..]);

    let mut cleaned = String::with_capacity(without_fences.len());
    let mut cursor = 0;
    let mut scan = 0;
    while let Some(offset) = without_fences[scan..].find('{') {
        let start = scan + offset;
        match balanced_object_end(&without_fences, start) {
            Some(end) if looks_like_payload(&without_fences[start..end]) => {
                cleaned.push_str(&without_fences[cursor..start]);
                cursor = end;
                scan = end;
            }
            Some(end) => scan = end,
            // Output cut off mid-object: drop everything from the brace on
            None if looks_like_truncated_payload(&without_fences[start..]) => {
                cleaned.push_str(&without_fences[cursor..start]);
                cursor = without_fences.len();
                break;
            }
            None => scan = start + 1,
        }
    }
    cleaned.push_str(&without_fences[cursor..]);

    let mut normalized = cleaned.trim().to_string();
    while normalized.contains("\n\n\n") {
        normalized = normalized.replace("\n\n\n", "\n\n");
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext {
            location: LatLng::new(40.7128, -74.0060),
            author_required: true,
        }
    }

    const VALIDATED_REPLY: &str = r#"Great idea, John! Your library is approved.

```json
{
  "map_action": "SHOW_3D_SIMULATION",
  "coordinates": {"lat": 40.7130, "lng": -74.0050},
  "feasibility_score": 88,
  "status": "VALIDATED",
  "idea_title": "Community Library",
  "idea_description": "Two-floor library with a reading garden",
  "author": "John Doe",
  "flags": ["parking"]
}
```"#;

    #[test]
    fn test_parse_fenced_validated() {
        let reply = parse(VALIDATED_REPLY, &ctx());
        assert_eq!(reply.source, PayloadSource::Fenced);
        assert_eq!(reply.clean_text, "Great idea, John! Your library is approved.");

        match reply.payload {
            ActionPayload::Validated(p) => {
                assert_eq!(p.title, "Community Library");
                assert_eq!(p.author.as_deref(), Some("John Doe"));
                assert_eq!(p.score, 88.0);
                assert_eq!(p.map.action, MapAction::Show3D);
                assert_eq!(p.map.coordinates, LatLng::new(40.7130, -74.0050));
                assert_eq!(p.flags, vec!["parking".to_string()]);
            }
            other => panic!("expected validated payload, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_inputs_yield_default() {
        let inputs = [
            "",
            "Just some friendly text without any block.",
            "```json\n{not json at all\n```",
            "```json\n[1, 2, 3]\n```",
            "{\"unrelated\": true}",
            "Trailing brace only }",
            "```json\n{\"map_action\": \"MOVE_TO\", ",
        ];
        for input in inputs {
            let reply = parse(input, &ctx());
            assert_eq!(reply.source, PayloadSource::Default, "input: {input:?}");
            assert_eq!(reply.payload, ActionPayload::default_for(ctx().location));
            assert_eq!(reply.payload.score(), 0.0);
        }
    }

    #[test]
    fn test_parse_unfenced_object_fallback() {
        let text = r#"Tell me more about the size. {"map_action": "MOVE_TO", "status": "DRAFT", "feasibility_score": "40"} Thanks!"#;
        let reply = parse(text, &ctx());
        assert_eq!(reply.source, PayloadSource::Brace);
        assert_eq!(reply.payload.status(), ProposalStatus::Draft);
        assert_eq!(reply.payload.score(), 40.0);
        assert_eq!(reply.payload.map().action, MapAction::MoveTo);
        assert_eq!(reply.clean_text, "Tell me more about the size.  Thanks!");
    }

    #[test]
    fn test_parse_prefers_last_fenced_block() {
        let text = "Example format:\n```json\n{\"status\": \"VALIDATED\"}\n```\nActual:\n```json\n{\"status\": \"REJECTED\", \"map_action\": \"NONE\"}\n```";
        let reply = parse(text, &ctx());
        assert_eq!(reply.payload.status(), ProposalStatus::Rejected);
        assert_eq!(reply.clean_text, "Example format:\n\nActual:");
    }

    #[test]
    fn test_parse_unterminated_fence_runs_to_end() {
        let text = "Almost there.\n```json\n{\"status\": \"DRAFT\", \"map_action\": \"SHOW_PINS\"}";
        let reply = parse(text, &ctx());
        assert_eq!(reply.source, PayloadSource::Fenced);
        assert_eq!(reply.payload.map().action, MapAction::ShowPins);
        assert_eq!(reply.clean_text, "Almost there.");
    }

    #[test]
    fn test_truncated_unfenced_object_is_stripped() {
        let text = "Tell me more about the size. {\"map_action\": \"NONE\", \"status\": \"DRA";
        let reply = parse(text, &ctx());
        assert_eq!(reply.source, PayloadSource::Default);
        assert_eq!(reply.clean_text, "Tell me more about the size.");

        // An open brace in prose without a quoted key stays
        let prose = "What is the status { of the lot?";
        assert_eq!(parse(prose, &ctx()).clean_text, prose);
    }

    #[test]
    fn test_validated_without_author_downgrades_to_draft() {
        let text = r#"```json
{"status": "VALIDATED", "idea_title": "Cafe", "idea_description": "Corner cafe", "author": null}
```"#;
        match parse(text, &ctx()).payload {
            ActionPayload::Draft(p) => {
                assert!(p.incomplete_validation);
                assert_eq!(p.title.as_deref(), Some("Cafe"));
            }
            other => panic!("expected draft, got {other:?}"),
        }

        let refinement = ParseContext {
            author_required: false,
            ..ctx()
        };
        assert_eq!(
            parse(text, &refinement).payload.status(),
            ProposalStatus::Validated
        );
    }

    #[test]
    fn test_validated_without_title_downgrades_to_draft() {
        let text = r#"```json
{"status": "validated", "idea_description": "Something", "author": "Ann"}
```"#;
        let payload = parse(text, &ctx()).payload;
        assert_eq!(payload.status(), ProposalStatus::Draft);
    }

    #[test]
    fn test_lenient_field_coercion() {
        let text = r#"```JSON
{"map_action": "teleport", "status": "draft", "coordinates": {"lat": 200, "lng": 0}, "feasibility_score": "abc", "idea_title": "  ", "flags": ["a", 3, ""]}
```"#;
        match parse(text, &ctx()).payload {
            ActionPayload::Draft(p) => {
                assert_eq!(p.map.action, MapAction::None);
                assert_eq!(p.map.coordinates, ctx().location);
                assert_eq!(p.score, 0.0);
                assert_eq!(p.title, None);
                assert_eq!(p.flags, vec!["a".to_string()]);
            }
            other => panic!("expected draft, got {other:?}"),
        }
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_scan() {
        let text = r#"Noted. {"status": "DRAFT", "idea_description": "A {curly} sign", "map_action": "NONE"}"#;
        let reply = parse(text, &ctx());
        assert_eq!(reply.source, PayloadSource::Brace);
        match reply.payload {
            ActionPayload::Draft(p) => {
                assert_eq!(p.description.as_deref(), Some("A {curly} sign"))
            }
            other => panic!("expected draft, got {other:?}"),
        }
        assert_eq!(reply.clean_text, "Noted.");
    }

    #[test]
    fn test_clean_text_keeps_non_json_code_and_plain_braces() {
        let text = "Use {name} here.\n```rust\nfn main() {}\n```";
        let reply = parse(text, &ctx());
        assert_eq!(reply.clean_text, text);
    }

    #[test]
    fn test_rejected_payload() {
        let text = "A skyscraper would not fit this street.\n```json\n{\"status\": \"REJECTED\", \"map_action\": \"NONE\", \"feasibility_score\": 5, \"idea_title\": \"Skyscraper\"}\n```";
        match parse(text, &ctx()).payload {
            ActionPayload::Rejected(p) => {
                assert_eq!(p.title.as_deref(), Some("Skyscraper"));
                assert_eq!(p.score, 5.0);
                assert_eq!(p.map.action, MapAction::None);
            }
            other => panic!("expected rejected, got {other:?}"),
        }
    }
}
