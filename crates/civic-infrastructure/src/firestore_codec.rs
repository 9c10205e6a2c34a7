//! Conversion between proposals and Firestore REST documents.
//!
//! Firestore wraps every field in a typed value (`stringValue`,
//! `doubleValue`, `integerValue` as a decimal string, `mapValue`, ...).
//! Field names follow the `pins` collection written by the web client, so
//! documents created there can be read here and vice versa.

use chrono::{DateTime, Utc};
use civic_core::error::{CivicError, Result};
use civic_core::geo::LatLng;
use civic_core::identity::ANONYMOUS_AUTHOR;
use civic_core::proposal::{NewProposal, Proposal, Score, ScoreScale, VisionImage};
use serde::Deserialize;
use serde_json::{Map, Value, json};

pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_AGREEMENT_COUNT: &str = "agreementCount";

/// A document as returned by `GET`, `list` and `commit`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub write_results: Vec<WriteResult>,
    #[serde(default)]
    pub commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    #[serde(default)]
    pub transform_results: Vec<Value>,
}

impl CommitResponse {
    /// First transform result of the first write.
    pub fn first_transform(&self) -> Option<&Value> {
        self.write_results
            .first()
            .and_then(|w| w.transform_results.first())
    }
}

fn string(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn double(value: f64) -> Value {
    json!({ "doubleValue": value })
}

fn integer(value: u64) -> Value {
    json!({ "integerValue": value.to_string() })
}

fn optional_string(value: Option<&str>) -> Value {
    match value {
        Some(v) => string(v),
        None => json!({ "nullValue": null }),
    }
}

fn map(fields: Map<String, Value>) -> Value {
    json!({ "mapValue": { "fields": fields } })
}

/// Encodes the fields of a new proposal. `createdAt` is left to a
/// server-side transform.
pub fn encode_new(proposal: &NewProposal) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("lat".into(), double(proposal.location.lat));
    fields.insert("lng".into(), double(proposal.location.lng));
    fields.insert("businessType".into(), string(&proposal.business_type));
    fields.insert("review".into(), string(&proposal.review));
    fields.insert("author".into(), string(&proposal.author));
    fields.insert(FIELD_AGREEMENT_COUNT.into(), integer(0));
    fields.insert("score".into(), double(proposal.score.value));
    fields.insert("scoreScale".into(), string(&proposal.score.scale.to_string()));
    fields.insert(
        "visionImage".into(),
        match &proposal.vision_image {
            Some(image) => encode_vision_image(image),
            None => json!({ "nullValue": null }),
        },
    );
    fields.insert(
        "parentProposalId".into(),
        optional_string(proposal.parent_proposal_id.as_deref()),
    );
    fields.insert(
        "flags".into(),
        json!({ "arrayValue": { "values": proposal.flags.iter().map(|f| string(f)).collect::<Vec<_>>() } }),
    );
    fields.insert("ownerId".into(), optional_string(proposal.owner_id.as_deref()));
    fields.insert("submissionKey".into(), string(&proposal.submission_key));
    fields
}

fn encode_vision_image(image: &VisionImage) -> Value {
    let mut fields = Map::new();
    match image {
        VisionImage::Url { url } => {
            fields.insert("kind".into(), string("url"));
            fields.insert("url".into(), string(url));
        }
        VisionImage::Inline { mime_type, data } => {
            fields.insert("kind".into(), string("inline"));
            fields.insert("mimeType".into(), string(mime_type));
            fields.insert("data".into(), string(data));
        }
    }
    map(fields)
}

// ============================================================================
// Decoding
// ============================================================================

fn get_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

/// Reads `doubleValue` or `integerValue` as a float.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    if let Some(d) = value.get("doubleValue") {
        return d.as_f64().or_else(|| d.as_str()?.parse().ok());
    }
    let i = value.get("integerValue")?;
    i.as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| i.as_i64())
        .map(|n| n as f64)
}

/// Reads an `integerValue` (decimal string or number) as a count.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    let i = value.get("integerValue")?;
    i.as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| i.as_u64())
}

fn get_f64(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    value_as_f64(fields.get(key)?)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn decode_score(fields: &Map<String, Value>) -> Score {
    if let Some(value) = get_f64(fields, "score") {
        let scale = get_string(fields, "scoreScale")
            .and_then(|s| s.parse::<ScoreScale>().ok())
            .unwrap_or_default();
        return Score::new(value, scale);
    }
    // Older documents only carry the 0–10 saturation index
    let legacy = get_f64(fields, "saturationIndex").unwrap_or(0.0);
    Score::new(legacy, ScoreScale::Saturation10)
}

fn decode_vision_image(fields: &Map<String, Value>) -> Option<VisionImage> {
    let value = fields.get("visionImage")?;
    // The web client stores a bare URL or data URI string
    if let Some(src) = value.get("stringValue").and_then(Value::as_str) {
        return Some(match src.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
            Some((mime_type, data)) => VisionImage::Inline {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            },
            None => VisionImage::Url {
                url: src.to_string(),
            },
        });
    }
    let inner = value.get("mapValue")?.get("fields")?.as_object()?;
    match get_string(inner, "kind")?.as_str() {
        "url" => Some(VisionImage::Url {
            url: get_string(inner, "url")?,
        }),
        "inline" => Some(VisionImage::Inline {
            mime_type: get_string(inner, "mimeType")?,
            data: get_string(inner, "data")?,
        }),
        _ => None,
    }
}

/// Last path segment of a document name.
pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Decodes a stored document into a proposal.
///
/// Missing text fields get neutral defaults; a document without usable
/// coordinates is rejected.
pub fn decode(document: &Document) -> Result<Proposal> {
    let fields = &document.fields;
    let id = document_id(&document.name).to_string();

    let (lat, lng) = match (get_f64(fields, "lat"), get_f64(fields, "lng")) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            return Err(CivicError::data_access(format!(
                "Proposal '{id}' has no coordinates"
            )));
        }
    };

    let created_at = fields
        .get(FIELD_CREATED_AT)
        .and_then(|v| v.get("timestampValue"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .or_else(|| document.create_time.as_deref().and_then(parse_timestamp))
        .unwrap_or_default();

    let flags = fields
        .get("flags")
        .and_then(|v| v.get("arrayValue"))
        .and_then(|v| v.get("values"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.get("stringValue")?.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(Proposal {
        id,
        location: LatLng::new(lat, lng),
        business_type: get_string(fields, "businessType").unwrap_or_else(|| "New Proposal".to_string()),
        review: get_string(fields, "review").unwrap_or_default(),
        author: get_string(fields, "author").unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
        agreement_count: fields
            .get(FIELD_AGREEMENT_COUNT)
            .and_then(value_as_u64)
            .unwrap_or(0),
        score: decode_score(fields),
        vision_image: decode_vision_image(fields),
        parent_proposal_id: get_string(fields, "parentProposalId"),
        flags,
        owner_id: get_string(fields, "ownerId"),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_proposal() -> NewProposal {
        NewProposal {
            submission_key: "k1".to_string(),
            location: LatLng::new(40.712812345678, -74.006),
            business_type: "Community Library".to_string(),
            review: "Two floors".to_string(),
            author: "John Doe".to_string(),
            score: Score::new(90.0, ScoreScale::Feasibility100),
            vision_image: Some(VisionImage::Inline {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }),
            parent_proposal_id: Some("parent".to_string()),
            flags: vec!["zoning".to_string()],
            owner_id: None,
        }
    }

    #[test]
    fn test_encode_uses_typed_values() {
        let fields = encode_new(&new_proposal());
        assert_eq!(fields["lat"]["doubleValue"], 40.712812345678);
        assert_eq!(fields["agreementCount"]["integerValue"], "0");
        assert_eq!(fields["scoreScale"]["stringValue"], "feasibility100");
        assert!(fields["ownerId"]["nullValue"].is_null());
        assert_eq!(fields["flags"]["arrayValue"]["values"][0]["stringValue"], "zoning");
        assert!(!fields.contains_key(FIELD_CREATED_AT));
    }

    #[test]
    fn test_decode_encoded_document() {
        let document = Document {
            name: "projects/p/databases/(default)/documents/pins/k1".to_string(),
            fields: encode_new(&new_proposal()),
            create_time: Some("2025-01-02T03:04:05.123456Z".to_string()),
        };
        let proposal = decode(&document).unwrap();
        assert_eq!(proposal.id, "k1");
        assert_eq!(proposal.location.lat, 40.712812345678);
        assert_eq!(proposal.score, Score::new(90.0, ScoreScale::Feasibility100));
        assert_eq!(proposal.parent_proposal_id.as_deref(), Some("parent"));
        assert_eq!(proposal.owner_id, None);
        assert_eq!(proposal.created_at.to_rfc3339(), "2025-01-02T03:04:05.123456+00:00");
        assert!(matches!(proposal.vision_image, Some(VisionImage::Inline { .. })));
    }

    #[test]
    fn test_decode_legacy_web_document() {
        let document: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/pins/abc",
            "fields": {
                "lat": {"doubleValue": 40.7135},
                "lng": {"doubleValue": -74.0045},
                "businessType": {"stringValue": "Rooftop Urban Farm"},
                "review": {"stringValue": "Hydroponic farm"},
                "author": {"stringValue": "Marcus Chen"},
                "agreementCount": {"integerValue": "128"},
                "saturationIndex": {"doubleValue": 9.2},
                "visionImage": {"stringValue": "data:image/jpeg;base64,QUJD"},
                "createdAt": {"timestampValue": "2025-03-01T10:00:00Z"}
            }
        }))
        .unwrap();

        let proposal = decode(&document).unwrap();
        assert_eq!(proposal.agreement_count, 128);
        assert_eq!(proposal.score, Score::new(9.2, ScoreScale::Saturation10));
        assert_eq!(
            proposal.vision_image,
            Some(VisionImage::Inline {
                mime_type: "image/jpeg".to_string(),
                data: "QUJD".to_string()
            })
        );
        assert!(proposal.flags.is_empty());
    }

    #[test]
    fn test_decode_rejects_missing_coordinates() {
        let document: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/pins/x",
            "fields": {"lat": {"integerValue": "40"}}
        }))
        .unwrap();
        assert!(decode(&document).is_err());
    }

    #[test]
    fn test_commit_transform_result() {
        let response: CommitResponse = serde_json::from_value(json!({
            "writeResults": [{"updateTime": "t", "transformResults": [{"integerValue": "43"}]}],
            "commitTime": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(response.first_transform().and_then(value_as_u64), Some(43));
    }
}
