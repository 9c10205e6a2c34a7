//! Market saturation scoring.
//!
//! `saturation = demand_weight / (competitor_count + 1)`. Larger means less
//! saturated; there is no upper bound.

/// Demand weight used when the model's rating is unusable.
pub const DEFAULT_DEMAND_WEIGHT: u8 = 5;
pub const MIN_DEMAND_WEIGHT: u8 = 1;
pub const MAX_DEMAND_WEIGHT: u8 = 10;

/// Radius of the competitor search, in metres.
pub const COMPETITOR_RADIUS_M: u32 = 500;

pub fn compute_saturation(demand_weight: u8, competitor_count: u32) -> f64 {
    let weight = demand_weight.clamp(MIN_DEMAND_WEIGHT, MAX_DEMAND_WEIGHT);
    f64::from(weight) / (f64::from(competitor_count) + 1.0)
}

/// Reads a 1–10 demand weight from model output.
///
/// Accepts a bare number, a JSON object with a numeric field (`weight`,
/// `demand_weight`, `urgency`, `score`), or text containing an integer.
/// Anything else, including out-of-range values, yields
/// [`DEFAULT_DEMAND_WEIGHT`].
pub fn parse_demand_weight(raw: &str) -> u8 {
    let value = serde_json::from_str::<serde_json::Value>(raw.trim())
        .ok()
        .and_then(|json| match json {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::Object(map) => ["weight", "demand_weight", "urgency", "score"]
                .iter()
                .find_map(|key| map.get(*key).and_then(serde_json::Value::as_f64)),
            _ => None,
        })
        .or_else(|| first_integer(raw).map(|n| n as f64));

    match value {
        Some(v) if v.is_finite() && v.fract() == 0.0 => {
            let v = v as i64;
            if (i64::from(MIN_DEMAND_WEIGHT)..=i64::from(MAX_DEMAND_WEIGHT)).contains(&v) {
                v as u8
            } else {
                DEFAULT_DEMAND_WEIGHT
            }
        }
        _ => DEFAULT_DEMAND_WEIGHT,
    }
}

fn first_integer(text: &str) -> Option<i64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let negative = text[..start].ends_with('-');
    digits
        .parse::<i64>()
        .ok()
        .map(|n| if negative { -n } else { n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_saturation_examples() {
        assert_eq!(compute_saturation(8, 0), 8.0);
        assert_eq!(compute_saturation(8, 3), 2.0);
        assert_eq!(compute_saturation(5, 0), 5.0);
    }

    #[test]
    fn test_compute_saturation_monotonic() {
        for weight in MIN_DEMAND_WEIGHT..=MAX_DEMAND_WEIGHT {
            for count in 0..50u32 {
                assert!(compute_saturation(weight, count + 1) < compute_saturation(weight, count));
                if weight < MAX_DEMAND_WEIGHT {
                    assert!(compute_saturation(weight + 1, count) > compute_saturation(weight, count));
                }
                assert!(compute_saturation(weight, count) >= 0.0);
            }
        }
    }

    #[test]
    fn test_parse_demand_weight() {
        assert_eq!(parse_demand_weight("7"), 7);
        assert_eq!(parse_demand_weight(r#"{"weight": 9}"#), 9);
        assert_eq!(parse_demand_weight("Urgency: 3 out of 10"), 3);
        assert_eq!(parse_demand_weight("11"), DEFAULT_DEMAND_WEIGHT);
        assert_eq!(parse_demand_weight("0"), DEFAULT_DEMAND_WEIGHT);
        assert_eq!(parse_demand_weight("-4"), DEFAULT_DEMAND_WEIGHT);
        assert_eq!(parse_demand_weight("6.5"), DEFAULT_DEMAND_WEIGHT);
        assert_eq!(parse_demand_weight("very urgent"), DEFAULT_DEMAND_WEIGHT);
        assert_eq!(parse_demand_weight(""), DEFAULT_DEMAND_WEIGHT);
    }
}
