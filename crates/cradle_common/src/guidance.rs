//! Audio analysis and guidance artifacts carried on crying event payloads.

use crate::labels::{is_probability, CauseLabel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Round to 4 decimals, the precision used for all stored probabilities.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Structured result of audio inference from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAnalysis {
    #[serde(default)]
    pub transcription: String,
    pub inference: BTreeMap<CauseLabel, f64>,
}

impl AudioAnalysis {
    /// Build a normalized analysis from a raw provider object.
    pub fn from_raw(raw: &Value) -> AudioAnalysis {
        let transcription = raw
            .get("transcription")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        AudioAnalysis {
            transcription,
            inference: normalize_inference(raw.get("inference").unwrap_or(&Value::Null)),
        }
    }
}

/// Renormalize a raw inference mapping over the cause taxonomy.
///
/// Unrecognized labels and negative values are dropped. If nothing positive
/// survives, the distribution collapses to `{unknown: 1.0}`.
pub fn normalize_inference(raw: &Value) -> BTreeMap<CauseLabel, f64> {
    let mut scores: BTreeMap<CauseLabel, f64> =
        CauseLabel::ALL.iter().map(|label| (*label, 0.0)).collect();

    if let Some(map) = raw.as_object() {
        for label in CauseLabel::ALL {
            if let Some(value) = map.get(label.as_str()).and_then(Value::as_f64) {
                if value >= 0.0 && value.is_finite() {
                    scores.insert(label, value);
                }
            }
        }
    }

    let total: f64 = scores.values().sum();
    if total <= 0.0 {
        for value in scores.values_mut() {
            *value = 0.0;
        }
        scores.insert(CauseLabel::Unknown, 1.0);
    } else {
        for value in scores.values_mut() {
            *value = round4(*value / total);
        }
    }
    scores
}

/// The label the shown guidance names as most likely, if any.
pub fn guidance_label(guidance: &Value) -> Option<CauseLabel> {
    guidance
        .get("most_likely_cause")
        .and_then(|mlc| mlc.get("label"))
        .and_then(Value::as_str)
        .and_then(CauseLabel::parse)
}

/// The confidence carried by `most_likely_cause`, when it is a valid probability.
pub fn guidance_confidence(guidance: &Value) -> Option<f64> {
    let confidence = guidance
        .get("most_likely_cause")
        .and_then(|mlc| mlc.get("confidence"))
        .and_then(Value::as_f64)?;
    is_probability(confidence).then_some(confidence)
}
