//! Reasoning orchestration: context assembly, provider call, validation,
//! normalization, prior blending, and confidence tiering.
//!
//! Reasoning is assistive and probabilistic. Failures here degrade the
//! guidance attached to an event; they never fail the event itself.

use crate::provider::{AiMeta, AudioInput, ProviderClient};
use chrono::Utc;
use cradle_common::{
    guidance_label, is_probability, minutes_since, normalize_inference, round4, AudioAnalysis,
    CareEvent, CauseLabel, ConfidenceLevel, ReasoningErrorKind, ReasoningFailure,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Guidance list passed back to the model for continuity, at most this many.
const RECENT_GUIDANCE_LIMIT: usize = 3;

const UNCERTAINTY_NOTE: &str = "Limited recent care data available";
const BLEND_STRATEGY: &str = "0.7_model + 0.3_feedback_prior";

const PROMPT: &str = "\
You are a supportive infant-care assistant. Given a crying event, recent care \
history, prior guidance, and learned cause priors, infer the most likely cause \
of crying and practical next steps for the caregiver. Never give medical \
advice; suggest contacting a professional when symptoms look concerning.";

const OUTPUT_CONTRACT: &str = "\
Return JSON only with exactly two top-level keys: `audio_analysis` and `ai_guidance`.\n\
`audio_analysis` must include `transcription` and `inference` with probabilities \
in [0,1] for hunger, discomfort, emotional_need, unknown.\n\
`ai_guidance` must include: most_likely_cause(label, confidence, reasoning), \
alternative_causes(list of label+confidence), recommended_actions(list), \
caregiver_notice.";

/// Minutes-ago digest of the most recent feeding/diaper/sleep events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecentCareSummary {
    pub last_feeding_minutes_ago: Option<i64>,
    pub last_diaper_minutes_ago: Option<i64>,
    pub last_sleep_minutes_ago: Option<i64>,
    pub last_sleep_duration_min: Option<i64>,
}

/// Successful reasoning output, ready to merge into an event payload.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub audio_analysis: AudioAnalysis,
    pub ai_guidance: Value,
    pub ai_meta: AiMeta,
}

pub struct ReasoningEngine {
    provider: ProviderClient,
}

impl ReasoningEngine {
    pub fn new(provider: ProviderClient) -> Self {
        Self { provider }
    }

    /// Run one reasoning pass for a crying event.
    ///
    /// `audio` switches the provider call to multimodal; otherwise any
    /// `audio_analysis` already on the event payload is sent as text context.
    /// Returns either an enrichment or a structured failure, never both.
    pub async fn run(
        &self,
        event: &CareEvent,
        recent: &[CareEvent],
        audio: Option<AudioInput<'_>>,
        priors: &BTreeMap<CauseLabel, f64>,
    ) -> (Option<Enrichment>, Option<ReasoningFailure>) {
        let payload = event.payload.clone();
        let summary = build_recent_summary(recent);

        let mut current = Map::new();
        current.insert("type".into(), json!("crying"));
        current.insert("time".into(), json!(event.occurred_at));
        if audio.is_none() {
            let known = payload.get("audio_analysis").cloned().unwrap_or(json!({}));
            current.insert("audio_analysis".into(), known);
        }

        let user_input = json!({
            "current_event": Value::Object(current),
            "recent_care_summary": summary,
            "recent_ai_guidance": collect_recent_guidance(recent, RECENT_GUIDANCE_LIMIT),
            "learned_priors": priors,
            "constraints": {
                "no_medical_advice": true,
                "tone": "supportive",
                "target_audience": "caregiver",
            },
        });

        let full_prompt = format!("{}\n\n{}", PROMPT, OUTPUT_CONTRACT);
        let (raw_text, ai_meta, error) =
            self.provider.generate(&full_prompt, &user_input, audio).await;

        let meta_value = serde_json::to_value(&ai_meta).unwrap_or(json!({}));
        if let Some((kind, message)) = error {
            let mut failure = ReasoningFailure::new(kind, message, meta_value);
            failure.input = Some(user_input);
            return (None, Some(failure));
        }

        let raw_text = raw_text.unwrap_or_default();
        let parsed = match extract_json(&raw_text) {
            Some(parsed) => parsed,
            None => {
                let mut failure = ReasoningFailure::new(
                    ReasoningErrorKind::ParseError,
                    "provider output is not valid JSON",
                    meta_value,
                );
                failure.raw_text = Some(raw_text);
                return (None, Some(failure));
            }
        };

        let (audio_analysis, ai_guidance) = decompose(&parsed, &payload);

        if let Err(message) = validate_audio_analysis(&audio_analysis) {
            let mut failure =
                ReasoningFailure::new(ReasoningErrorKind::ValidationError, message, meta_value);
            failure.raw_output = Some(parsed);
            return (None, Some(failure));
        }
        if let Err(message) = validate_guidance(&ai_guidance) {
            let mut failure =
                ReasoningFailure::new(ReasoningErrorKind::ValidationError, message, meta_value);
            failure.raw_output = Some(parsed);
            return (None, Some(failure));
        }

        let normalized = AudioAnalysis {
            transcription: audio_analysis
                .get("transcription")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            inference: normalize_inference(
                audio_analysis.get("inference").unwrap_or(&Value::Null),
            ),
        };
        let finalized = finalize_guidance(ai_guidance, &summary, recent, priors);

        (
            Some(Enrichment {
                audio_analysis: normalized,
                ai_guidance: finalized,
                ai_meta,
            }),
            None,
        )
    }
}

/// Derive the recent-care summary from events newest-first.
pub fn build_recent_summary(recent: &[CareEvent]) -> RecentCareSummary {
    let now = Utc::now();
    let mut summary = RecentCareSummary::default();

    for event in recent {
        match event.category.as_str() {
            "feeding" if summary.last_feeding_minutes_ago.is_none() => {
                summary.last_feeding_minutes_ago = minutes_since(&event.occurred_at, now);
            }
            "diaper" if summary.last_diaper_minutes_ago.is_none() => {
                summary.last_diaper_minutes_ago = minutes_since(&event.occurred_at, now);
            }
            "sleep" if summary.last_sleep_minutes_ago.is_none() => {
                summary.last_sleep_minutes_ago = minutes_since(&event.occurred_at, now);
                summary.last_sleep_duration_min = event
                    .payload
                    .get("duration_min")
                    .and_then(Value::as_f64)
                    .map(|minutes| minutes as i64);
            }
            _ => {}
        }
    }
    summary
}

/// Guidance from the most recent crying events, for model continuity.
fn collect_recent_guidance(recent: &[CareEvent], limit: usize) -> Vec<Value> {
    let mut collected = Vec::new();
    for event in recent {
        if event.category != "crying" {
            continue;
        }
        let Some(ai_guidance) = event.payload.get("ai_guidance").filter(|g| g.is_object())
        else {
            continue;
        };
        collected.push(json!({
            "event_id": event.id,
            "occurred_at": event.occurred_at,
            "ai_guidance": ai_guidance,
        }));
        if collected.len() >= limit {
            break;
        }
    }
    collected
}

/// Extract a single JSON object from free text: a bare object parses
/// directly, otherwise the outermost `{...}` span is tried.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return serde_json::from_str(trimmed).ok();
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Split a parsed response into audio analysis and guidance.
///
/// Backward-compatible fallback: a guidance-shaped top level (bare
/// `most_likely_cause`) is treated as `ai_guidance`, and the event's
/// previously known analysis stands in for `audio_analysis`.
fn decompose(parsed: &Value, payload: &Value) -> (Value, Value) {
    let mut ai_guidance = parsed.get("ai_guidance").cloned().unwrap_or(Value::Null);
    if !ai_guidance.is_object() && parsed.get("most_likely_cause").map_or(false, Value::is_object)
    {
        ai_guidance = parsed.clone();
    }

    let mut audio_analysis = parsed.get("audio_analysis").cloned().unwrap_or(Value::Null);
    if !audio_analysis.is_object() {
        audio_analysis = payload.get("audio_analysis").cloned().unwrap_or(json!({}));
    }

    (audio_analysis, ai_guidance)
}

fn validate_audio_analysis(analysis: &Value) -> Result<(), String> {
    let Some(map) = analysis.as_object() else {
        return Err("audio_analysis must be an object".to_string());
    };
    if let Some(transcription) = map.get("transcription") {
        if !transcription.is_null() && !transcription.is_string() {
            return Err("audio_analysis.transcription must be a string".to_string());
        }
    }
    let Some(inference) = map.get("inference").and_then(Value::as_object) else {
        return Err("audio_analysis.inference must be an object".to_string());
    };
    let has_probability = CauseLabel::ALL.iter().any(|label| {
        inference
            .get(label.as_str())
            .and_then(Value::as_f64)
            .map_or(false, is_probability)
    });
    if !has_probability {
        return Err(
            "audio_analysis.inference must include probability values in [0,1]".to_string(),
        );
    }
    Ok(())
}

fn validate_guidance(guidance: &Value) -> Result<(), String> {
    let Some(map) = guidance.as_object() else {
        return Err("guidance output is not a JSON object".to_string());
    };
    for key in [
        "most_likely_cause",
        "alternative_causes",
        "recommended_actions",
        "caregiver_notice",
    ] {
        if !map.contains_key(key) {
            return Err(format!("missing field: {}", key));
        }
    }

    let Some(mlc) = map.get("most_likely_cause").and_then(Value::as_object) else {
        return Err("most_likely_cause must be object".to_string());
    };
    for key in ["label", "confidence", "reasoning"] {
        if !mlc.contains_key(key) {
            return Err(format!("most_likely_cause missing {}", key));
        }
    }
    if !mlc
        .get("confidence")
        .and_then(Value::as_f64)
        .map_or(false, is_probability)
    {
        return Err("most_likely_cause.confidence must be a number in [0, 1]".to_string());
    }

    let Some(alternatives) = map.get("alternative_causes").and_then(Value::as_array) else {
        return Err("alternative_causes must be list".to_string());
    };
    for item in alternatives {
        let Some(item) = item.as_object() else {
            return Err("alternative_causes items must be object".to_string());
        };
        match item.get("confidence").and_then(Value::as_f64) {
            Some(confidence) if is_probability(confidence) => {}
            Some(_) => {
                return Err("alternative_causes confidence must be number in [0, 1]".to_string())
            }
            None => return Err("alternative_causes confidence missing".to_string()),
        }
    }

    if !map.get("recommended_actions").map_or(false, Value::is_array) {
        return Err("recommended_actions must be list".to_string());
    }
    Ok(())
}

/// Two or more unknown care signals, or no recent events at all.
fn has_limited_context(summary: &RecentCareSummary, recent: &[CareEvent]) -> bool {
    if recent.is_empty() {
        return true;
    }
    let missing = [
        summary.last_feeding_minutes_ago,
        summary.last_diaper_minutes_ago,
        summary.last_sleep_minutes_ago,
    ]
    .iter()
    .filter(|value| value.is_none())
    .count();
    missing >= 2
}

/// Blend the winning label's confidence with its learned prior, when one exists.
fn apply_prior_blend(guidance: &mut Value, priors: &BTreeMap<CauseLabel, f64>) {
    let Some(label) = guidance_label(guidance) else {
        return;
    };
    let Some(&prior) = priors.get(&label) else {
        return;
    };
    let Some(confidence) = guidance
        .get("most_likely_cause")
        .and_then(|mlc| mlc.get("confidence"))
        .and_then(Value::as_f64)
    else {
        return;
    };
    if !is_probability(prior) || !is_probability(confidence) {
        return;
    }

    let blended = round4(0.7 * confidence + 0.3 * prior);
    guidance["most_likely_cause"]["confidence"] = json!(blended);
    guidance["prior_weight"] = json!({
        "label": label,
        "prior": prior,
        "strategy": BLEND_STRATEGY,
    });
}

/// Blend, tier, and annotate validated guidance for display.
fn finalize_guidance(
    mut guidance: Value,
    summary: &RecentCareSummary,
    recent: &[CareEvent],
    priors: &BTreeMap<CauseLabel, f64>,
) -> Value {
    apply_prior_blend(&mut guidance, priors);

    let confidence = guidance
        .get("most_likely_cause")
        .and_then(|mlc| mlc.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    guidance["confidence_level"] = json!(ConfidenceLevel::from_score(confidence));

    if has_limited_context(summary, recent) {
        guidance["uncertainty_note"] = json!(UNCERTAINTY_NOTE);
    } else if let Some(map) = guidance.as_object_mut() {
        map.remove("uncertainty_note");
    }
    guidance
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cradle_common::{iso_now, new_event_id};

    fn event_at(category: &str, occurred_at: &str, payload: Value) -> CareEvent {
        CareEvent {
            id: new_event_id(),
            kind: "manual".into(),
            occurred_at: occurred_at.into(),
            source: "parent".into(),
            category: category.into(),
            payload,
            tags: vec![],
            created_at: iso_now(),
        }
    }

    fn valid_guidance() -> Value {
        json!({
            "most_likely_cause": {
                "label": "hunger",
                "confidence": 0.8,
                "reasoning": "short rhythmic cries, last feeding long ago"
            },
            "alternative_causes": [{"label": "discomfort", "confidence": 0.15}],
            "recommended_actions": ["offer a feeding"],
            "caregiver_notice": "probabilistic suggestion"
        })
    }

    #[test]
    fn test_extract_json_bare_object() {
        let parsed = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed["a"], json!(1));
    }

    #[test]
    fn test_extract_json_embedded_span() {
        let text = "Here is the result:\n```json\n{\"a\": {\"b\": 2}}\n```\nthanks";
        let parsed = extract_json(text).unwrap();
        assert_eq!(parsed["a"]["b"], json!(2));
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json("").is_none());
        assert!(extract_json("no braces here").is_none());
        assert!(extract_json("{not json}").is_none());
    }

    #[test]
    fn test_decompose_two_key_shape() {
        let parsed = json!({
            "audio_analysis": {"transcription": "t", "inference": {"hunger": 1.0}},
            "ai_guidance": valid_guidance(),
        });
        let (analysis, guidance) = decompose(&parsed, &json!({}));
        assert_eq!(analysis["transcription"], json!("t"));
        assert!(guidance.get("most_likely_cause").is_some());
    }

    #[test]
    fn test_decompose_guidance_shaped_fallback() {
        let parsed = valid_guidance();
        let payload = json!({"audio_analysis": {"inference": {"hunger": 0.9}}});
        let (analysis, guidance) = decompose(&parsed, &payload);
        assert_eq!(analysis["inference"]["hunger"], json!(0.9));
        assert_eq!(guidance["most_likely_cause"]["label"], json!("hunger"));
    }

    #[test]
    fn test_validate_audio_analysis() {
        assert!(validate_audio_analysis(&json!({
            "transcription": "x",
            "inference": {"hunger": 0.5}
        }))
        .is_ok());

        let err = validate_audio_analysis(&json!({"transcription": "x"})).unwrap_err();
        assert!(err.contains("audio_analysis.inference"));

        let err =
            validate_audio_analysis(&json!({"inference": {"hunger": 7.0}})).unwrap_err();
        assert!(err.contains("[0,1]"));
    }

    #[test]
    fn test_validate_guidance_names_missing_field() {
        let mut guidance = valid_guidance();
        guidance.as_object_mut().unwrap().remove("caregiver_notice");
        let err = validate_guidance(&guidance).unwrap_err();
        assert_eq!(err, "missing field: caregiver_notice");

        let mut guidance = valid_guidance();
        guidance["most_likely_cause"]["confidence"] = json!(1.4);
        let err = validate_guidance(&guidance).unwrap_err();
        assert!(err.contains("must be a number in [0, 1]"));

        let mut guidance = valid_guidance();
        guidance["alternative_causes"] = json!([{"label": "discomfort"}]);
        let err = validate_guidance(&guidance).unwrap_err();
        assert!(err.contains("confidence missing"));
    }

    #[test]
    fn test_prior_blend_and_record() {
        let mut guidance = valid_guidance();
        let mut priors = BTreeMap::new();
        priors.insert(CauseLabel::Hunger, 0.4);
        apply_prior_blend(&mut guidance, &priors);

        let confidence = guidance["most_likely_cause"]["confidence"].as_f64().unwrap();
        assert_abs_diff_eq!(confidence, 0.68, epsilon = 1e-9);
        assert_eq!(guidance["prior_weight"]["label"], json!("hunger"));
        assert_eq!(guidance["prior_weight"]["strategy"], json!(BLEND_STRATEGY));
    }

    #[test]
    fn test_prior_blend_skips_unknown_label() {
        let mut guidance = valid_guidance();
        let priors = BTreeMap::new();
        apply_prior_blend(&mut guidance, &priors);
        assert!(guidance.get("prior_weight").is_none());
        assert_abs_diff_eq!(
            guidance["most_likely_cause"]["confidence"].as_f64().unwrap(),
            0.8,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_finalize_sets_tier_and_uncertainty() {
        let summary = RecentCareSummary::default();
        let finalized = finalize_guidance(valid_guidance(), &summary, &[], &BTreeMap::new());
        assert_eq!(finalized["confidence_level"], json!("high"));
        assert_eq!(finalized["uncertainty_note"], json!(UNCERTAINTY_NOTE));
    }

    #[test]
    fn test_finalize_removes_uncertainty_with_context() {
        let now = iso_now();
        let recent = vec![
            event_at("feeding", &now, json!({})),
            event_at("diaper", &now, json!({})),
            event_at("sleep", &now, json!({"duration_min": 45})),
        ];
        let summary = build_recent_summary(&recent);
        let mut guidance = valid_guidance();
        guidance["uncertainty_note"] = json!("stale");
        let finalized = finalize_guidance(guidance, &summary, &recent, &BTreeMap::new());
        assert!(finalized.get("uncertainty_note").is_none());
        assert_eq!(summary.last_sleep_duration_min, Some(45));
    }

    #[test]
    fn test_limited_context_heuristic() {
        let recent = vec![event_at("feeding", &iso_now(), json!({}))];
        let summary = build_recent_summary(&recent);
        // feeding known, diaper and sleep unknown -> limited
        assert!(has_limited_context(&summary, &recent));

        let recent = vec![
            event_at("feeding", &iso_now(), json!({})),
            event_at("diaper", &iso_now(), json!({})),
        ];
        let summary = build_recent_summary(&recent);
        assert!(!has_limited_context(&summary, &recent));

        assert!(has_limited_context(&RecentCareSummary::default(), &[]));
    }

    #[tokio::test]
    async fn test_run_without_credentials_degrades() {
        let engine = ReasoningEngine::new(ProviderClient::new(&Default::default()));
        let event = event_at("crying", &iso_now(), json!({}));
        let (enrichment, failure) = engine.run(&event, &[], None, &BTreeMap::new()).await;
        assert!(enrichment.is_none());
        let failure = failure.unwrap();
        assert_eq!(failure.kind, ReasoningErrorKind::ConfigurationError);
        assert!(failure.input.is_some());
        assert_eq!(failure.ai_meta["request_mode"], json!("text_contextual"));
    }
}
