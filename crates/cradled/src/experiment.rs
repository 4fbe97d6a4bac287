//! Treatment/control experiment controller.
//!
//! Every crying event gets a context-aware "treatment" reasoning pass and,
//! when that succeeds, a context-free "control" pass over the same audio
//! analysis. Both results are retained for uplift computation; display
//! selection never prefers an empty baseline over valid guidance.

use crate::priors::PriorStore;
use crate::provider::AudioInput;
use crate::reasoning::ReasoningEngine;
use crate::store::EventStore;
use anyhow::Result;
use chrono::Duration;
use cradle_common::{CareEvent, ReasoningFailure};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const CRYING_NOTICE: &str = "Crying insights are generated based on sound patterns and recent care history.\n\
They are probabilistic suggestions to assist caregivers, not medical diagnoses.";
pub const GUIDANCE_UNAVAILABLE_NOTICE: &str =
    "Guidance unavailable due to limited data at this time.";
pub const SAFETY_NOTICE: &str =
    "If high-intensity crying continues or worsens, consider contacting a pediatric professional.";

const HIGH_INTENSITY_WINDOW_MIN: i64 = 60;
const HIGH_INTENSITY_THRESHOLD: usize = 3;
const HIGH_INTENSITY_KEYWORDS: [&str; 5] = ["high", "intense", "piercing", "loud", "shrill"];

/// Experiment arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Treatment,
    Control,
}

impl Variant {
    pub fn parse(value: &str) -> Option<Variant> {
        match value {
            "treatment" => Some(Variant::Treatment),
            "control" => Some(Variant::Control),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Treatment => "treatment",
            Variant::Control => "control",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the arm for an event: an explicit request wins; otherwise the
/// auto-split hashes the event id into two stable buckets, else treatment.
pub fn assign_variant(requested: Option<&str>, event_id: &str, auto_split: bool) -> Variant {
    if let Some(variant) = requested.and_then(Variant::parse) {
        return variant;
    }
    if auto_split {
        let digest = hex::encode(Sha256::digest(event_id.as_bytes()));
        let bucket = u8::from_str_radix(&digest[..2], 16).unwrap_or(0) % 2;
        return if bucket == 1 {
            Variant::Control
        } else {
            Variant::Treatment
        };
    }
    Variant::Treatment
}

/// Caregiver-visible notice for a crying event.
pub fn compose_notice(include_guidance_unavailable: bool, include_safety: bool) -> String {
    let mut lines = vec![CRYING_NOTICE];
    if include_guidance_unavailable {
        lines.push(GUIDANCE_UNAVAILABLE_NOTICE);
    }
    if include_safety {
        lines.push(SAFETY_NOTICE);
    }
    lines.join("\n")
}

fn is_high_intensity(event: &CareEvent) -> bool {
    let Some(transcription) = event
        .payload
        .get("audio_analysis")
        .and_then(|analysis| analysis.get("transcription"))
        .and_then(Value::as_str)
    else {
        return false;
    };
    let transcription = transcription.to_lowercase();
    HIGH_INTENSITY_KEYWORDS
        .iter()
        .any(|keyword| transcription.contains(keyword))
}

/// Repeated high-intensity crying inside the lookback window triggers the
/// safety escalation line, independent of reasoning success.
pub fn should_add_safety_notice(current: &CareEvent, recent: &[CareEvent]) -> bool {
    let Some(current_time) = current.event_time() else {
        return false;
    };
    let window_start = current_time - Duration::minutes(HIGH_INTENSITY_WINDOW_MIN);

    let mut high_count = usize::from(is_high_intensity(current));
    for event in recent {
        if event.category != "crying" {
            continue;
        }
        let Some(event_time) = event.event_time() else {
            continue;
        };
        if event_time >= window_start && event_time <= current_time && is_high_intensity(event) {
            high_count += 1;
        }
    }
    high_count >= HIGH_INTENSITY_THRESHOLD
}

/// Pick the result to display. The control result is shown only when the
/// event was assigned control AND that pass produced valid guidance; an
/// empty baseline never beats valid treatment guidance.
pub fn select_shown(
    assigned: Variant,
    treatment: (&Value, &Value),
    control: (&Value, &Value),
) -> (Variant, Value, Value) {
    let (control_guidance, control_meta) = control;
    if assigned == Variant::Control && control_guidance.is_object() {
        (Variant::Control, control_guidance.clone(), control_meta.clone())
    } else {
        let (treatment_guidance, treatment_meta) = treatment;
        (
            Variant::Treatment,
            treatment_guidance.clone(),
            treatment_meta.clone(),
        )
    }
}

pub struct ExperimentController {
    engine: Arc<ReasoningEngine>,
    priors: Arc<PriorStore>,
    store: Arc<EventStore>,
    auto_split: bool,
}

impl ExperimentController {
    pub fn new(
        engine: Arc<ReasoningEngine>,
        priors: Arc<PriorStore>,
        store: Arc<EventStore>,
        auto_split: bool,
    ) -> Self {
        Self {
            engine,
            priors,
            store,
            auto_split,
        }
    }

    pub fn assign(&self, requested: Option<&str>, event_id: &str) -> Variant {
        assign_variant(requested, event_id, self.auto_split)
    }

    /// Run the dual reasoning pass and merge the outcome into the event
    /// payload, persisting it. Returns the treatment failure when reasoning
    /// degraded; the event write itself has already succeeded either way.
    pub async fn apply_reasoning(
        &self,
        event: &mut CareEvent,
        audio: Option<AudioInput<'_>>,
        assigned: Variant,
    ) -> Result<Option<ReasoningFailure>> {
        let recent: Vec<CareEvent> = self
            .store
            .list_recent(20, None)?
            .into_iter()
            .filter(|item| item.id != event.id)
            .collect();
        let priors = self.priors.load(Some(&event.occurred_at)).await;

        let (enrichment, failure) = self.engine.run(event, &recent, audio, &priors).await;

        let Some(enrichment) = enrichment else {
            let failure = failure.unwrap_or_else(|| {
                ReasoningFailure::new(
                    cradle_common::ReasoningErrorKind::TransportError,
                    "reasoning produced no result",
                    json!({}),
                )
            });
            self.record_failure(event, assigned, &failure, &recent)?;
            info!("Guidance unavailable for {}: {}", event.id, failure.error);
            return Ok(Some(failure));
        };

        // Control pass: same audio analysis, no context, no priors. This
        // isolates the contribution of context and learned priors.
        let control_event = CareEvent {
            id: event.id.clone(),
            kind: event.kind.clone(),
            occurred_at: event.occurred_at.clone(),
            source: event.source.clone(),
            category: event.category.clone(),
            payload: json!({
                "audio_analysis": serde_json::to_value(&enrichment.audio_analysis)?,
            }),
            tags: vec![],
            created_at: event.created_at.clone(),
        };
        let (control_enrichment, control_error) = self
            .engine
            .run(&control_event, &[], None, &BTreeMap::new())
            .await;
        if let Some(control_error) = &control_error {
            warn!("Control pass failed for {}: {}", event.id, control_error.error);
        }

        let treatment_guidance = enrichment.ai_guidance.clone();
        let treatment_meta = serde_json::to_value(&enrichment.ai_meta)?;
        let (control_guidance, control_meta) = match &control_enrichment {
            Some(control) => (
                control.ai_guidance.clone(),
                serde_json::to_value(&control.ai_meta)?,
            ),
            None => (Value::Null, json!({})),
        };

        let (shown_variant, shown_guidance, shown_meta) = select_shown(
            assigned,
            (&treatment_guidance, &treatment_meta),
            (&control_guidance, &control_meta),
        );

        let mut ab_test = json!({
            "assigned_variant": assigned,
            "shown_variant": shown_variant,
            "auto_split_enabled": self.auto_split,
            "baseline_mode": "no_context_no_prior",
            "treatment": {"ai_guidance": treatment_guidance, "ai_meta": treatment_meta},
            "control": {"ai_guidance": control_guidance, "ai_meta": control_meta},
        });
        if let Some(control_error) = control_error {
            ab_test["control_error"] = serde_json::to_value(&control_error)?;
        }

        let analysis_value = serde_json::to_value(&enrichment.audio_analysis)?;
        let payload = event.payload_map_mut();
        payload.insert("audio_analysis".into(), analysis_value);
        payload.insert("ai_guidance".into(), shown_guidance);
        payload.insert("ai_meta".into(), shown_meta);
        payload.insert("ab_test".into(), ab_test);

        let add_safety = should_add_safety_notice(event, &recent);
        event
            .payload_map_mut()
            .insert("notice".into(), json!(compose_notice(false, add_safety)));

        self.store.update_payload(&event.id, &event.payload)?;
        Ok(None)
    }

    fn record_failure(
        &self,
        event: &mut CareEvent,
        assigned: Variant,
        failure: &ReasoningFailure,
        recent: &[CareEvent],
    ) -> Result<()> {
        let mut ai_meta = failure.ai_meta.clone();
        if let Some(meta) = ai_meta.as_object_mut() {
            meta.insert("error".into(), json!(failure.error));
        }
        let ab_test = json!({
            "assigned_variant": assigned,
            "shown_variant": Value::Null,
            "auto_split_enabled": self.auto_split,
            "baseline_mode": "no_context_no_prior",
            "treatment_error": serde_json::to_value(failure)?,
        });

        let payload = event.payload_map_mut();
        payload.remove("ai_guidance");
        payload.insert("ai_meta".into(), ai_meta);
        payload.insert("ab_test".into(), ab_test);

        let add_safety = should_add_safety_notice(event, recent);
        event
            .payload_map_mut()
            .insert("notice".into(), json!(compose_notice(true, add_safety)));

        self.store.update_payload(&event.id, &event.payload)?;
        Ok(())
    }
}
