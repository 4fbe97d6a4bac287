//! Guidance outcome metrics over crying events with caregiver feedback.
//!
//! Rates and medians are `None` whenever the denominator is empty, which
//! serializes as `null`. A zero-feedback deployment reports nulls, not
//! zeros.

use crate::store::EventStore;
use anyhow::Result;
use cradle_common::round4;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Helpful-rate and resolution-time stats for one slice of feedback events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SliceStats {
    pub samples: usize,
    pub helpful_rate: Option<f64>,
    pub median_resolved_minutes: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpliftStats {
    pub helpful_rate_uplift: Option<f64>,
    pub median_resolved_minutes_delta: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextComparison {
    pub with_context: SliceStats,
    pub limited_context: SliceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbComparison {
    pub treatment: SliceStats,
    pub control: SliceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsTotals {
    pub crying_events: usize,
    pub feedback_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub helpful_rate: Option<f64>,
    pub median_resolved_minutes: Option<f64>,
    pub uplift: UpliftStats,
    pub context_comparison: ContextComparison,
    pub ab_comparison: AbComparison,
    pub ab_uplift: UpliftStats,
    pub totals: MetricsTotals,
}

#[derive(Debug, Default)]
struct SliceAccum {
    total: usize,
    helpful: usize,
    resolved: Vec<f64>,
}

impl SliceAccum {
    fn observe(&mut self, helpful: bool, resolved_in: Option<f64>) {
        self.total += 1;
        if helpful {
            self.helpful += 1;
        }
        if let Some(minutes) = resolved_in {
            self.resolved.push(minutes);
        }
    }

    fn rate(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(round4(self.helpful as f64 / self.total as f64))
    }

    fn finish(&self) -> SliceStats {
        SliceStats {
            samples: self.total,
            helpful_rate: self.rate(),
            median_resolved_minutes: median(&self.resolved),
        }
    }
}

pub struct MetricsAggregator {
    store: Arc<EventStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// One full scan over crying events. Cheap at this deployment's scale;
    /// nothing is cached.
    pub fn build(&self) -> Result<MetricsReport> {
        let crying_events = self.store.list_by_category("crying")?;

        let mut overall = SliceAccum::default();
        let mut with_context = SliceAccum::default();
        let mut limited_context = SliceAccum::default();
        let mut treatment = SliceAccum::default();
        let mut control = SliceAccum::default();

        for event in &crying_events {
            let Some(payload) = event.payload_map() else {
                continue;
            };
            let Some(feedback) = payload.get("user_feedback").and_then(Value::as_object) else {
                continue;
            };
            let Some(helpful) = feedback.get("helpful").and_then(Value::as_bool) else {
                continue;
            };
            let resolved_in = feedback.get("resolved_in_minutes").and_then(Value::as_f64);

            overall.observe(helpful, resolved_in);

            let uncertain = payload
                .get("ai_guidance")
                .and_then(Value::as_object)
                .map(|guidance| truthy(guidance.get("uncertainty_note")))
                .unwrap_or(false);
            if uncertain {
                limited_context.observe(helpful, resolved_in);
            } else {
                with_context.observe(helpful, resolved_in);
            }

            let variant = payload
                .get("ab_test")
                .and_then(Value::as_object)
                .and_then(|ab| {
                    ab.get("shown_variant")
                        .and_then(Value::as_str)
                        .or_else(|| ab.get("assigned_variant").and_then(Value::as_str))
                });
            match variant {
                Some("treatment") => treatment.observe(helpful, resolved_in),
                Some("control") => control.observe(helpful, resolved_in),
                _ => {}
            }
        }

        let with_context = with_context.finish();
        let limited_context = limited_context.finish();
        let treatment = treatment.finish();
        let control = control.finish();

        Ok(MetricsReport {
            helpful_rate: overall.rate(),
            median_resolved_minutes: median(&overall.resolved),
            uplift: uplift(&with_context, &limited_context),
            ab_uplift: uplift(&treatment, &control),
            context_comparison: ContextComparison {
                with_context,
                limited_context,
            },
            ab_comparison: AbComparison { treatment, control },
            totals: MetricsTotals {
                crying_events: crying_events.len(),
                feedback_events: overall.total,
            },
        })
    }
}

/// Rate uplift of the favored slice over the baseline, and the median delta
/// where positive means the favored slice resolved faster.
fn uplift(favored: &SliceStats, baseline: &SliceStats) -> UpliftStats {
    let helpful_rate_uplift = match (favored.helpful_rate, baseline.helpful_rate) {
        (Some(favored), Some(baseline)) => Some(round4(favored - baseline)),
        _ => None,
    };
    let median_resolved_minutes_delta = match (
        favored.median_resolved_minutes,
        baseline.median_resolved_minutes,
    ) {
        (Some(favored), Some(baseline)) => Some(round2(baseline - favored)),
        _ => None,
    };
    UpliftStats {
        helpful_rate_uplift,
        median_resolved_minutes_delta,
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use approx::assert_abs_diff_eq;
    use cradle_common::{iso_now, new_event_id, CareEvent};
    use serde_json::json;

    fn feedback_event(
        helpful: bool,
        resolved_in: Option<f64>,
        uncertainty_note: Option<&str>,
        shown_variant: Option<&str>,
    ) -> CareEvent {
        let mut guidance = json!({
            "most_likely_cause": {"label": "hunger", "confidence": 0.8, "reasoning": "r"}
        });
        if let Some(note) = uncertainty_note {
            guidance["uncertainty_note"] = json!(note);
        }
        let mut payload = json!({
            "ai_guidance": guidance,
            "user_feedback": {"helpful": helpful},
        });
        if let Some(minutes) = resolved_in {
            payload["user_feedback"]["resolved_in_minutes"] = json!(minutes);
        }
        if let Some(variant) = shown_variant {
            payload["ab_test"] = json!({"assigned_variant": variant, "shown_variant": variant});
        }
        CareEvent {
            id: new_event_id(),
            kind: "crying".into(),
            occurred_at: iso_now(),
            source: "device".into(),
            category: "crying".into(),
            payload,
            tags: vec![],
            created_at: iso_now(),
        }
    }

    fn aggregator_with(events: &[CareEvent]) -> MetricsAggregator {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        for event in events {
            store.insert(event).unwrap();
        }
        MetricsAggregator::new(store)
    }

    #[test]
    fn test_zero_feedback_reports_nulls() {
        let report = aggregator_with(&[]).build().unwrap();
        assert_eq!(report.totals.feedback_events, 0);
        assert!(report.helpful_rate.is_none());
        assert!(report.median_resolved_minutes.is_none());
        assert!(report.uplift.helpful_rate_uplift.is_none());
        assert!(report.ab_uplift.median_resolved_minutes_delta.is_none());
    }

    #[test]
    fn test_non_boolean_helpful_is_skipped() {
        let mut event = feedback_event(true, None, None, None);
        event.payload["user_feedback"]["helpful"] = json!("yes");
        let report = aggregator_with(&[event]).build().unwrap();
        assert_eq!(report.totals.crying_events, 1);
        assert_eq!(report.totals.feedback_events, 0);
        assert!(report.helpful_rate.is_none());
    }

    #[test]
    fn test_overall_rate_and_median() {
        let events = vec![
            feedback_event(true, Some(10.0), None, None),
            feedback_event(true, Some(20.0), None, None),
            feedback_event(false, Some(30.0), None, None),
            feedback_event(true, None, None, None),
        ];
        let report = aggregator_with(&events).build().unwrap();
        assert_abs_diff_eq!(report.helpful_rate.unwrap(), 0.75, epsilon = 1e-9);
        assert_abs_diff_eq!(
            report.median_resolved_minutes.unwrap(),
            20.0,
            epsilon = 1e-9
        );
        assert_eq!(report.totals.feedback_events, 4);
    }

    #[test]
    fn test_context_slices_and_uplift() {
        let events = vec![
            feedback_event(true, Some(10.0), None, None),
            feedback_event(true, Some(12.0), None, None),
            feedback_event(false, Some(40.0), Some("Limited recent care data available"), None),
            feedback_event(true, Some(30.0), Some("Limited recent care data available"), None),
        ];
        let report = aggregator_with(&events).build().unwrap();

        assert_eq!(report.context_comparison.with_context.samples, 2);
        assert_eq!(report.context_comparison.limited_context.samples, 2);
        assert_abs_diff_eq!(
            report.uplift.helpful_rate_uplift.unwrap(),
            0.5,
            epsilon = 1e-9
        );
        // Limited-context median 35 minus with-context median 11.
        assert_abs_diff_eq!(
            report.uplift.median_resolved_minutes_delta.unwrap(),
            24.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_ab_slices_use_shown_variant() {
        let mut crossover = feedback_event(false, Some(25.0), None, Some("control"));
        crossover.payload["ab_test"]["shown_variant"] = json!("treatment");
        let events = vec![
            feedback_event(true, Some(15.0), None, Some("treatment")),
            feedback_event(false, Some(35.0), None, Some("control")),
            crossover,
        ];
        let report = aggregator_with(&events).build().unwrap();
        assert_eq!(report.ab_comparison.treatment.samples, 2);
        assert_eq!(report.ab_comparison.control.samples, 1);
        assert_abs_diff_eq!(
            report.ab_uplift.helpful_rate_uplift.unwrap(),
            0.5,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            report.ab_uplift.median_resolved_minutes_delta.unwrap(),
            15.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_median_even_count_averages_middle() {
        assert_abs_diff_eq!(median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(median(&[7.0]).unwrap(), 7.0, epsilon = 1e-9);
        assert!(median(&[]).is_none());
    }
}
