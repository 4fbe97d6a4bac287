//! Adaptive prior store: feedback-calibrated cause priors per time bucket.
//!
//! Backed by a small JSON file holding one distribution per bucket. Feedback
//! nudges the label the shown guidance named; malformed feedback is a silent
//! no-op by design.

use anyhow::Result;
use chrono::Timelike;
use cradle_common::{guidance_label, parse_iso, round4, CareEvent, CauseLabel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

const FEEDBACK_DELTA: f64 = 0.05;
const PRIOR_FLOOR: f64 = 0.05;
const PRIOR_CEILING: f64 = 0.9;
const DEFAULT_PRIOR: f64 = 0.25;

/// Time-of-day partition keeping priors context-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Day,
    Night,
}

impl TimeBucket {
    /// Night covers 20:00-06:00 UTC; unparseable times fall back to day.
    pub fn for_occurrence(occurred_at: Option<&str>) -> TimeBucket {
        let Some(when) = occurred_at.and_then(parse_iso) else {
            return TimeBucket::Day;
        };
        let hour = when.hour();
        if hour >= 20 || hour < 6 {
            TimeBucket::Night
        } else {
            TimeBucket::Day
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Day => "day",
            TimeBucket::Night => "night",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record returned for every accepted prior update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorUpdate {
    pub updated_label: CauseLabel,
    pub time_bucket: TimeBucket,
    pub helpful: bool,
    pub delta: f64,
    pub before: BTreeMap<CauseLabel, f64>,
    pub after: BTreeMap<CauseLabel, f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PriorsFile {
    #[serde(default)]
    reasoning_priors_buckets: BTreeMap<String, BTreeMap<String, f64>>,
}

/// File-backed prior store with single-writer update semantics.
pub struct PriorStore {
    path: PathBuf,
    // Serializes read-modify-write cycles; loads read a consistent snapshot.
    write_lock: Mutex<()>,
}

impl PriorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// The distribution for the bucket covering `occurred_at`, defaulting to
    /// uniform and always renormalized before return.
    pub async fn load(&self, occurred_at: Option<&str>) -> BTreeMap<CauseLabel, f64> {
        let _guard = self.write_lock.lock().await;
        let bucket = TimeBucket::for_occurrence(occurred_at);
        let file = self.read_file();
        normalize(merge_known_labels(
            file.reasoning_priors_buckets.get(bucket.as_str()),
        ))
    }

    /// Apply caregiver feedback to the event's bucket. Returns the audit
    /// record, or `None` when the feedback or guidance is unusable.
    pub async fn update(&self, event: &CareEvent, feedback: &Value) -> Option<PriorUpdate> {
        let helpful = feedback.get("helpful")?.as_bool()?;
        let label = guidance_label(event.payload.get("ai_guidance")?)?;

        let _guard = self.write_lock.lock().await;
        let bucket = TimeBucket::for_occurrence(Some(&event.occurred_at));
        let mut file = self.read_file();

        let mut current = normalize(merge_known_labels(
            file.reasoning_priors_buckets.get(bucket.as_str()),
        ));
        let before = current.clone();

        let delta = if helpful {
            FEEDBACK_DELTA
        } else {
            -FEEDBACK_DELTA
        };
        let nudged = (current.get(&label).copied().unwrap_or(DEFAULT_PRIOR) + delta)
            .clamp(PRIOR_FLOOR, PRIOR_CEILING);
        current.insert(label, nudged);
        let after = normalize(current);

        file.reasoning_priors_buckets.insert(
            bucket.as_str().to_string(),
            after
                .iter()
                .map(|(label, value)| (label.as_str().to_string(), *value))
                .collect(),
        );
        if let Err(e) = self.write_file(&file) {
            warn!("Failed to persist priors to {}: {}", self.path.display(), e);
            return None;
        }

        Some(PriorUpdate {
            updated_label: label,
            time_bucket: bucket,
            helpful,
            delta,
            before,
            after,
        })
    }

    fn read_file(&self) -> PriorsFile {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return PriorsFile::default();
        };
        if content.trim().is_empty() {
            return PriorsFile::default();
        }
        serde_json::from_str(&content).unwrap_or_default()
    }

    fn write_file(&self, file: &PriorsFile) -> Result<()> {
        fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        Ok(())
    }
}

fn uniform() -> BTreeMap<CauseLabel, f64> {
    CauseLabel::ALL
        .iter()
        .map(|label| (*label, DEFAULT_PRIOR))
        .collect()
}

/// Merge stored values over the uniform default, keeping recognized labels only.
fn merge_known_labels(stored: Option<&BTreeMap<String, f64>>) -> BTreeMap<CauseLabel, f64> {
    let mut merged = uniform();
    if let Some(stored) = stored {
        for (key, value) in stored {
            if let Some(label) = CauseLabel::parse(key) {
                if value.is_finite() {
                    merged.insert(label, value.max(0.0));
                }
            }
        }
    }
    merged
}

fn normalize(priors: BTreeMap<CauseLabel, f64>) -> BTreeMap<CauseLabel, f64> {
    let total: f64 = priors.values().sum();
    if total <= 0.0 {
        return uniform();
    }
    priors
        .into_iter()
        .map(|(label, value)| (label, round4(value / total)))
        .collect()
}
