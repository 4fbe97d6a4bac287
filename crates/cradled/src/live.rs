//! Live audio stream sessions: chunk buffering, partial inference cadence,
//! and staleness reaping.
//!
//! The registry is the only cross-stream shared state. Lookups, inserts and
//! removals go through an outer `RwLock`; each session carries its own
//! `Mutex` so chunk application for one stream is strictly serialized while
//! other streams proceed in parallel. Provider calls happen with only the
//! per-session lock held, never the registry lock.

use crate::experiment::{compose_notice, ExperimentController, Variant};
use crate::priors::PriorStore;
use crate::provider::AudioInput;
use crate::reasoning::ReasoningEngine;
use crate::store::EventStore;
use cradle_common::{
    iso_now, new_audio_id, new_event_id, new_stream_id, CareEvent, RequestError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Partial updates kept on the event payload; older entries roll off.
const PARTIAL_HISTORY_LIMIT: usize = 20;

/// In-memory state for one stream in progress.
#[derive(Debug)]
pub struct LiveSession {
    pub stream_id: String,
    pub event_id: String,
    pub file_path: PathBuf,
    pub mime_type: String,
    pub chunk_count: u64,
    pub total_bytes: u64,
    pub last_activity: Instant,
    pub assigned_variant: Variant,
    /// Set under the session lock once the stream reaches a terminal state.
    /// A chunk that resolved its session `Arc` just before eviction checks
    /// this after locking, so it cannot mutate a completed stream.
    pub closed: bool,
}

/// Registry of live sessions keyed by stream id.
#[derive(Default)]
pub struct LiveRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: LiveSession) {
        let stream_id = session.stream_id.clone();
        self.sessions
            .write()
            .await
            .insert(stream_id, Arc::new(Mutex::new(session)));
    }

    pub async fn get(&self, stream_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions.read().await.get(stream_id).cloned()
    }

    pub async fn remove(&self, stream_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions.write().await.remove(stream_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Streams idle past the timeout. A session whose lock is currently held
    /// is mid-chunk and by definition not stale.
    pub async fn stale_ids(&self, timeout: Duration) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut stale = Vec::new();
        for (stream_id, session) in sessions.iter() {
            if let Ok(session) = session.try_lock() {
                if session.last_activity.elapsed() > timeout {
                    stale.push(stream_id.clone());
                }
            }
        }
        stale
    }
}

/// Caller-supplied seed for a new crying event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSeed {
    pub occurred_at: Option<String>,
    pub source: Option<String>,
    pub audio_id: Option<String>,
    pub audio_url: Option<String>,
    pub audio_mime_type: Option<String>,
    pub ab_variant: Option<String>,
    pub payload: Option<Value>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedStream {
    pub stream_id: String,
    pub event_id: String,
    pub status: String,
    pub partial_every_chunks: u64,
}

/// Acknowledgement for one chunk upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkAck {
    Buffering {
        stream_id: String,
        chunks_received: u64,
        next_partial_in_chunks: u64,
    },
    PartialReady {
        stream_id: String,
        partial_guidance: Value,
        ai_meta: Value,
        stale: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishedStream {
    pub stream_id: String,
    pub status: String,
    pub event: CareEvent,
}

/// Every Kth chunk triggers a partial reasoning pass.
pub fn is_partial_chunk(chunk_count: u64, every: u64) -> bool {
    every > 0 && chunk_count % every == 0
}

/// File extension for a buffer, from the stream's mime type.
pub fn mime_extension(mime_type: &str) -> &'static str {
    let mime = mime_type.to_lowercase();
    if mime.contains("wav") {
        ".wav"
    } else if mime.contains("webm") {
        ".webm"
    } else if mime.contains("mpeg") || mime.contains("mp3") {
        ".mp3"
    } else if mime.contains("ogg") {
        ".ogg"
    } else if mime.contains("aac") {
        ".aac"
    } else {
        ".bin"
    }
}

pub struct LiveSessionManager {
    registry: LiveRegistry,
    store: Arc<EventStore>,
    engine: Arc<ReasoningEngine>,
    priors: Arc<PriorStore>,
    experiments: Arc<ExperimentController>,
    live_dir: PathBuf,
    chunk_max_bytes: usize,
    partial_every_chunks: u64,
    stream_timeout: Duration,
}

impl LiveSessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<EventStore>,
        engine: Arc<ReasoningEngine>,
        priors: Arc<PriorStore>,
        experiments: Arc<ExperimentController>,
        live_dir: PathBuf,
        chunk_max_bytes: usize,
        partial_every_chunks: u64,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            registry: LiveRegistry::new(),
            store,
            engine,
            priors,
            experiments,
            live_dir,
            chunk_max_bytes,
            partial_every_chunks,
            stream_timeout,
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    /// Open a new stream: persist the event shell, register the session.
    pub async fn start(&self, seed: EventSeed) -> Result<StartedStream, RequestError> {
        self.sweep_stale().await;

        let stream_id = new_stream_id();
        let event_id = new_event_id();
        let mime_type = seed
            .audio_mime_type
            .clone()
            .unwrap_or_else(|| "audio/webm".to_string());
        let file_path = self
            .live_dir
            .join(format!("{}{}", stream_id, mime_extension(&mime_type)));
        let assigned_variant = self.experiments.assign(seed.ab_variant.as_deref(), &event_id);

        let audio_id = seed.audio_id.clone().unwrap_or_else(new_audio_id);
        let mut payload = match seed.payload {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.remove("ai_guidance");
        payload.insert("audio_id".into(), json!(audio_id));
        payload.insert("audio_mime_type".into(), json!(mime_type));
        payload.insert(
            "audio_path".into(),
            json!(file_path.to_string_lossy().replace('\\', "/")),
        );
        payload.insert("notice".into(), json!(compose_notice(false, false)));
        payload.insert(
            "streaming".into(),
            json!({
                "stream_id": stream_id,
                "status": "streaming",
                "started_at": iso_now(),
                "last_chunk_at": Value::Null,
                "chunks_received": 0,
                "partial_every_chunks": self.partial_every_chunks,
                "partial_updates": [],
                "assigned_variant": assigned_variant,
            }),
        );

        let event = CareEvent {
            id: event_id.clone(),
            kind: "crying".into(),
            occurred_at: seed.occurred_at.clone().unwrap_or_else(iso_now),
            source: seed.source.clone().unwrap_or_else(|| "device".to_string()),
            category: "crying".into(),
            payload: Value::Object(payload),
            tags: seed.tags.clone().unwrap_or_default(),
            created_at: iso_now(),
        };
        self.store.insert(&event)?;

        self.registry
            .insert(LiveSession {
                stream_id: stream_id.clone(),
                event_id: event_id.clone(),
                file_path,
                mime_type,
                chunk_count: 0,
                total_bytes: 0,
                last_activity: Instant::now(),
                assigned_variant,
                closed: false,
            })
            .await;

        info!("Live stream {} started for event {}", stream_id, event_id);
        Ok(StartedStream {
            stream_id,
            event_id,
            status: "streaming".into(),
            partial_every_chunks: self.partial_every_chunks,
        })
    }

    /// Append one chunk. Every Kth chunk also runs a partial reasoning pass
    /// over the full accumulated buffer; a failed partial marks the update
    /// stale without aborting the stream.
    pub async fn chunk(
        &self,
        stream_id: &str,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> Result<ChunkAck, RequestError> {
        self.sweep_stale().await;

        if bytes.is_empty() {
            return Err(RequestError::BadRequest("audio chunk is required".into()));
        }
        let session = self
            .registry
            .get(stream_id)
            .await
            .ok_or_else(|| RequestError::NotFound("stream not found".into()))?;
        if bytes.len() > self.chunk_max_bytes {
            return Err(RequestError::SizeLimit("chunk too large".into()));
        }

        let mut session = session.lock().await;
        // The session may have been finished or reaped between the registry
        // lookup and acquiring the lock; a completed stream is terminal.
        if session.closed {
            return Err(RequestError::NotFound("stream not found".into()));
        }
        let Some(mut event) = self.store.get(&session.event_id)? else {
            self.registry.remove(stream_id).await;
            return Err(RequestError::NotFound("event not found for stream".into()));
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session.file_path)
            .map_err(anyhow::Error::from)?;
        file.write_all(bytes).map_err(anyhow::Error::from)?;

        session.chunk_count += 1;
        session.total_bytes += bytes.len() as u64;
        session.last_activity = Instant::now();
        if let Some(mime) = mime_type {
            session.mime_type = mime.to_string();
        }

        let streaming = streaming_map(&mut event);
        streaming.insert("status".into(), json!("streaming"));
        streaming.insert("last_chunk_at".into(), json!(iso_now()));
        streaming.insert("chunks_received".into(), json!(session.chunk_count));
        streaming.insert("total_bytes".into(), json!(session.total_bytes));
        self.store.update_payload(&event.id, &event.payload)?;

        if !is_partial_chunk(session.chunk_count, self.partial_every_chunks) {
            let next_partial_in_chunks = if self.partial_every_chunks > 0 {
                self.partial_every_chunks - (session.chunk_count % self.partial_every_chunks)
            } else {
                0
            };
            return Ok(ChunkAck::Buffering {
                stream_id: stream_id.to_string(),
                chunks_received: session.chunk_count,
                next_partial_in_chunks,
            });
        }

        self.run_partial(stream_id, &mut session, &mut event).await
    }

    async fn run_partial(
        &self,
        stream_id: &str,
        session: &mut LiveSession,
        event: &mut CareEvent,
    ) -> Result<ChunkAck, RequestError> {
        let merged_audio = std::fs::read(&session.file_path).unwrap_or_default();
        let recent: Vec<CareEvent> = self
            .store
            .list_recent(20, None)?
            .into_iter()
            .filter(|item| item.id != event.id)
            .collect();
        let priors = self.priors.load(Some(&event.occurred_at)).await;

        let audio = AudioInput {
            bytes: &merged_audio,
            mime_type: &session.mime_type,
        };
        let (enrichment, failure) = self.engine.run(event, &recent, Some(audio), &priors).await;

        match enrichment {
            Some(enrichment) => {
                let guidance = &enrichment.ai_guidance;
                let partial_guidance = json!({
                    "most_likely_cause": guidance.get("most_likely_cause").cloned().unwrap_or(json!({})),
                    "recommended_next_action": first_action(guidance),
                    "confidence_level": guidance.get("confidence_level").cloned().unwrap_or(Value::Null),
                });
                let mut partial_meta = serde_json::to_value(&enrichment.ai_meta)
                    .map_err(anyhow::Error::from)?;
                partial_meta["request_mode"] = json!("multimodal_partial");

                let analysis = serde_json::to_value(&enrichment.audio_analysis)
                    .map_err(anyhow::Error::from)?;
                let chunk_count = session.chunk_count;
                let streaming = streaming_map(event);
                let updates = streaming
                    .entry("partial_updates")
                    .or_insert_with(|| json!([]));
                if let Some(updates) = updates.as_array_mut() {
                    updates.push(json!({
                        "at": iso_now(),
                        "chunks_received": chunk_count,
                        "partial_guidance": partial_guidance,
                        "ai_meta": partial_meta,
                    }));
                    let excess = updates.len().saturating_sub(PARTIAL_HISTORY_LIMIT);
                    updates.drain(..excess);
                }
                streaming.insert("last_partial_guidance".into(), partial_guidance.clone());

                let payload = event.payload_map_mut();
                payload.insert("audio_analysis".into(), analysis);
                payload.insert("ai_meta".into(), partial_meta.clone());
                self.store.update_payload(&event.id, &event.payload)?;

                Ok(ChunkAck::PartialReady {
                    stream_id: stream_id.to_string(),
                    partial_guidance,
                    ai_meta: partial_meta,
                    stale: false,
                })
            }
            None => {
                let failure = failure.expect("failed reasoning carries a failure");
                let mut partial_meta = failure.ai_meta.clone();
                if let Some(meta) = partial_meta.as_object_mut() {
                    meta.insert("request_mode".into(), json!("multimodal_partial"));
                    meta.insert("error".into(), json!(failure.error));
                }

                let streaming = streaming_map(event);
                streaming.insert(
                    "last_partial_error".into(),
                    serde_json::to_value(&failure).map_err(anyhow::Error::from)?,
                );
                let last_partial = streaming
                    .get("last_partial_guidance")
                    .cloned()
                    .unwrap_or(Value::Null);
                event
                    .payload_map_mut()
                    .insert("ai_meta".into(), partial_meta.clone());
                self.store.update_payload(&event.id, &event.payload)?;

                Ok(ChunkAck::PartialReady {
                    stream_id: stream_id.to_string(),
                    partial_guidance: last_partial,
                    ai_meta: partial_meta,
                    stale: true,
                })
            }
        }
    }

    /// Close a stream: final reasoning pass through the experiment
    /// controller, session evicted, buffer ownership transferred to the
    /// persisted event. Finishing an unknown or already-finished stream is
    /// a not-found error.
    pub async fn finish(&self, stream_id: &str) -> Result<FinishedStream, RequestError> {
        self.sweep_stale().await;

        // Evicting first makes completion terminal: chunks racing this call
        // see not_found once the session is gone. The closed flag covers a
        // chunk that already resolved the session before eviction.
        let session = self
            .registry
            .remove(stream_id)
            .await
            .ok_or_else(|| RequestError::NotFound("stream not found".into()))?;
        let mut session = session.lock().await;
        session.closed = true;

        let Some(mut event) = self.store.get(&session.event_id)? else {
            return Err(RequestError::NotFound("event not found for stream".into()));
        };

        let merged_audio = std::fs::read(&session.file_path).unwrap_or_default();
        let audio = (!merged_audio.is_empty()).then_some(AudioInput {
            bytes: &merged_audio,
            mime_type: &session.mime_type,
        });
        let failure = self
            .experiments
            .apply_reasoning(&mut event, audio, session.assigned_variant)
            .await?;

        let chunk_count = session.chunk_count;
        let total_bytes = session.total_bytes;
        let streaming = streaming_map(&mut event);
        streaming.insert("status".into(), json!("completed"));
        streaming.insert("ended_at".into(), json!(iso_now()));
        streaming.insert("chunks_received".into(), json!(chunk_count));
        streaming.insert("total_bytes".into(), json!(total_bytes));
        if let Some(failure) = failure {
            streaming.insert(
                "final_error".into(),
                serde_json::to_value(&failure).map_err(anyhow::Error::from)?,
            );
        }
        self.store.update_payload(&event.id, &event.payload)?;

        info!("Live stream {} completed ({} chunks)", stream_id, chunk_count);
        Ok(FinishedStream {
            stream_id: stream_id.to_string(),
            status: "completed".into(),
            event,
        })
    }

    /// Lazy staleness sweep, run before every live endpoint. Reaped streams
    /// are marked completed with reason `timeout` on their events.
    pub async fn sweep_stale(&self) {
        let stale = self.registry.stale_ids(self.stream_timeout).await;
        for stream_id in stale {
            let Some(session) = self.registry.remove(&stream_id).await else {
                continue;
            };
            let mut session = session.lock().await;
            session.closed = true;
            match self.store.get(&session.event_id) {
                Ok(Some(mut event)) => {
                    let streaming = streaming_map(&mut event);
                    streaming.insert("status".into(), json!("completed"));
                    streaming.insert("ended_at".into(), json!(iso_now()));
                    streaming.insert("ended_reason".into(), json!("timeout"));
                    event
                        .payload_map_mut()
                        .insert("notice".into(), json!(compose_notice(true, false)));
                    if let Err(e) = self.store.update_payload(&event.id, &event.payload) {
                        warn!("Failed to persist reaped stream {}: {}", stream_id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load event for reaped stream {}: {}", stream_id, e),
            }
            info!("Auto-completed stale stream: {}", stream_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn backdate_session(&self, stream_id: &str, idle: Duration) {
        if let Some(session) = self.registry.get(stream_id).await {
            let mut session = session.lock().await;
            session.last_activity = Instant::now() - idle;
        }
    }
}

/// The first recommended action in display form, if any.
fn first_action(guidance: &Value) -> Value {
    let Some(first) = guidance
        .get("recommended_actions")
        .and_then(Value::as_array)
        .and_then(|actions| actions.first())
    else {
        return Value::Null;
    };
    match first {
        Value::String(action) => json!(action),
        Value::Object(map) => map.get("action").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// The mutable `streaming` object on an event payload, created when absent.
fn streaming_map(event: &mut CareEvent) -> &mut Map<String, Value> {
    let payload = event.payload_map_mut();
    let streaming = payload
        .entry("streaming")
        .or_insert_with(|| Value::Object(Map::new()));
    if !streaming.is_object() {
        *streaming = Value::Object(Map::new());
    }
    streaming.as_object_mut().expect("streaming is an object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::provider::ProviderClient;

    #[test]
    fn test_partial_cadence_every_third_chunk() {
        let triggered: Vec<u64> = (1..=9).filter(|n| is_partial_chunk(*n, 3)).collect();
        assert_eq!(triggered, vec![3, 6, 9]);
    }

    #[test]
    fn test_partial_cadence_zero_never_triggers() {
        assert!(!is_partial_chunk(3, 0));
    }

    #[test]
    fn test_mime_extension() {
        assert_eq!(mime_extension("audio/wav"), ".wav");
        assert_eq!(mime_extension("audio/webm;codecs=opus"), ".webm");
        assert_eq!(mime_extension("audio/mpeg"), ".mp3");
        assert_eq!(mime_extension("audio/ogg"), ".ogg");
        assert_eq!(mime_extension("audio/aac"), ".aac");
        assert_eq!(mime_extension("application/octet-stream"), ".bin");
    }

    #[test]
    fn test_first_action_shapes() {
        assert_eq!(
            first_action(&json!({"recommended_actions": ["feed the baby"]})),
            json!("feed the baby")
        );
        assert_eq!(
            first_action(&json!({"recommended_actions": [{"action": "burp", "why": "gas"}]})),
            json!("burp")
        );
        assert_eq!(first_action(&json!({"recommended_actions": []})), Value::Null);
        assert_eq!(first_action(&json!({})), Value::Null);
    }

    #[tokio::test]
    async fn test_registry_atomic_ops() {
        let registry = LiveRegistry::new();
        registry
            .insert(LiveSession {
                stream_id: "str_a".into(),
                event_id: "evt_a".into(),
                file_path: PathBuf::from("/tmp/str_a.webm"),
                mime_type: "audio/webm".into(),
                chunk_count: 0,
                total_bytes: 0,
                last_activity: Instant::now(),
                assigned_variant: Variant::Treatment,
                closed: false,
            })
            .await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.get("str_a").await.is_some());
        assert!(registry.get("str_b").await.is_none());
        assert!(registry.remove("str_a").await.is_some());
        assert!(registry.remove("str_a").await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_stale_ids_only_past_timeout() {
        let registry = LiveRegistry::new();
        registry
            .insert(LiveSession {
                stream_id: "str_old".into(),
                event_id: "evt_old".into(),
                file_path: PathBuf::from("/tmp/str_old.webm"),
                mime_type: "audio/webm".into(),
                chunk_count: 2,
                total_bytes: 10,
                last_activity: Instant::now() - Duration::from_secs(400),
                assigned_variant: Variant::Treatment,
                closed: false,
            })
            .await;
        registry
            .insert(LiveSession {
                stream_id: "str_fresh".into(),
                event_id: "evt_fresh".into(),
                file_path: PathBuf::from("/tmp/str_fresh.webm"),
                mime_type: "audio/webm".into(),
                chunk_count: 1,
                total_bytes: 5,
                last_activity: Instant::now(),
                assigned_variant: Variant::Treatment,
                closed: false,
            })
            .await;

        let stale = registry.stale_ids(Duration::from_secs(300)).await;
        assert_eq!(stale, vec!["str_old".to_string()]);
    }

    fn manager(dir: &tempfile::TempDir) -> (LiveSessionManager, Arc<EventStore>) {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        let engine = Arc::new(ReasoningEngine::new(ProviderClient::new(
            &ProviderConfig::default(),
        )));
        let priors = Arc::new(PriorStore::new(dir.path().join("priors.json")));
        let experiments = Arc::new(ExperimentController::new(
            engine.clone(),
            priors.clone(),
            store.clone(),
            false,
        ));
        let live_dir = dir.path().join("live");
        std::fs::create_dir_all(&live_dir).unwrap();
        let live = LiveSessionManager::new(
            store.clone(),
            engine,
            priors,
            experiments,
            live_dir,
            512 * 1024,
            3,
            Duration::from_secs(300),
        );
        (live, store)
    }

    #[tokio::test]
    async fn test_idle_stream_is_reaped_on_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let (live, store) = manager(&dir);

        let started = live.start(EventSeed::default()).await.unwrap();
        live.chunk(&started.stream_id, b"waah", None).await.unwrap();
        live.backdate_session(&started.stream_id, Duration::from_secs(400))
            .await;

        // Any live endpoint sweeps; starting another stream is enough.
        live.start(EventSeed::default()).await.unwrap();

        let event = store.get(&started.event_id).unwrap().unwrap();
        assert_eq!(event.payload["streaming"]["status"], "completed");
        assert_eq!(event.payload["streaming"]["ended_reason"], "timeout");
        let notice = event.payload["notice"].as_str().unwrap();
        assert!(notice.contains("Guidance unavailable due to limited data"));

        // The reaped stream is gone for good.
        assert!(matches!(
            live.chunk(&started.stream_id, b"more", None).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_cannot_mutate_completed_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (live, store) = manager(&dir);

        let started = live.start(EventSeed::default()).await.unwrap();
        live.chunk(&started.stream_id, b"first", None).await.unwrap();

        // A chunk can resolve its session handle just before finish evicts
        // it from the registry. Completion marks the session closed under
        // the lock, so the late chunk sees a terminal stream.
        let stale_handle = live.registry.get(&started.stream_id).await.unwrap();
        live.finish(&started.stream_id).await.unwrap();
        assert!(stale_handle.lock().await.closed);

        // Model the interleaving: the lookup already succeeded, so put the
        // handle back and let the chunk proceed to the lock.
        live.registry
            .sessions
            .write()
            .await
            .insert(started.stream_id.clone(), stale_handle);
        assert!(matches!(
            live.chunk(&started.stream_id, b"late", None).await,
            Err(RequestError::NotFound(_))
        ));

        // Nothing about the completed stream moved.
        let event = store.get(&started.event_id).unwrap().unwrap();
        assert_eq!(event.payload["streaming"]["status"], "completed");
        assert_eq!(event.payload["streaming"]["chunks_received"], 1);
    }
}
