//! API routes for cradled

use crate::live::{mime_extension, EventSeed};
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{Duration, Utc};
use cradle_common::{
    iso_now, new_audio_id, new_event_id, parse_iso, CareEvent, RequestError,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

/// Request-level failure carried out of a handler.
pub struct ApiError(RequestError);

impl From<RequestError> for ApiError {
    fn from(error: RequestError) -> Self {
        ApiError(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError(RequestError::Internal(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            RequestError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            RequestError::SizeLimit(message) => {
                (StatusCode::PAYLOAD_TOO_LARGE, message.clone())
            }
            RequestError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            RequestError::Internal(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        };
        (status, Json(json!({"ok": false, "error": message}))).into_response()
    }
}

// ============================================================================
// Event Routes
// ============================================================================

pub fn event_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/events/manual", post(post_manual))
        .route("/api/events/crying", post(post_crying))
        .route("/api/events/feedback", post(post_feedback))
        .route("/api/events/recent", get(get_recent))
        .route("/api/events/:id", get(get_event))
}

#[derive(Debug, Deserialize)]
struct ManualEventBody {
    occurred_at: Option<String>,
    source: Option<String>,
    category: Option<String>,
    payload: Option<Value>,
    tags: Option<Vec<String>>,
}

/// Caregiver-logged care event (feeding, diaper, sleep, ...). These feed
/// the recent-care summary used by later reasoning.
async fn post_manual(
    State(state): State<AppStateArc>,
    Json(body): Json<ManualEventBody>,
) -> Result<Json<Value>, ApiError> {
    let event = CareEvent {
        id: new_event_id(),
        kind: "manual".into(),
        occurred_at: body.occurred_at.unwrap_or_else(iso_now),
        source: body.source.unwrap_or_else(|| "parent".to_string()),
        category: body.category.unwrap_or_else(|| "unknown".to_string()),
        payload: match body.payload {
            Some(payload @ Value::Object(_)) => payload,
            _ => json!({}),
        },
        tags: body.tags.unwrap_or_default(),
        created_at: iso_now(),
    };
    state.store.insert(&event)?;
    Ok(Json(json!({"ok": true, "event": event})))
}

#[derive(Debug, Deserialize)]
struct CryingEventBody {
    #[serde(flatten)]
    seed: EventSeed,
    /// Inline single-shot audio, standard base64.
    audio_base64: Option<String>,
}

/// Single-shot crying event: optional inline audio, full reasoning pass
/// before the response.
async fn post_crying(
    State(state): State<AppStateArc>,
    Json(body): Json<CryingEventBody>,
) -> Result<Json<Value>, ApiError> {
    let seed = body.seed;
    let audio_bytes = match &body.audio_base64 {
        Some(encoded) => Some(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| RequestError::BadRequest("invalid base64 audio".into()))?,
        ),
        None => None,
    };
    if let Some(bytes) = &audio_bytes {
        if bytes.len() > state.max_audio_bytes {
            return Err(RequestError::SizeLimit("audio file too large".into()).into());
        }
    }

    let mut payload = match seed.payload {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    payload.remove("ai_guidance");
    let audio_id = seed
        .audio_id
        .or_else(|| {
            payload
                .get("audio_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(new_audio_id);
    payload.insert("audio_id".into(), json!(audio_id));
    if let Some(url) = &seed.audio_url {
        payload.insert("audio_url".into(), json!(url));
    }

    let mime_type = seed
        .audio_mime_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if let Some(bytes) = &audio_bytes {
        let file_path = state
            .upload_dir
            .join(format!("{}{}", audio_id, mime_extension(&mime_type)));
        std::fs::write(&file_path, bytes).map_err(anyhow::Error::from)?;
        payload.insert(
            "audio_path".into(),
            json!(file_path.to_string_lossy().replace('\\', "/")),
        );
        payload.insert("audio_mime_type".into(), json!(mime_type));
    }

    let mut event = CareEvent {
        id: new_event_id(),
        kind: "crying".into(),
        occurred_at: seed.occurred_at.unwrap_or_else(iso_now),
        source: seed.source.unwrap_or_else(|| "device".to_string()),
        category: "crying".into(),
        payload: Value::Object(payload),
        tags: seed.tags.unwrap_or_default(),
        created_at: iso_now(),
    };
    state.store.insert(&event)?;

    let assigned = state
        .experiments
        .assign(seed.ab_variant.as_deref(), &event.id);
    let audio = match (&audio_bytes, &body.audio_base64) {
        (Some(bytes), _) if !bytes.is_empty() => Some(crate::provider::AudioInput {
            bytes,
            mime_type: &mime_type,
        }),
        _ => None,
    };
    state
        .experiments
        .apply_reasoning(&mut event, audio, assigned)
        .await?;

    Ok(Json(json!({"ok": true, "event": event})))
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    event_id: Option<String>,
    feedback: Option<Value>,
}

/// Caregiver feedback on shown guidance. Updates the prior store when the
/// feedback is usable; malformed feedback still lands on the event.
async fn post_feedback(
    State(state): State<AppStateArc>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<Value>, ApiError> {
    let (Some(event_id), Some(feedback @ Value::Object(_))) = (body.event_id, body.feedback)
    else {
        return Err(RequestError::BadRequest("event_id and feedback required".into()).into());
    };
    let Some(mut event) = state.store.get(&event_id)? else {
        return Err(RequestError::NotFound("event not found".into()).into());
    };

    let learning = state.priors.update(&event, &feedback).await;

    let payload = event.payload_map_mut();
    payload.insert("user_feedback".into(), feedback);
    if let Some(learning) = &learning {
        payload.insert(
            "learning_update".into(),
            serde_json::to_value(learning).map_err(anyhow::Error::from)?,
        );
    }
    state.store.update_payload(&event.id, &event.payload)?;

    info!("Feedback recorded for {}", event.id);
    Ok(Json(json!({"ok": true, "event": event, "learning": learning})))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
    since: Option<String>,
}

async fn get_recent(
    State(state): State<AppStateArc>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Value>, ApiError> {
    let since = query.since.as_deref().and_then(parse_iso);
    let events = state.store.list_recent(query.limit.unwrap_or(50), since)?;
    Ok(Json(json!({"ok": true, "events": events})))
}

async fn get_event(
    State(state): State<AppStateArc>,
    Path(event_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.store.get(&event_id)? {
        Some(event) => Ok(Json(json!({"ok": true, "event": event}))),
        None => Err(RequestError::NotFound("event not found".into()).into()),
    }
}

// ============================================================================
// Live Stream Routes
// ============================================================================

pub fn live_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/events/crying/live/start", post(live_start))
        .route("/api/events/crying/live/chunk", post(live_chunk))
        .route("/api/events/crying/live/finish", post(live_finish))
}

async fn live_start(
    State(state): State<AppStateArc>,
    Json(seed): Json<EventSeed>,
) -> Result<Json<Value>, ApiError> {
    let started = state.live.start(seed).await?;
    Ok(Json(json!({"ok": true, "stream": started})))
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    stream_id: Option<String>,
    mime_type: Option<String>,
}

/// Raw audio bytes in the body; stream identity in the query string.
async fn live_chunk(
    State(state): State<AppStateArc>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(stream_id) = query.stream_id else {
        return Err(RequestError::BadRequest("stream_id is required".into()).into());
    };
    let ack = state
        .live
        .chunk(&stream_id, &body, query.mime_type.as_deref())
        .await?;
    Ok(Json(json!({"ok": true, "ack": ack})))
}

#[derive(Debug, Deserialize)]
struct FinishBody {
    stream_id: Option<String>,
}

async fn live_finish(
    State(state): State<AppStateArc>,
    Json(body): Json<FinishBody>,
) -> Result<Json<Value>, ApiError> {
    let Some(stream_id) = body.stream_id else {
        return Err(RequestError::BadRequest("stream_id is required".into()).into());
    };
    let finished = state.live.finish(&stream_id).await?;
    Ok(Json(json!({"ok": true, "stream": finished})))
}

// ============================================================================
// Insight Routes
// ============================================================================

pub fn insight_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/context/summary", get(get_summary))
        .route("/api/metrics", get(get_metrics))
}

/// Care activity over the trailing 24 hours: per-category counts plus the
/// latest events.
async fn get_summary(State(state): State<AppStateArc>) -> Result<Json<Value>, ApiError> {
    let cutoff = Utc::now() - Duration::hours(24);
    let events = state.store.list_since(cutoff)?;

    let mut feeding_count = 0u32;
    let mut diaper_count = 0u32;
    let mut sleep_sessions = 0u32;
    let mut crying_events = 0u32;
    for event in &events {
        match event.category.as_str() {
            "feeding" => feeding_count += 1,
            "diaper" => diaper_count += 1,
            "sleep" => sleep_sessions += 1,
            "crying" => crying_events += 1,
            _ => {}
        }
    }
    let latest_events: Vec<&CareEvent> = events.iter().take(10).collect();

    Ok(Json(json!({
        "ok": true,
        "summary": {
            "last_24h": {
                "feeding_count": feeding_count,
                "diaper_count": diaper_count,
                "sleep_sessions": sleep_sessions,
                "crying_events": crying_events,
            },
            "latest_events": latest_events,
        }
    })))
}

async fn get_metrics(State(state): State<AppStateArc>) -> Result<Json<Value>, ApiError> {
    let report = state.metrics.build()?;
    Ok(Json(json!({"ok": true, "metrics": report})))
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "active_streams": state.live.active_sessions().await,
    }))
}
