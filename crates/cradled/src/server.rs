//! HTTP server for cradled

use crate::config::CradleConfig;
use crate::experiment::ExperimentController;
use crate::live::LiveSessionManager;
use crate::metrics::MetricsAggregator;
use crate::priors::PriorStore;
use crate::provider::ProviderClient;
use crate::reasoning::ReasoningEngine;
use crate::routes;
use crate::store::EventStore;
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<EventStore>,
    pub priors: Arc<PriorStore>,
    pub experiments: Arc<ExperimentController>,
    pub live: LiveSessionManager,
    pub metrics: MetricsAggregator,
    pub upload_dir: PathBuf,
    pub max_audio_bytes: usize,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: &CradleConfig, store: EventStore) -> Self {
        let store = Arc::new(store);
        let engine = Arc::new(ReasoningEngine::new(ProviderClient::new(&config.provider)));
        let priors = Arc::new(PriorStore::new(&config.priors_path));
        let experiments = Arc::new(ExperimentController::new(
            engine.clone(),
            priors.clone(),
            store.clone(),
            config.ab_auto_split,
        ));
        let live = LiveSessionManager::new(
            store.clone(),
            engine,
            priors.clone(),
            experiments.clone(),
            config.live_dir(),
            config.live.chunk_max_bytes,
            config.live.partial_every_chunks,
            Duration::from_secs(config.live.stream_timeout_secs),
        );
        let metrics = MetricsAggregator::new(store.clone());

        Self {
            store,
            priors,
            experiments,
            live,
            metrics,
            upload_dir: config.upload_dir.clone(),
            max_audio_bytes: config.max_audio_bytes,
            start_time: Instant::now(),
        }
    }
}

/// Run the HTTP server
pub async fn run(config: &CradleConfig, state: AppState) -> Result<()> {
    let state = Arc::new(state);

    // Inline base64 audio inflates bodies by a third over the raw cap.
    let body_limit = (config.max_audio_bytes * 3) / 2;
    let app = Router::new()
        .merge(routes::event_routes())
        .merge(routes::live_routes())
        .merge(routes::insight_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("  Listening on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
