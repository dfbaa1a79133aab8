use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use streamwatch_common::config::{channel_from_url, Config};
use streamwatch_watcher::cycle::{ChangeCycle, CycleError};
use streamwatch_watcher::recorder::RecordError;
use streamwatch_watcher::resolver::SourceDescriptor;
use streamwatch_watcher::setup::Services;
use streamwatch_watcher::tracking::{TrackingError, TrackingRun};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    cycle: Arc<ChangeCycle>,
    tracking: Arc<TrackingRun>,
    defaults: SourceDefaults,
}

/// Request fields fall back to these.
#[derive(Debug, Clone)]
struct SourceDefaults {
    url: String,
    channel: String,
    resolution: String,
    capture_secs: f64,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CycleRequest {
    url: Option<String>,
    channel: Option<String>,
    resolution: Option<String>,
    threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordRequest {
    url: Option<String>,
    channel: Option<String>,
    resolution: Option<String>,
    duration_secs: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl SourceDefaults {
    /// A request naming its own URL but no channel gets that URL's slug, not
    /// the configured channel.
    fn describe(
        &self,
        url: Option<String>,
        channel: Option<String>,
        resolution: Option<String>,
    ) -> SourceDescriptor {
        let channel = match (&url, channel) {
            (_, Some(channel)) => channel,
            (Some(url), None) if *url != self.url => channel_from_url(url),
            _ => self.channel.clone(),
        };
        SourceDescriptor::new(
            url.unwrap_or_else(|| self.url.clone()),
            resolution.unwrap_or_else(|| self.resolution.clone()),
            channel,
        )
    }
}

fn cycle_status(e: &CycleError) -> StatusCode {
    match e {
        CycleError::ThresholdMisconfigured(_) => StatusCode::BAD_REQUEST,
        CycleError::Capture(_) => StatusCode::BAD_GATEWAY,
    }
}

fn tracking_status(e: &TrackingError) -> StatusCode {
    match e {
        TrackingError::Record(RecordError::EmptyBudget) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode, message: String) -> axum::response::Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

/// Parse an optional JSON body. An empty body takes every default; anything
/// else must be a valid request, and `numeric` fields must be numbers or null.
fn parse_body<T: DeserializeOwned + Default>(
    body: &[u8],
    numeric: &str,
) -> Result<T, axum::response::Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    })?;
    if let Some(field) = value.get(numeric) {
        if !(field.is_number() || field.is_null()) {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("{numeric} must be a number, got {field}"),
            ));
        }
    }
    serde_json::from_value(value).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// POST /cycle: run one change cycle, body fields optional
async fn run_cycle(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    let req: CycleRequest = match parse_body(&body, "threshold") {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let source = state.defaults.describe(req.url, req.channel, req.resolution);

    match state.cycle.run(&source, req.threshold).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(error = %e, channel = source.channel, "cycle request failed");
            error_response(cycle_status(&e), e.to_string())
        }
    }
}

/// POST /record: record and upload one clip, annotating it when enabled
async fn run_record(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    let req: RecordRequest = match parse_body(&body, "duration_secs") {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    let source = state.defaults.describe(req.url, req.channel, req.resolution);
    let duration = req.duration_secs.unwrap_or(state.defaults.capture_secs);

    match state.tracking.run(&source, duration).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, channel = source.channel, "record request failed");
            error_response(tracking_status(&e), e.to_string())
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cycle", post(run_cycle))
        .route("/record", post(run_record))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let services = match Services::from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialise services");
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        cycle: services.cycle,
        tracking: services.tracking,
        defaults: SourceDefaults {
            url: config.stream.url.clone(),
            channel: config.channel(),
            resolution: config.stream.resolution.clone(),
            capture_secs: config.stream.capture_secs,
        },
    });

    let addr = config.api.bind.clone();
    info!(addr, "streamwatch API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "server exited");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use streamwatch_common::config::{MetricKind, MotionConfig};
    use streamwatch_common::frame::{FrameSample, TriggerEvent};
    use streamwatch_watcher::compare::StaticDiffComparator;
    use streamwatch_watcher::cycle::{CaptureError, FrameCapture};
    use streamwatch_watcher::recorder::ClipRecorder;
    use streamwatch_watcher::resolver::{FormatEntry, FormatProbe, ResolveError, StreamResolver};
    use streamwatch_watcher::sampler::SampleError;
    use streamwatch_watcher::storage::{BaselineStore, StorageError};
    use streamwatch_watcher::trigger::{SinkError, TriggerSink};

    #[derive(Default)]
    struct CountingCapture {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FrameCapture for CountingCapture {
        async fn capture(&self, _source: &SourceDescriptor) -> Result<FrameSample, CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FrameSample::from_rgb24(4, 4, vec![0; 48], 0).unwrap())
        }
    }

    #[derive(Default)]
    struct KeyedStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BaselineStore for KeyedStore {
        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl TriggerSink for NullSink {
        async fn publish(&self, _event: &TriggerEvent) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct NoFormats;

    #[async_trait]
    impl FormatProbe for NoFormats {
        async fn formats(&self, _url: &str) -> Result<Vec<FormatEntry>, ResolveError> {
            Ok(Vec::new())
        }
    }

    fn state(capture: Arc<CountingCapture>, store: Arc<KeyedStore>) -> Arc<AppState> {
        let cycle = ChangeCycle::new(
            capture,
            store.clone(),
            Arc::new(NullSink),
            StaticDiffComparator::new(MetricKind::Percent),
            10.0,
            "channels/",
        );
        let tracking = TrackingRun::new(
            StreamResolver::new(Arc::new(NoFormats)),
            ClipRecorder::new("ffmpeg"),
            store,
            MotionConfig::default(),
            "channels/",
        );
        Arc::new(AppState {
            cycle: Arc::new(cycle),
            tracking: Arc::new(tracking),
            defaults: defaults(),
        })
    }

    fn defaults() -> SourceDefaults {
        SourceDefaults {
            url: "https://example.com/harbour".into(),
            channel: "harbour".into(),
            resolution: "1920x1080".into(),
            capture_secs: 5.0,
        }
    }

    #[test]
    fn empty_request_uses_configured_source() {
        let source = defaults().describe(None, None, None);
        assert_eq!(source.url, "https://example.com/harbour");
        assert_eq!(source.channel, "harbour");
        assert_eq!(source.resolution, "1920x1080");
    }

    #[test]
    fn other_url_gets_its_own_channel() {
        let source = defaults().describe(Some("https://example.com/pier".into()), None, None);
        assert_eq!(source.channel, "example-com-pier");
    }

    #[test]
    fn explicit_channel_wins() {
        let source = defaults().describe(
            Some("https://example.com/pier".into()),
            Some("pier-east".into()),
            Some("1280x720".into()),
        );
        assert_eq!(source.channel, "pier-east");
        assert_eq!(source.resolution, "1280x720");
    }

    #[test]
    fn cycle_errors_map_to_statuses() {
        assert_eq!(
            cycle_status(&CycleError::ThresholdMisconfigured("bad".into())),
            StatusCode::BAD_REQUEST
        );
        let capture = CycleError::Capture(CaptureError::Sample(SampleError::Open("gone".into())));
        assert_eq!(cycle_status(&capture), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn empty_budget_is_a_bad_request() {
        assert_eq!(
            tracking_status(&TrackingError::Record(RecordError::EmptyBudget)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn request_bodies_accept_partial_fields() {
        let req: CycleRequest = serde_json::from_str(r#"{"threshold": 5.5}"#).unwrap();
        assert_eq!(req.threshold, Some(5.5));
        assert!(req.url.is_none());
        let req: RecordRequest = serde_json::from_str(r#"{"duration_secs": 2}"#).unwrap();
        assert_eq!(req.duration_secs, Some(2.0));
    }

    #[tokio::test]
    async fn non_numeric_threshold_is_rejected_before_capture() {
        let capture = Arc::new(CountingCapture::default());
        let store = Arc::new(KeyedStore::default());
        let body = Bytes::from_static(br#"{"threshold":"lots","url":"https://example.com/pier"}"#);

        let response = run_cycle(State(state(capture.clone(), store.clone())), body)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let capture = Arc::new(CountingCapture::default());
        let store = Arc::new(KeyedStore::default());

        let response = run_cycle(
            State(state(capture.clone(), store.clone())),
            Bytes::from_static(b"{\"url\": "),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_body_runs_the_configured_source() {
        let capture = Arc::new(CountingCapture::default());
        let store = Arc::new(KeyedStore::default());

        let response = run_cycle(State(state(capture.clone(), store.clone())), Bytes::new())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(capture.calls.load(Ordering::SeqCst), 1);
        assert!(store
            .objects
            .lock()
            .unwrap()
            .contains_key("channels/harbour/baseline.png"));
    }

    #[tokio::test]
    async fn non_numeric_duration_is_rejected() {
        let capture = Arc::new(CountingCapture::default());
        let store = Arc::new(KeyedStore::default());

        let response = run_record(
            State(state(capture, store.clone())),
            Bytes::from_static(br#"{"duration_secs":"ten"}"#),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.objects.lock().unwrap().is_empty());
    }
}
