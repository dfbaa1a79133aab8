use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use streamwatch_common::config::MotionConfig;
use tracing::{info, warn};

use crate::annotate::{AnnotateError, Annotator, TrackedObject};
use crate::keys::clip_key;
use crate::motion::MotionEvent;
use crate::recorder::{frame_budget, ClipHandle, ClipRecorder, RecordError};
use crate::resolver::{ResolveError, SourceDescriptor, StreamResolver};
use crate::storage::{BaselineStore, StorageError};

/// Summary of one recorded and uploaded clip.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingReport {
    pub channel: String,
    pub clip_key: String,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub size_bytes: usize,
    pub events: Vec<MotionEvent>,
    /// Present only when annotation is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<TrackedObject>>,
}

/// Record a clip, upload it, optionally have it annotated.
pub struct TrackingRun {
    resolver: StreamResolver,
    recorder: ClipRecorder,
    store: Arc<dyn BaselineStore>,
    annotator: Option<Arc<dyn Annotator>>,
    motion: MotionConfig,
    prefix: String,
}

impl TrackingRun {
    pub fn new(
        resolver: StreamResolver,
        recorder: ClipRecorder,
        store: Arc<dyn BaselineStore>,
        motion: MotionConfig,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            recorder,
            store,
            annotator: None,
            motion,
            prefix: prefix.into(),
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub async fn run(
        &self,
        source: &SourceDescriptor,
        duration_secs: f64,
    ) -> Result<TrackingReport, TrackingError> {
        let endpoint = self.resolver.resolve(source).await?;
        let budget = frame_budget(duration_secs, endpoint.fps)?;
        info!(
            channel = source.channel,
            format = endpoint.format_label,
            budget,
            "recording clip"
        );

        let start_ms = Utc::now().timestamp_millis();
        let clip = self
            .recorder
            .record(&endpoint, budget, Some(&self.motion))
            .await?;
        let end_ms = Utc::now().timestamp_millis();

        self.publish(&source.channel, clip, start_ms, end_ms).await
    }

    /// Upload a finished clip and annotate it. Annotation only runs after the
    /// upload succeeded.
    pub async fn publish(
        &self,
        channel: &str,
        clip: ClipHandle,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<TrackingReport, TrackingError> {
        let key = clip_key(&self.prefix, channel, start_ms, end_ms, &clip.container);
        let size_bytes = clip.bytes.len();
        let content_type = format!("video/{}", content_subtype(&clip.container));

        let objects = match &self.annotator {
            Some(annotator) => {
                self.store
                    .put(&key, clip.bytes.clone(), &content_type)
                    .await
                    .map_err(TrackingError::Upload)?;
                info!(key, size_bytes, "clip uploaded");
                let objects = annotator
                    .annotate(clip.bytes, &content_type)
                    .await
                    .map_err(|e| {
                        warn!(key, error = %e, "annotation failed");
                        TrackingError::Annotate {
                            clip_key: key.clone(),
                            source: e,
                        }
                    })?;
                Some(objects)
            }
            None => {
                self.store
                    .put(&key, clip.bytes, &content_type)
                    .await
                    .map_err(TrackingError::Upload)?;
                info!(key, size_bytes, "clip uploaded");
                None
            }
        };

        Ok(TrackingReport {
            channel: channel.to_string(),
            clip_key: key,
            frames: clip.frame_count,
            width: clip.width,
            height: clip.height,
            fps: clip.fps,
            size_bytes,
            events: clip.events,
            objects,
        })
    }
}

fn content_subtype(container: &str) -> &str {
    match container {
        "mkv" => "x-matroska",
        "avi" => "x-msvideo",
        "mov" => "quicktime",
        _ => "mp4",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("failed to upload clip: {0}")]
    Upload(StorageError),
    #[error("clip {clip_key} uploaded but annotation failed: {source}")]
    Annotate {
        clip_key: String,
        source: AnnotateError,
    },
}
