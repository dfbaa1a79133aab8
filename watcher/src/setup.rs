use std::sync::Arc;

use streamwatch_common::config::Config;
use tracing::info;

use crate::annotate::{AnnotateError, HttpAnnotator};
use crate::compare::{CompareError, RegionMask, StaticDiffComparator};
use crate::cycle::{ChangeCycle, StreamCapture};
use crate::recorder::ClipRecorder;
use crate::resolver::{StreamResolver, YtDlpProbe};
use crate::sampler::FrameSampler;
use crate::storage::{S3Store, StorageError};
use crate::trigger::{KafkaTriggerSink, SinkError};
use crate::tracking::TrackingRun;

/// Production wiring of the cycle and tracking pipelines.
pub struct Services {
    pub cycle: Arc<ChangeCycle>,
    pub tracking: Arc<TrackingRun>,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self, SetupError> {
        let store = Arc::new(S3Store::new(&config.storage).await);
        store.ensure_bucket().await?;

        let resolver = StreamResolver::new(Arc::new(YtDlpProbe::new(config.stream.extractor.clone())));
        let capture = Arc::new(StreamCapture::new(
            resolver.clone(),
            FrameSampler::new(config.stream.ffmpeg.clone()),
        ));
        let sink = Arc::new(KafkaTriggerSink::new(&config.kafka)?);

        let mut cycle = ChangeCycle::new(
            capture,
            store.clone(),
            sink,
            StaticDiffComparator::new(config.compare.metric),
            config.compare.threshold,
            config.storage.prefix.clone(),
        );
        if let Some(path) = &config.compare.mask_path {
            let mask = RegionMask::load(path)?;
            info!(
                path = path.display().to_string(),
                selected = mask.selected(),
                "region mask loaded"
            );
            cycle = cycle.with_mask(mask);
        }

        let mut tracking = TrackingRun::new(
            resolver,
            ClipRecorder::new(config.stream.ffmpeg.clone()),
            store,
            config.motion.clone(),
            config.storage.prefix.clone(),
        );
        if config.annotation.enabled {
            tracking = tracking.with_annotator(Arc::new(HttpAnnotator::new(&config.annotation)?));
        }

        Ok(Self {
            cycle: Arc::new(cycle),
            tracking: Arc::new(tracking),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("trigger sink: {0}")]
    Trigger(#[from] SinkError),
    #[error("mask: {0}")]
    Mask(#[from] CompareError),
    #[error("annotator: {0}")]
    Annotator(#[from] AnnotateError),
}
