use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use streamwatch_common::config::validate_threshold;
use streamwatch_common::frame::{FrameSample, TriggerEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compare::{ChangeScore, RegionMask, StaticDiffComparator};
use crate::keys::baseline_key;
use crate::resolver::{ResolveError, SourceDescriptor, StreamResolver};
use crate::sampler::{FrameReader, FrameSampler, SampleError};
use crate::storage::BaselineStore;
use crate::trigger::TriggerSink;

/// Produces the current frame of a source.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    async fn capture(&self, source: &SourceDescriptor) -> Result<FrameSample, CaptureError>;
}

/// Resolve, open a decode session, take its first frame, close.
pub struct StreamCapture {
    resolver: StreamResolver,
    sampler: FrameSampler,
}

impl StreamCapture {
    pub fn new(resolver: StreamResolver, sampler: FrameSampler) -> Self {
        Self { resolver, sampler }
    }
}

#[async_trait]
impl FrameCapture for StreamCapture {
    async fn capture(&self, source: &SourceDescriptor) -> Result<FrameSample, CaptureError> {
        let endpoint = self.resolver.resolve(source).await?;
        let mut session = self.sampler.open(&endpoint).await?;
        let frame = session.read().await;
        session.close().await;
        Ok(frame?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Sample(#[from] SampleError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    FirstRun,
    Unchanged(ChangeScore),
    Changed(ChangeScore),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BaselineStatus {
    Replaced,
    WriteFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerStatus {
    NotNeeded,
    Published,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub channel: String,
    pub decision: Decision,
    pub baseline: BaselineStatus,
    pub trigger: TriggerStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("{0}")]
    ThresholdMisconfigured(String),
}

/// One sample, compare, replace, trigger pass per call.
///
/// Cycles for the same channel are serialized by an in-process lock held for
/// the whole pass and dropped once idle. Separate processes sharing a store
/// are not coordinated.
pub struct ChangeCycle {
    capture: Arc<dyn FrameCapture>,
    store: Arc<dyn BaselineStore>,
    sink: Arc<dyn TriggerSink>,
    comparator: StaticDiffComparator,
    mask: Option<RegionMask>,
    threshold: f64,
    prefix: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChangeCycle {
    pub fn new(
        capture: Arc<dyn FrameCapture>,
        store: Arc<dyn BaselineStore>,
        sink: Arc<dyn TriggerSink>,
        comparator: StaticDiffComparator,
        threshold: f64,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            capture,
            store,
            sink,
            comparator,
            mask: None,
            threshold,
            prefix: prefix.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mask(mut self, mask: RegionMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Run one cycle for `source`. `threshold` overrides the configured one.
    ///
    /// Only capture failures and a bad threshold are errors; storage and
    /// trigger failures are reported in the outcome.
    pub async fn run(
        &self,
        source: &SourceDescriptor,
        threshold: Option<f64>,
    ) -> Result<CycleOutcome, CycleError> {
        let threshold = threshold.unwrap_or(self.threshold);
        validate_threshold(self.comparator.kind(), threshold)
            .map_err(|e| CycleError::ThresholdMisconfigured(e.to_string()))?;

        let lock = self.channel_lock(&source.channel).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.run_locked(source, threshold).await
        };
        self.release_channel_lock(&source.channel, lock).await;
        outcome
    }

    async fn run_locked(
        &self,
        source: &SourceDescriptor,
        threshold: f64,
    ) -> Result<CycleOutcome, CycleError> {
        debug!(channel = source.channel, url = source.url, "sampling");
        let frame = self.capture.capture(source).await?;
        let captured_at_ms = Utc::now().timestamp_millis();

        let key = baseline_key(&self.prefix, &source.channel);
        let decision = self.decide(&key, &frame, threshold).await;

        let baseline = match self.replace_baseline(&key, &frame).await {
            Ok(()) => BaselineStatus::Replaced,
            Err(reason) => {
                warn!(channel = source.channel, key, error = reason, "baseline write failed");
                BaselineStatus::WriteFailed { reason }
            }
        };

        let trigger = match &decision {
            Decision::Changed(score) => {
                let event = TriggerEvent {
                    channel: source.channel.clone(),
                    source_url: source.url.clone(),
                    score: score.value,
                    metric: score.metric,
                    threshold,
                    captured_at_ms,
                };
                match self.sink.publish(&event).await {
                    Ok(()) => TriggerStatus::Published,
                    Err(e) => {
                        warn!(channel = source.channel, error = %e, "trigger publish failed");
                        TriggerStatus::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            _ => TriggerStatus::NotNeeded,
        };

        info!(
            channel = source.channel,
            decision = ?decision,
            baseline = ?baseline,
            trigger = ?trigger,
            "cycle complete"
        );

        Ok(CycleOutcome {
            channel: source.channel.clone(),
            decision,
            baseline,
            trigger,
        })
    }

    async fn channel_lock(&self, channel: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .clone()
    }

    /// Drop the channel's entry once no other cycle holds or waits on it.
    async fn release_channel_lock(&self, channel: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One count for the map, one for `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(channel);
        }
    }

    /// A baseline that is missing, unreadable or incomparable means first run.
    async fn decide(&self, key: &str, frame: &FrameSample, threshold: f64) -> Decision {
        match self.store.exists(key).await {
            Ok(true) => {}
            Ok(false) => {
                info!(key, "no baseline yet");
                return Decision::FirstRun;
            }
            Err(e) => {
                warn!(key, error = %e, "baseline lookup failed, treating as first run");
                return Decision::FirstRun;
            }
        }

        let baseline = match self.store.get(key).await {
            Ok(bytes) => match FrameSample::decode(&bytes) {
                Ok(baseline) => baseline,
                Err(e) => {
                    warn!(key, error = %e, "baseline undecodable, treating as first run");
                    return Decision::FirstRun;
                }
            },
            Err(e) => {
                warn!(key, error = %e, "baseline unreadable, treating as first run");
                return Decision::FirstRun;
            }
        };

        match self.comparator.compare(&baseline, frame, self.mask.as_ref()) {
            Ok(score) if score.exceeds(threshold) => Decision::Changed(score),
            Ok(score) => Decision::Unchanged(score),
            Err(e) => {
                warn!(key, error = %e, "baseline incomparable, treating as first run");
                Decision::FirstRun
            }
        }
    }

    async fn replace_baseline(&self, key: &str, frame: &FrameSample) -> Result<(), String> {
        let png = frame.encode_png().map_err(|e| e.to_string())?;
        self.store
            .put(key, png, "image/png")
            .await
            .map_err(|e| e.to_string())
    }
}
