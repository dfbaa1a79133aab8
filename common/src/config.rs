use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    pub storage: StorageConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Logical channel name; one baseline is kept per channel.
    #[serde(default)]
    pub channel: Option<String>,
    /// Substring matched against the extractor's format labels.
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_capture_secs")]
    pub capture_secs: f64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// One of `cycle`, `watch` or `record`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_extractor")]
    pub extractor: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

/// Change metric used by the static comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Percentage of pixels whose luma differs at all.
    Percent,
    /// Mean squared luma error.
    Mse,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Percent => "percent",
            MetricKind::Mse => "mse",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompareConfig {
    #[serde(default = "default_metric")]
    pub metric: MetricKind,
    #[serde(default = "default_change_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub mask_path: Option<PathBuf>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            threshold: default_change_threshold(),
            mask_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RoiConfig {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_history")]
    pub history: u32,
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f64,
    #[serde(default = "default_min_contour_area")]
    pub min_contour_area: f64,
    #[serde(default)]
    pub roi: Option<RoiConfig>,
    #[serde(default = "default_true")]
    pub draw_boxes: bool,
    #[serde(default = "default_true")]
    pub draw_contours: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            history: default_history(),
            var_threshold: default_var_threshold(),
            min_contour_area: default_min_contour_area(),
            roi: None,
            draw_boxes: true,
            draw_contours: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_compression")]
    pub compression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_annotation_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_secs: default_annotation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(self.compare.metric, self.compare.threshold)?;

        if self.motion.history == 0 {
            return Err(ConfigError::Invalid("motion.history must be at least 1".into()));
        }
        if !self.motion.var_threshold.is_finite() || self.motion.var_threshold <= 0.0 {
            return Err(ConfigError::ThresholdMisconfigured(format!(
                "motion.var_threshold must be a positive number, got {}",
                self.motion.var_threshold
            )));
        }
        if !self.motion.min_contour_area.is_finite() || self.motion.min_contour_area < 0.0 {
            return Err(ConfigError::ThresholdMisconfigured(format!(
                "motion.min_contour_area must be non-negative, got {}",
                self.motion.min_contour_area
            )));
        }
        if !matches!(self.stream.mode.as_str(), "cycle" | "watch" | "record") {
            return Err(ConfigError::Invalid(format!(
                "stream.mode must be cycle, watch or record, got {}",
                self.stream.mode
            )));
        }
        if !self.stream.capture_secs.is_finite() || self.stream.capture_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "stream.capture_secs must be positive, got {}",
                self.stream.capture_secs
            )));
        }
        Ok(())
    }

    /// Channel name from config, or a slug of the stream URL.
    pub fn channel(&self) -> String {
        self.stream
            .channel
            .clone()
            .unwrap_or_else(|| channel_from_url(&self.stream.url))
    }
}

/// Checks a change threshold against the metric's range.
pub fn validate_threshold(metric: MetricKind, threshold: f64) -> Result<(), ConfigError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(ConfigError::ThresholdMisconfigured(format!(
            "{} threshold must be a non-negative number, got {threshold}",
            metric.as_str()
        )));
    }
    if metric == MetricKind::Percent && threshold > 100.0 {
        return Err(ConfigError::ThresholdMisconfigured(format!(
            "percent threshold must be at most 100, got {threshold}"
        )));
    }
    Ok(())
}

/// Derive a storage-safe channel name from a source URL.
/// e.g. "https://www.youtube.com/watch?v=y3b2rKUPMsA" -> "www-youtube-com-watch-v-y3b2rkupmsa"
pub fn channel_from_url(url: &str) -> String {
    let stripped = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let mut slug = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "default".into()
    } else {
        slug.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("threshold misconfigured: {0}")]
    ThresholdMisconfigured(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_resolution() -> String {
    "1920x1080".into()
}
fn default_capture_secs() -> f64 {
    5.0
}
fn default_interval_secs() -> u64 {
    300
}
fn default_mode() -> String {
    "cycle".into()
}
fn default_extractor() -> String {
    "yt-dlp".into()
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_metric() -> MetricKind {
    MetricKind::Percent
}
fn default_change_threshold() -> f64 {
    10.0
}
fn default_history() -> u32 {
    100
}
fn default_var_threshold() -> f64 {
    30.0
}
fn default_min_contour_area() -> f64 {
    500.0
}
fn default_true() -> bool {
    true
}
fn default_bucket() -> String {
    "streamwatch".into()
}
fn default_prefix() -> String {
    "channels/".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_topic() -> String {
    "streamwatch.triggers".into()
}
fn default_group_id() -> String {
    "streamwatch-notifier".into()
}
fn default_compression() -> String {
    "snappy".into()
}
fn default_annotation_timeout() -> u64 {
    500
}
fn default_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
