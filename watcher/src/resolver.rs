use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use streamwatch_common::config::Config;
use tokio::process::Command;
use tracing::{debug, info};

/// Codec handed to the clip writer regardless of the source codec.
/// MPEG-4 Part 2 (`mp4v`) is encodable by every ffmpeg build.
pub const WRITER_FALLBACK_CODEC: &str = "mpeg4";

/// Containers the fallback codec can be muxed into as-is.
const WRITER_CONTAINERS: &[&str] = &["mp4", "mov", "mkv", "avi"];

/// What the caller wants watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub url: String,
    /// Substring the chosen format label must contain, e.g. "1920x1080".
    pub resolution: String,
    pub channel: String,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>, resolution: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resolution: resolution.into(),
            channel: channel.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stream.url.clone(),
            config.stream.resolution.clone(),
            config.channel(),
        )
    }
}

/// One entry of the extractor's `formats` array. Everything is optional
/// because live and on-demand sources fill different fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatEntry {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractorInfo {
    #[serde(default)]
    formats: Vec<FormatEntry>,
}

/// A concrete decode target. Derived per `resolve` call, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEndpoint {
    pub url: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Container extension for clips written from this endpoint.
    pub container: String,
    /// Normalized source codec tag, e.g. "avc1".
    pub source_codec: String,
    /// Codec the clip writer must use.
    pub writer_codec: String,
    pub format_label: String,
}

/// Enumerates the playable formats of a source, in the extractor's order.
#[async_trait]
pub trait FormatProbe: Send + Sync {
    async fn formats(&self, url: &str) -> Result<Vec<FormatEntry>, ResolveError>;
}

/// Runs `yt-dlp -J` and reads its format list.
pub struct YtDlpProbe {
    program: String,
}

impl YtDlpProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl FormatProbe for YtDlpProbe {
    async fn formats(&self, url: &str) -> Result<Vec<FormatEntry>, ResolveError> {
        debug!(program = self.program, url, "probing source formats");
        let output = Command::new(&self.program)
            .args(["-J", "--no-check-certificate", "--no-warnings", url])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolveError::Probe(format!("failed to spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Probe(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_formats(&output.stdout)
    }
}

/// Parse the extractor's JSON dump into its format list.
pub fn parse_formats(json: &[u8]) -> Result<Vec<FormatEntry>, ResolveError> {
    let info: ExtractorInfo =
        serde_json::from_slice(json).map_err(|e| ResolveError::Parse(e.to_string()))?;
    Ok(info.formats)
}

/// `avc1.640028` -> `avc1`
pub fn normalize_codec(vcodec: &str) -> String {
    vcodec
        .split('.')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Pick the first format whose label contains `target` and extract what the
/// sampler and clip writer need from it.
pub fn select_format(formats: &[FormatEntry], target: &str) -> Result<MediaEndpoint, ResolveError> {
    let chosen = formats
        .iter()
        .find(|f| f.format.as_deref().is_some_and(|label| label.contains(target)))
        .ok_or_else(|| ResolveError::NoMatchingFormat {
            target: target.to_string(),
            available: formats.iter().filter_map(|f| f.format.clone()).collect(),
        })?;

    let url = chosen
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or(ResolveError::MissingMetadata("url"))?;
    let fps = chosen
        .fps
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .ok_or(ResolveError::MissingMetadata("fps"))?;
    let width = chosen
        .width
        .filter(|w| *w > 0)
        .ok_or(ResolveError::MissingMetadata("width"))?;
    let height = chosen
        .height
        .filter(|h| *h > 0)
        .ok_or(ResolveError::MissingMetadata("height"))?;

    let source_codec = chosen
        .vcodec
        .as_deref()
        .map(normalize_codec)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "unknown".into());

    let container = match chosen.ext.as_deref() {
        Some(ext) if WRITER_CONTAINERS.contains(&ext) => ext.to_string(),
        _ => "mp4".to_string(),
    };

    Ok(MediaEndpoint {
        url,
        fps,
        width,
        height,
        container,
        source_codec,
        writer_codec: WRITER_FALLBACK_CODEC.to_string(),
        format_label: chosen.format.clone().unwrap_or_default(),
    })
}

/// Turns a source descriptor into a decodable endpoint.
#[derive(Clone)]
pub struct StreamResolver {
    probe: Arc<dyn FormatProbe>,
}

impl StreamResolver {
    pub fn new(probe: Arc<dyn FormatProbe>) -> Self {
        Self { probe }
    }

    pub async fn resolve(&self, descriptor: &SourceDescriptor) -> Result<MediaEndpoint, ResolveError> {
        let formats = self.probe.formats(&descriptor.url).await?;
        let endpoint = select_format(&formats, &descriptor.resolution)?;
        info!(
            channel = descriptor.channel,
            format = endpoint.format_label,
            fps = endpoint.fps,
            width = endpoint.width,
            height = endpoint.height,
            source_codec = endpoint.source_codec,
            "resolved media endpoint"
        );
        Ok(endpoint)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no format matching {target:?} (available: {available:?})")]
    NoMatchingFormat { target: String, available: Vec<String> },
    #[error("chosen format has no usable {0}")]
    MissingMetadata(&'static str),
    #[error("format probe failed: {0}")]
    Probe(String),
    #[error("failed to parse extractor output: {0}")]
    Parse(String),
}
