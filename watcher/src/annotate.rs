use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use streamwatch_common::config::AnnotationConfig;
use tracing::{debug, info};

/// Normalized box, each edge in `[0, 1]` of the frame size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// An object the annotation service tracked through a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub description: String,
    pub confidence: f64,
    pub start_secs: f64,
    pub end_secs: f64,
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
}

#[async_trait]
pub trait Annotator: Send + Sync {
    /// `content_type` names the clip's container, e.g. `video/x-matroska`.
    async fn annotate(
        &self,
        clip: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<TrackedObject>, AnnotateError>;
}

/// Posts clips to an HTTP object-tracking service.
pub struct HttpAnnotator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnnotator {
    pub fn new(config: &AnnotationConfig) -> Result<Self, AnnotateError> {
        if config.endpoint.is_empty() {
            return Err(AnnotateError::Request("annotation endpoint is not set".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnnotateError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn annotate(
        &self,
        clip: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<TrackedObject>, AnnotateError> {
        let size = clip.len();
        debug!(endpoint = self.endpoint, size, content_type, "sending clip for annotation");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(clip)
            .send()
            .await
            .map_err(|e| AnnotateError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnnotateError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AnnotateError::Request(e.to_string()))?;
        let objects = parse_objects(&body)?;
        info!(objects = objects.len(), "clip annotated");
        Ok(objects)
    }
}

pub fn parse_objects(body: &[u8]) -> Result<Vec<TrackedObject>, AnnotateError> {
    serde_json::from_slice(body).map_err(|e| AnnotateError::Parse(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("annotation request failed: {0}")]
    Request(String),
    #[error("annotation service returned HTTP {0}")]
    Status(u16),
    #[error("unreadable annotation response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracked_objects() {
        let body = br#"[
            {"description": "boat", "confidence": 0.91, "start_secs": 0.0, "end_secs": 4.5,
             "box": {"left": 0.1, "top": 0.2, "right": 0.4, "bottom": 0.6}},
            {"description": "person", "confidence": 0.55, "start_secs": 1.2, "end_secs": 2.0,
             "box": {"left": 0.5, "top": 0.5, "right": 0.6, "bottom": 0.9}}
        ]"#;
        let objects = parse_objects(body).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].description, "boat");
        assert_eq!(objects[0].bbox.right, 0.4);
        assert_eq!(objects[1].start_secs, 1.2);
    }

    #[test]
    fn empty_array_is_no_objects() {
        assert!(parse_objects(b"[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_response_is_a_parse_error() {
        assert!(matches!(
            parse_objects(br#"{"error": "busy"}"#),
            Err(AnnotateError::Parse(_))
        ));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let config = AnnotationConfig {
            enabled: true,
            endpoint: String::new(),
            timeout_secs: 5,
        };
        assert!(HttpAnnotator::new(&config).is_err());
    }
}
