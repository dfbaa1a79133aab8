use std::io::Cursor;

use image::{GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::MetricKind;

/// A single decoded frame.
///
/// `index` is the ordinal of the frame within the decode session that produced
/// it; frames carry no wall-clock timestamp of their own.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub image: RgbImage,
    pub index: u64,
}

impl FrameSample {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Build a frame from packed RGB24 bytes (row-major, no padding).
    pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>, index: u64) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        let got = data.len();
        if got != expected {
            return Err(FrameError::BadLength { got, expected });
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or(FrameError::BadLength { got, expected })?;
        Ok(Self { image, index })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Single-channel intensity view used by the comparators.
    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    // -- Baseline codec ---------------------------------------------------------

    /// Encode losslessly as PNG; a decoded baseline compares equal to the frame it came from.
    pub fn encode_png(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a stored baseline. The index of a decoded frame is always 0.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(data).map_err(|e| FrameError::Decode(e.to_string()))?;
        Ok(Self::new(img.to_rgb8(), 0))
    }
}

/// Payload published when a cycle detects a change.
///
/// Wire format: a JSON object, e.g.
/// `{"channel":"harbour","source_url":"https://...","score":42.5,"metric":"percent","threshold":10.0,"captured_at_ms":1708300000000}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub channel: String,
    pub source_url: String,
    pub score: f64,
    pub metric: MetricKind,
    pub threshold: f64,
    pub captured_at_ms: i64,
}

impl TriggerEvent {
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        serde_json::to_vec(self).map_err(|e| FrameError::Encode(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        serde_json::from_slice(data).map_err(|e| FrameError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raw frame has {got} bytes, expected {expected}")]
    BadLength { got: usize, expected: usize },
    #[error("failed to encode: {0}")]
    Encode(String),
    #[error("failed to decode: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn png_baseline_is_lossless() {
        let mut img = RgbImage::new(8, 6);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 30) as u8, (y * 40) as u8, 7]);
        }
        let frame = FrameSample::new(img.clone(), 12);
        let bytes = frame.encode_png().unwrap();
        let decoded = FrameSample::decode(&bytes).unwrap();
        assert_eq!(decoded.image, img);
        assert_eq!(decoded.index, 0);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(matches!(
            FrameSample::decode(b"definitely not a png"),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn from_rgb24_checks_length() {
        let ok = FrameSample::from_rgb24(2, 2, vec![0; 12], 3).unwrap();
        assert_eq!(ok.dimensions(), (2, 2));
        assert_eq!(ok.index, 3);

        let err = FrameSample::from_rgb24(2, 2, vec![0; 11], 0).unwrap_err();
        assert!(matches!(err, FrameError::BadLength { got: 11, expected: 12 }));
    }

    #[test]
    fn luma_of_white_is_white() {
        let frame = FrameSample::new(RgbImage::from_pixel(3, 3, Rgb([255, 255, 255])), 0);
        assert!(frame.luma().pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn trigger_event_wire_format() {
        let event = TriggerEvent {
            channel: "harbour".into(),
            source_url: "https://example.com/live".into(),
            score: 42.5,
            metric: MetricKind::Percent,
            threshold: 10.0,
            captured_at_ms: 1708300000000,
        };
        let bytes = event.serialize().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["metric"], "percent");
        assert_eq!(json["channel"], "harbour");
        assert_eq!(TriggerEvent::deserialize(&bytes).unwrap(), event);
    }

    #[test]
    fn trigger_event_rejects_truncated_payload() {
        assert!(TriggerEvent::deserialize(b"{\"channel\":").is_err());
    }
}
