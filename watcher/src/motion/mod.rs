pub mod contours;
pub mod model;
pub mod overlay;

use image::GrayImage;
use serde::Serialize;
use streamwatch_common::config::{MotionConfig, RoiConfig};
use streamwatch_common::frame::FrameSample;
use tracing::debug;

use self::contours::extract_blobs;
use self::model::BackgroundModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A foreground region that survived the minimum-area filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionEvent {
    pub frame_index: u64,
    pub bbox: BoundingBox,
    pub area: f64,
}

/// Rectangle the segmenter is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Intersect with a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<RoiConfig> for Roi {
    fn from(c: RoiConfig) -> Self {
        Self {
            x: c.x,
            y: c.y,
            width: c.width,
            height: c.height,
        }
    }
}

/// What one `apply` call found.
#[derive(Debug)]
pub struct MotionFrame {
    /// Foreground mask of the region of interest (255 = foreground).
    pub foreground: GrayImage,
    pub events: Vec<MotionEvent>,
}

/// Background subtraction plus contour filtering over a frame sequence.
///
/// One segmenter per recording session. Frames must be applied in source order;
/// see [`BackgroundModel`].
pub struct MotionSegmenter {
    model: BackgroundModel,
    min_area: f64,
    roi: Option<Roi>,
    draw_boxes: bool,
    draw_contours: bool,
}

impl MotionSegmenter {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            model: BackgroundModel::new(config.history, config.var_threshold),
            min_area: config.min_contour_area,
            roi: config.roi.map(Roi::from),
            draw_boxes: config.draw_boxes,
            draw_contours: config.draw_contours,
        }
    }

    /// Segment `frame`, optionally drawing overlays onto it in place.
    ///
    /// Overlays are drawn after the events have been computed and never change
    /// them.
    pub fn apply(&mut self, frame: &mut FrameSample) -> Result<MotionFrame, MotionError> {
        let (width, height) = frame.dimensions();
        let roi = self
            .roi
            .map(|r| r.clamp_to(width, height))
            .unwrap_or_else(|| Roi::full(width, height));
        if roi.is_empty() {
            return Err(MotionError::EmptyRoi);
        }

        let region = image::imageops::crop_imm(&frame.image, roi.x, roi.y, roi.width, roi.height)
            .to_image();
        let luma = image::imageops::grayscale(&region);
        let foreground = self.model.apply(&luma)?;

        let blobs = extract_blobs(&foreground, self.min_area, (roi.x, roi.y));
        if self.draw_contours {
            overlay::draw_outlines(&mut frame.image, &blobs);
        }
        if self.draw_boxes {
            overlay::draw_boxes(&mut frame.image, &blobs);
        }

        let events: Vec<MotionEvent> = blobs
            .into_iter()
            .map(|b| MotionEvent {
                frame_index: frame.index,
                bbox: b.bbox,
                area: b.area,
            })
            .collect();

        if !events.is_empty() {
            debug!(frame = frame.index, events = events.len(), "motion detected");
        }

        Ok(MotionFrame { foreground, events })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("frame size changed mid-session: expected {expected:?}, got {got:?}")]
    DimensionMismatch { expected: (u32, u32), got: (u32, u32) },
    #[error("region of interest does not overlap the frame")]
    EmptyRoi,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn config(history: u32, min_area: f64) -> MotionConfig {
        MotionConfig {
            history,
            var_threshold: 30.0,
            min_contour_area: min_area,
            roi: None,
            draw_boxes: false,
            draw_contours: false,
        }
    }

    fn black(index: u64) -> FrameSample {
        FrameSample::new(RgbImage::new(64, 48), index)
    }

    fn with_square(index: u64, x: u32, y: u32, side: u32) -> FrameSample {
        let mut frame = black(index);
        for dy in 0..side {
            for dx in 0..side {
                frame.image.put_pixel(x + dx, y + dy, Rgb([255, 255, 255]));
            }
        }
        frame
    }

    fn warm_up(seg: &mut MotionSegmenter, frames: u64) {
        for i in 0..frames {
            seg.apply(&mut black(i)).unwrap();
        }
    }

    #[test]
    fn static_sequence_has_no_events() {
        let mut seg = MotionSegmenter::new(&config(10, 0.0));
        let mut img = RgbImage::new(32, 32);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 8) as u8, (y * 8) as u8, 60]);
        }
        for i in 0..25 {
            let mut frame = FrameSample::new(img.clone(), i);
            let result = seg.apply(&mut frame).unwrap();
            if i >= 10 {
                assert!(result.events.is_empty(), "frame {i} produced events");
            }
        }
    }

    #[test]
    fn appearing_object_is_reported() {
        let mut seg = MotionSegmenter::new(&config(20, 50.0));
        warm_up(&mut seg, 20);
        let result = seg.apply(&mut with_square(20, 20, 10, 10)).unwrap();
        assert_eq!(result.events.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.frame_index, 20);
        assert_eq!(event.bbox, BoundingBox { x: 20, y: 10, width: 10, height: 10 });
        assert_eq!(event.area, 81.0);
    }

    #[test]
    fn area_threshold_boundary() {
        let mut at = MotionSegmenter::new(&config(20, 81.0));
        warm_up(&mut at, 20);
        assert_eq!(at.apply(&mut with_square(20, 20, 10, 10)).unwrap().events.len(), 1);

        let mut above = MotionSegmenter::new(&config(20, 82.0));
        warm_up(&mut above, 20);
        assert!(above.apply(&mut with_square(20, 20, 10, 10)).unwrap().events.is_empty());
    }

    #[test]
    fn roi_restricts_and_offsets() {
        let mut cfg = config(20, 0.0);
        cfg.roi = Some(RoiConfig { x: 30, y: 0, width: 34, height: 48 });
        let mut seg = MotionSegmenter::new(&cfg);
        warm_up(&mut seg, 20);

        // One square outside the ROI, one inside.
        let mut frame = with_square(20, 2, 2, 6);
        for dy in 0..6 {
            for dx in 0..6 {
                frame.image.put_pixel(40 + dx, 20 + dy, Rgb([255, 255, 255]));
            }
        }
        let result = seg.apply(&mut frame).unwrap();
        assert_eq!(result.foreground.dimensions(), (34, 48));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].bbox.x, 40);
        assert_eq!(result.events[0].bbox.y, 20);
    }

    #[test]
    fn overlays_do_not_change_events() {
        let mut plain = MotionSegmenter::new(&config(20, 0.0));
        let mut drawn_cfg = config(20, 0.0);
        drawn_cfg.draw_boxes = true;
        drawn_cfg.draw_contours = true;
        let mut drawn = MotionSegmenter::new(&drawn_cfg);
        warm_up(&mut plain, 20);
        warm_up(&mut drawn, 20);

        let mut a = with_square(20, 20, 10, 10);
        let mut b = with_square(20, 20, 10, 10);
        let ea = plain.apply(&mut a).unwrap().events;
        let eb = drawn.apply(&mut b).unwrap().events;
        assert_eq!(ea, eb);
        assert_eq!(a.image, with_square(20, 20, 10, 10).image);
        // Overlay pixels are green.
        assert_eq!(*b.image.get_pixel(20, 10), Rgb([0, 255, 0]));
    }

    #[test]
    fn roi_outside_frame_is_rejected() {
        let mut cfg = config(10, 0.0);
        cfg.roi = Some(RoiConfig { x: 500, y: 500, width: 10, height: 10 });
        let mut seg = MotionSegmenter::new(&cfg);
        assert!(matches!(seg.apply(&mut black(0)), Err(MotionError::EmptyRoi)));
    }

    #[test]
    fn frame_size_change_is_an_error() {
        let mut seg = MotionSegmenter::new(&config(10, 0.0));
        seg.apply(&mut black(0)).unwrap();
        let mut smaller = FrameSample::new(RgbImage::new(32, 32), 1);
        assert!(matches!(
            seg.apply(&mut smaller),
            Err(MotionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn roi_clamps_to_frame() {
        let roi = Roi { x: 50, y: 40, width: 100, height: 100 }.clamp_to(64, 48);
        assert_eq!(roi, Roi { x: 50, y: 40, width: 14, height: 8 });
    }
}
