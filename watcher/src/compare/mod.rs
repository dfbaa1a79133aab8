pub mod mse;
pub mod nonzero;
pub mod traits;

use std::path::Path;

use image::{GrayImage, ImageFormat};
use serde::Serialize;
use streamwatch_common::config::MetricKind;
use streamwatch_common::frame::FrameSample;
use tracing::debug;

use self::mse::MeanSquaredError;
use self::nonzero::NonzeroPercent;
use self::traits::ScoreMetric;

/// Boolean pixel selection restricting which pixels take part in a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl RegionMask {
    /// Every nonzero pixel of `image` is selected.
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bits: image.pixels().map(|p| p.0[0] != 0).collect(),
        }
    }

    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            bits: vec![value; width as usize * height as usize],
        }
    }

    /// Load a PNG mask bitmap. Other image formats are rejected.
    pub fn load(path: &Path) -> Result<Self, CompareError> {
        let bytes = std::fs::read(path)
            .map_err(|e| CompareError::Mask(format!("{}: {e}", path.display())))?;
        let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png).map_err(|e| {
            CompareError::Mask(format!("{}: not a PNG mask: {e}", path.display()))
        })?;
        Ok(Self::from_gray(&img.to_luma8()))
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.bits[(y * self.width + x) as usize] = value;
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn selected(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

/// Pixel pairs of `a` and `b` that the mask selects, in row-major order.
pub(crate) fn selected_pairs<'a>(
    a: &'a GrayImage,
    b: &'a GrayImage,
    mask: Option<&'a RegionMask>,
) -> impl Iterator<Item = (u8, u8)> + 'a {
    a.as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .enumerate()
        .filter(move |(i, _)| mask.map_or(true, |m| m.bits[*i]))
        .map(|(_, (&pa, &pb))| (pa, pb))
}

/// A comparison result. Never negative; zero for identical selections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangeScore {
    pub value: f64,
    pub metric: MetricKind,
}

impl ChangeScore {
    /// Strictly above the threshold counts as a change.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.value > threshold
    }
}

/// Stateless frame comparator with a configurable metric.
pub struct StaticDiffComparator {
    kind: MetricKind,
    metric: Box<dyn ScoreMetric>,
}

impl StaticDiffComparator {
    pub fn new(kind: MetricKind) -> Self {
        let metric: Box<dyn ScoreMetric> = match kind {
            MetricKind::Percent => Box::new(NonzeroPercent),
            MetricKind::Mse => Box::new(MeanSquaredError),
        };
        Self { kind, metric }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn compare(
        &self,
        a: &FrameSample,
        b: &FrameSample,
        mask: Option<&RegionMask>,
    ) -> Result<ChangeScore, CompareError> {
        if a.dimensions() != b.dimensions() {
            return Err(CompareError::DimensionMismatch {
                left: a.dimensions(),
                right: b.dimensions(),
            });
        }
        if let Some(mask) = mask {
            if mask.dimensions() != a.dimensions() {
                return Err(CompareError::DimensionMismatch {
                    left: a.dimensions(),
                    right: mask.dimensions(),
                });
            }
        }

        let value = self.metric.score(&a.luma(), &b.luma(), mask);
        debug!(
            metric = self.metric.name(),
            score = format!("{:.4}", value),
            masked = mask.is_some(),
            "frame comparison"
        );
        Ok(ChangeScore {
            value,
            metric: self.kind,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("dimension mismatch: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
    #[error("failed to load mask: {0}")]
    Mask(String),
}
