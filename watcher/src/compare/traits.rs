use image::GrayImage;

use super::RegionMask;

/// Scoring strategy for the static comparator.
///
/// Implementations receive two single-channel frames of identical size and an
/// optional mask of the same size. Pixels outside the mask must not influence
/// the score in either direction.
pub trait ScoreMetric: Send + Sync {
    fn score(&self, a: &GrayImage, b: &GrayImage, mask: Option<&RegionMask>) -> f64;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
