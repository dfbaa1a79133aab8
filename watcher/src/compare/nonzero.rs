use image::GrayImage;

use super::traits::ScoreMetric;
use super::{selected_pairs, RegionMask};

/// Percentage of selected pixels whose intensity differs at all.
///
/// `100 * count(|a - b| != 0) / selected`. Any nonzero difference counts the
/// same, so a single bit of sensor noise in every pixel reads as 100%.
pub struct NonzeroPercent;

impl ScoreMetric for NonzeroPercent {
    fn score(&self, a: &GrayImage, b: &GrayImage, mask: Option<&RegionMask>) -> f64 {
        let mut total = 0u64;
        let mut changed = 0u64;
        for (pa, pb) in selected_pairs(a, b, mask) {
            total += 1;
            if pa != pb {
                changed += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        changed as f64 * 100.0 / total as f64
    }

    fn name(&self) -> &str {
        "percent"
    }
}
