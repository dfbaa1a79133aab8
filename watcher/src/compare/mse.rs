use image::GrayImage;

use super::traits::ScoreMetric;
use super::{selected_pairs, RegionMask};

/// Mean squared intensity error over the selected pixels.
pub struct MeanSquaredError;

impl ScoreMetric for MeanSquaredError {
    fn score(&self, a: &GrayImage, b: &GrayImage, mask: Option<&RegionMask>) -> f64 {
        let mut total = 0u64;
        let mut sum = 0u64;
        for (pa, pb) in selected_pairs(a, b, mask) {
            let d = pa.abs_diff(pb) as u64;
            sum += d * d;
            total += 1;
        }
        if total == 0 {
            return 0.0;
        }
        sum as f64 / total as f64
    }

    fn name(&self) -> &str {
        "mse"
    }
}
