use image::{GrayImage, Luma};

use super::MotionError;

/// Gaussians kept per pixel.
const MAX_MODES: usize = 3;
/// Variance given to a freshly created mode.
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
/// Modes covering this much of the weight (heaviest first) describe the background.
const BACKGROUND_RATIO: f32 = 0.9;

const FOREGROUND: u8 = 255;

#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    var: f32,
}

/// Per-pixel adaptive Gaussian mixture over intensity.
///
/// The model learns with rate `1 / min(frames_seen, history)`, so it adapts
/// quickly at the start of a session and settles to a fixed memory of
/// `history` frames. A pixel is background when it falls within
/// `var_threshold` squared standard deviations of a mode that belongs to the
/// heavy part of the mixture.
///
/// Ordering precondition: frames must be applied in source order with no gaps.
/// Replaying or skipping frames changes every subsequent mask. Frame size is
/// fixed by the first frame applied.
pub struct BackgroundModel {
    history: u32,
    var_threshold: f32,
    width: u32,
    height: u32,
    modes: Vec<[Mode; MAX_MODES]>,
    used: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(history: u32, var_threshold: f64) -> Self {
        Self {
            history: history.max(1),
            var_threshold: var_threshold as f32,
            width: 0,
            height: 0,
            modes: Vec::new(),
            used: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Update the model with `frame` and return its foreground mask (255 = foreground).
    ///
    /// The first frame only seeds the model and yields an empty mask.
    pub fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage, MotionError> {
        let (width, height) = frame.dimensions();
        let mut mask = GrayImage::new(width, height);

        if self.frames_seen == 0 {
            self.width = width;
            self.height = height;
            self.modes = frame
                .pixels()
                .map(|p| {
                    let mut modes = [Mode::default(); MAX_MODES];
                    modes[0] = Mode {
                        weight: 1.0,
                        mean: p.0[0] as f32,
                        var: VAR_INIT,
                    };
                    modes
                })
                .collect();
            self.used = vec![1; self.modes.len()];
            self.frames_seen = 1;
            return Ok(mask);
        }

        if (width, height) != (self.width, self.height) {
            return Err(MotionError::DimensionMismatch {
                expected: (self.width, self.height),
                got: (width, height),
            });
        }

        self.frames_seen += 1;
        let alpha = 1.0 / self.frames_seen.min(self.history as u64) as f32;

        for ((out, px), (modes, used)) in mask
            .pixels_mut()
            .zip(frame.pixels())
            .zip(self.modes.iter_mut().zip(self.used.iter_mut()))
        {
            if update_pixel(modes, used, px.0[0] as f32, alpha, self.var_threshold) {
                *out = Luma([FOREGROUND]);
            }
        }

        Ok(mask)
    }
}

/// Fold one observation into a pixel's mixture. Returns true for foreground.
fn update_pixel(
    modes: &mut [Mode; MAX_MODES],
    used: &mut u8,
    value: f32,
    alpha: f32,
    var_threshold: f32,
) -> bool {
    let n = *used as usize;

    let mut matched = None;
    let mut preceding = 0.0f32;
    for (k, mode) in modes[..n].iter().enumerate() {
        let d = value - mode.mean;
        if d * d < var_threshold * mode.var {
            matched = Some(k);
            break;
        }
        preceding += mode.weight;
    }

    for (k, mode) in modes[..n].iter_mut().enumerate() {
        mode.weight *= 1.0 - alpha;
        if matched == Some(k) {
            mode.weight += alpha;
        }
    }

    let background = match matched {
        Some(k) => {
            let mode = &mut modes[k];
            let rho = (alpha / mode.weight).min(1.0);
            let d = value - mode.mean;
            mode.mean += rho * d;
            mode.var = (mode.var + rho * (d * d - mode.var)).clamp(VAR_MIN, VAR_MAX);
            preceding < BACKGROUND_RATIO
        }
        None => {
            // Modes are kept heaviest first, so the last slot is the weakest.
            let slot = if n < MAX_MODES {
                *used += 1;
                n
            } else {
                MAX_MODES - 1
            };
            modes[slot] = Mode {
                weight: alpha,
                mean: value,
                var: VAR_INIT,
            };
            false
        }
    };

    let n = *used as usize;
    let total: f32 = modes[..n].iter().map(|m| m.weight).sum();
    if total > 0.0 {
        for mode in &mut modes[..n] {
            mode.weight /= total;
        }
    }
    // Insertion sort, heaviest first; at most three entries.
    for i in 1..n {
        let mut j = i;
        while j > 0 && modes[j].weight > modes[j - 1].weight {
            modes.swap(j, j - 1);
            j -= 1;
        }
    }

    !background
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    fn count_foreground(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == FOREGROUND).count()
    }

    #[test]
    fn first_frame_only_seeds() {
        let mut model = BackgroundModel::new(10, 16.0);
        let mask = model.apply(&gray(8, 8, 90)).unwrap();
        assert_eq!(count_foreground(&mask), 0);
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn static_scene_stays_background() {
        let mut model = BackgroundModel::new(10, 16.0);
        for _ in 0..25 {
            let mask = model.apply(&gray(8, 8, 90)).unwrap();
            assert_eq!(count_foreground(&mask), 0);
        }
    }

    #[test]
    fn small_noise_stays_background() {
        let mut model = BackgroundModel::new(10, 16.0);
        for i in 0..30u8 {
            let mask = model.apply(&gray(8, 8, 100 + (i % 3))).unwrap();
            assert_eq!(count_foreground(&mask), 0);
        }
    }

    #[test]
    fn sudden_change_is_foreground() {
        let mut model = BackgroundModel::new(20, 16.0);
        for _ in 0..20 {
            model.apply(&gray(8, 8, 0)).unwrap();
        }
        let mut frame = gray(8, 8, 0);
        frame.put_pixel(3, 4, Luma([255]));
        let mask = model.apply(&frame).unwrap();
        assert_eq!(count_foreground(&mask), 1);
        assert_eq!(mask.get_pixel(3, 4).0[0], FOREGROUND);
    }

    #[test]
    fn persistent_change_is_absorbed() {
        let mut model = BackgroundModel::new(10, 16.0);
        for _ in 0..10 {
            model.apply(&gray(4, 4, 0)).unwrap();
        }
        let mut last = usize::MAX;
        for _ in 0..60 {
            last = count_foreground(&model.apply(&gray(4, 4, 200)).unwrap());
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn frame_size_is_fixed() {
        let mut model = BackgroundModel::new(10, 16.0);
        model.apply(&gray(8, 8, 0)).unwrap();
        assert!(matches!(
            model.apply(&gray(8, 9, 0)),
            Err(MotionError::DimensionMismatch { .. })
        ));
    }
}
