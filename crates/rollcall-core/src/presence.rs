//! Frame sampler — a cheap per-frame presence signal.
//!
//! The signal is the population variance of grayscale luminance over a
//! fixed square window centred in the frame. A blank wall or a covered lens
//! is flat; a face in front of the camera is not. This is a heuristic, not a
//! face detector: anything that can answer "is something there" for a frame
//! can stand in through [`PresenceProbe`].

use serde::Serialize;

/// Side length of the default sampling window, in pixels.
pub const DEFAULT_SAMPLE_WINDOW: u32 = 150;

/// Scalar presence measurement for one sampled frame.
///
/// For [`VarianceProbe`] the range is 0.0–65025.0 (8-bit luminance).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct PresenceSignal(pub f32);

impl PresenceSignal {
    pub fn value(self) -> f32 {
        self.0
    }
}

/// Strategy for turning a grayscale frame into a presence signal.
///
/// Returning `None` means the frame could not be sampled and the tick must
/// be skipped without touching any counters.
pub trait PresenceProbe {
    fn probe(&self, frame: &[u8], width: u32, height: u32) -> Option<PresenceSignal>;
}

/// Luminance variance over a centred `window × window` square.
#[derive(Debug, Clone, Copy)]
pub struct VarianceProbe {
    pub window: u32,
}

impl Default for VarianceProbe {
    fn default() -> Self {
        Self {
            window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

impl VarianceProbe {
    pub fn new(window: u32) -> Self {
        Self { window }
    }

    /// Centred sampling rectangle `(x0, y0, w, h)`, clamped to the frame.
    fn region(&self, width: u32, height: u32) -> (usize, usize, usize, usize) {
        let w = self.window.min(width) as usize;
        let h = self.window.min(height) as usize;
        let x0 = (width as usize - w) / 2;
        let y0 = (height as usize - h) / 2;
        (x0, y0, w, h)
    }
}

impl PresenceProbe for VarianceProbe {
    fn probe(&self, frame: &[u8], width: u32, height: u32) -> Option<PresenceSignal> {
        let stride = width as usize;
        if width == 0 || height == 0 || self.window == 0 || frame.len() < stride * height as usize {
            return None;
        }

        let (x0, y0, w, h) = self.region(width, height);
        let n = (w * h) as f64;

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in y0..y0 + h {
            let row = &frame[y * stride + x0..y * stride + x0 + w];
            for &p in row {
                let v = p as f64;
                sum += v;
                sum_sq += v * v;
            }
        }

        let mean = sum / n;
        // Population variance; clamp away tiny negative rounding residue.
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Some(PresenceSignal(variance as f32))
    }
}
