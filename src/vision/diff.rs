//! Frame differencing: per-pixel luminance delta against the previously
//! analyzed frame, skipping a perimeter margin, counting changed pixels by
//! screen half. Pure functions over pre-downscaled frames.

use std::time::Instant;

use super::history::MotionSample;

/// A downscaled luminance frame as delivered by a camera source.
/// `pixels` is row-major, one byte per pixel.
#[derive(Debug, Clone)]
pub struct LumaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub captured_at: Instant,
}

impl LumaFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
            captured_at: Instant::now(),
        }
    }

    fn is_valid(&self) -> bool {
        self.pixels.len() == (self.width as usize) * (self.height as usize)
    }
}

/// Diff two frames into a motion sample. Pixels whose delta exceeds
/// `noise_threshold` are counted toward the half of the frame they sit in;
/// a `margin_frac` border is skipped on all sides. Mismatched geometry
/// yields an empty sample.
pub fn diff_frames(
    prev: &LumaFrame,
    curr: &LumaFrame,
    noise_threshold: u8,
    margin_frac: f32,
) -> MotionSample {
    let empty = MotionSample {
        left: 0,
        right: 0,
        total: 0,
        at: curr.captured_at,
    };
    if prev.width != curr.width
        || prev.height != curr.height
        || !prev.is_valid()
        || !curr.is_valid()
    {
        return empty;
    }

    let width = curr.width as usize;
    let height = curr.height as usize;
    let margin = ((width.min(height) as f32) * margin_frac) as usize;
    if width <= margin * 2 || height <= margin * 2 {
        return empty;
    }

    let half = width / 2;
    let (mut left, mut right) = (0u64, 0u64);

    for y in margin..height - margin {
        let row = y * width;
        for x in margin..width - margin {
            let a = prev.pixels[row + x];
            let b = curr.pixels[row + x];
            if a.abs_diff(b) > noise_threshold {
                if x < half {
                    left += 1;
                } else {
                    right += 1;
                }
            }
        }
    }

    MotionSample {
        left,
        right,
        total: left + right,
        at: curr.captured_at,
    }
}
