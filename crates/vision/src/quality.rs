//! Advisory frame check for live capture. Decides whether a frame is worth
//! handing to the pipeline; single-shot and batch scans never consult it.

use dockscan_core::{Connectivity, QualityConfig};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::Serialize;

use crate::locator::find_blobs;
use crate::raster;

const MOTION_SAMPLE_WIDTH: u32 = 160;
const MOTION_SAMPLE_HEIGHT: u32 = 120;

const COLOR_BLOCKED: &str = "#ef4444";
const COLOR_ADJUST: &str = "#f59e0b";
const COLOR_READY: &str = "#22c55e";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guidance {
    pub ready: bool,
    /// Hex colour for the capture overlay.
    pub color: &'static str,
    pub message: &'static str,
    /// Tallest ink component seen, in analysis pixels. `None` when the motion
    /// check short-circuited.
    pub glyph_height: Option<u32>,
}

impl Guidance {
    fn hold_steady() -> Self {
        Self { ready: false, color: COLOR_BLOCKED, message: "Hold steady", glyph_height: None }
    }
}

pub fn assess(frame: &DynamicImage, motion: f32, config: &QualityConfig) -> Guidance {
    if motion > config.motion_threshold {
        return Guidance::hold_steady();
    }

    let glyph = tallest_ink_component(frame, config);
    if glyph < config.min_glyph_height {
        Guidance {
            ready: false,
            color: COLOR_ADJUST,
            message: "Move closer",
            glyph_height: Some(glyph),
        }
    } else {
        Guidance {
            ready: true,
            color: COLOR_READY,
            message: "Ready to capture",
            glyph_height: Some(glyph),
        }
    }
}

/// A ready frame is captured once the camera has settled.
pub fn should_capture(guidance: &Guidance, motion: f32, config: &QualityConfig) -> bool {
    guidance.ready && motion < config.capture_motion
}

fn tallest_ink_component(frame: &DynamicImage, config: &QualityConfig) -> u32 {
    let (small, _) = raster::downscale_to_width(frame, config.max_analysis_width);
    let luma = raster::luminance_map(&small);
    let ink = raster::threshold_by(&luma, |v| v < config.binarize_threshold);
    find_blobs(&ink, Connectivity::Eight)
        .into_iter()
        .filter(|b| b.area > config.min_component_pixels)
        .map(|b| b.height())
        .max()
        .unwrap_or(0)
}

/// Coarse luminance thumbnail used for frame-to-frame motion.
pub fn motion_sample(frame: &DynamicImage) -> GrayImage {
    let small = frame.resize_exact(MOTION_SAMPLE_WIDTH, MOTION_SAMPLE_HEIGHT, FilterType::Triangle);
    raster::luminance_map(&small)
}

/// Mean absolute luminance difference between two frames on a 0..=1 scale.
/// With no previous frame the camera is assumed to be moving.
pub fn motion_delta(previous: Option<&DynamicImage>, current: &DynamicImage) -> f32 {
    match previous {
        Some(prev) => sample_difference(&motion_sample(prev), &motion_sample(current)),
        None => 1.0,
    }
}

fn sample_difference(a: &GrayImage, b: &GrayImage) -> f32 {
    let n = a.pixels().len().min(b.pixels().len());
    if n == 0 {
        return 1.0;
    }
    let total: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p, q)| u64::from(p[0].abs_diff(q[0])))
        .sum();
    (total as f64 / n as f64 / 255.0) as f32
}

/// Keeps the previous frame's sample so each new frame costs one resize.
#[derive(Debug, Default)]
pub struct MotionTracker {
    previous: Option<GrayImage>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, frame: &DynamicImage) -> f32 {
        let sample = motion_sample(frame);
        let motion = match &self.previous {
            Some(prev) => sample_difference(prev, &sample),
            None => 1.0,
        };
        self.previous = Some(sample);
        motion
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
