//! Label localization: learned geometry, code-anchored expansion and a
//! bright-blob search, ranked in that order with the full frame as a last
//! resort.

use dockscan_core::{
    BrandProfile, Connectivity, DecodeResult, LocatorCandidate, LocatorConfig, LocatorSource,
    Rect, Size,
};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::region_labelling::{self, connected_components};
use tracing::debug;

use crate::raster;

#[derive(Debug, Clone, PartialEq)]
pub struct LocatorOutput {
    /// Top-ranked candidate; drives OCR.
    pub primary: LocatorCandidate,
    /// Every candidate produced, best first (includes `primary`).
    pub candidates: Vec<LocatorCandidate>,
}

/// Bounding box and pixel count of one connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub area: u32,
}

impl Blob {
    fn seed(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y, area: 0 }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

pub struct LabelLocator {
    config: LocatorConfig,
}

impl LabelLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    pub fn locate(
        &self,
        image: &DynamicImage,
        decoded: &DecodeResult,
        profile: &BrandProfile,
    ) -> LocatorOutput {
        let size = raster::size_of(image);
        let mut candidates = Vec::with_capacity(3);

        if let Some(rect) = learned_rect(size, profile) {
            candidates.push(LocatorCandidate { rect, source: LocatorSource::Learned, score: None });
        }
        if let Some(bbox) = decoded.bounding_box {
            candidates.push(LocatorCandidate {
                rect: code_anchored_rect(bbox, size, &self.config),
                source: LocatorSource::CodeAnchored,
                score: None,
            });
        }
        if let Some((rect, score)) = blob_rect(image, &self.config) {
            candidates.push(LocatorCandidate {
                rect,
                source: LocatorSource::ConnectedComponents,
                score: Some(score),
            });
        }
        if candidates.is_empty() {
            candidates.push(LocatorCandidate {
                rect: Rect::full(size).clamp_to(size),
                source: LocatorSource::FullFrame,
                score: None,
            });
        }
        candidates.sort_by_key(|c| c.source);

        let primary = candidates[0];
        debug!(
            source = %primary.source,
            rect = %primary.rect,
            total = candidates.len(),
            "label located"
        );
        LocatorOutput { primary, candidates }
    }
}

/// Mean approved label size centred on the image, once the brand has enough
/// history.
pub fn learned_rect(size: Size, profile: &BrandProfile) -> Option<Rect> {
    let (w, h) = profile.learned_dimension()?;
    let left = (f64::from(size.width) / 2.0 - f64::from(w) / 2.0).round() as i64;
    let top = (f64::from(size.height) / 2.0 - f64::from(h) / 2.0).round() as i64;
    Some(Rect::from_edges(left, top, left + i64::from(w), top + i64::from(h), size))
}

/// Grow a code box into a label-sized region. The manifest number usually
/// sits above the code, so the top side takes the larger share of the
/// vertical padding.
pub fn code_anchored_rect(bbox: Rect, size: Size, config: &LocatorConfig) -> Rect {
    let pad_x = (f64::from(bbox.width) * config.anchor_pad_x).round() as i64;
    let pad_v = (f64::from(bbox.height) * config.anchor_pad_y * 2.0).round() as i64;
    let pad_top = (pad_v as f64 * config.anchor_top_share).round() as i64;
    let pad_bottom = pad_v - pad_top;

    Rect::from_edges(
        i64::from(bbox.x) - pad_x,
        i64::from(bbox.y) - pad_top,
        i64::from(bbox.right()) + pad_x,
        i64::from(bbox.bottom()) + pad_bottom,
        size,
    )
}

/// Filter a blob by area, aspect ratio and ink density; `Some(area × density)`
/// when it survives.
pub fn score_blob(blob: &Blob, density: f64, config: &LocatorConfig) -> Option<f64> {
    if blob.area < config.min_blob_area {
        return None;
    }
    let aspect = f64::from(blob.width()) / f64::from(blob.height());
    if aspect < config.aspect_min || aspect > config.aspect_max {
        return None;
    }
    if density < config.density_min || density > config.density_max {
        return None;
    }
    Some(f64::from(blob.area) * density)
}

/// Fraction of pixels inside the blob's bounding box darker than the ink
/// threshold.
pub fn ink_density(luma: &GrayImage, blob: &Blob, dark_threshold: u8) -> f64 {
    let mut dark = 0u64;
    for y in blob.min_y..=blob.max_y {
        for x in blob.min_x..=blob.max_x {
            if luma.get_pixel(x, y)[0] < dark_threshold {
                dark += 1;
            }
        }
    }
    dark as f64 / (f64::from(blob.width()) * f64::from(blob.height()))
}

/// Connected components of the non-zero pixels of `mask`.
pub fn find_blobs(mask: &GrayImage, connectivity: Connectivity) -> Vec<Blob> {
    let conn = match connectivity {
        Connectivity::Four => region_labelling::Connectivity::Four,
        Connectivity::Eight => region_labelling::Connectivity::Eight,
    };
    let labels = connected_components(mask, conn, Luma([0u8]));
    let mut blobs: Vec<Option<Blob>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let id = label[0] as usize;
        if id == 0 {
            continue;
        }
        if blobs.len() < id {
            blobs.resize(id, None);
        }
        blobs[id - 1].get_or_insert_with(|| Blob::seed(x, y)).include(x, y);
    }
    blobs.into_iter().flatten().collect()
}

/// Best bright, ink-bearing blob in source-image coordinates.
pub fn blob_rect(image: &DynamicImage, config: &LocatorConfig) -> Option<(Rect, f64)> {
    let size = raster::size_of(image);
    if size.width == 0 || size.height == 0 {
        return None;
    }
    let (small, factor) = raster::downscale_to_width(image, config.analysis_width);
    let luma = raster::luminance_map(&small);
    let bright = raster::threshold_by(&luma, |v| v > config.bright_threshold);

    let (blob, score) = find_blobs(&bright, config.connectivity)
        .into_iter()
        .filter(|b| b.area >= config.min_blob_area)
        .filter_map(|b| {
            let density = ink_density(&luma, &b, config.dark_threshold);
            score_blob(&b, density, config).map(|s| (b, s))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let pad_x = (f64::from(blob.width()) * config.blob_padding).round();
    let pad_y = (f64::from(blob.height()) * config.blob_padding).round();
    let rect = Rect::from_edges(
        ((f64::from(blob.min_x) - pad_x) / factor).floor() as i64,
        ((f64::from(blob.min_y) - pad_y) / factor).floor() as i64,
        ((f64::from(blob.max_x + 1) + pad_x) / factor).ceil() as i64,
        ((f64::from(blob.max_y + 1) + pad_y) / factor).ceil() as i64,
        size,
    );
    Some((rect, score))
}
