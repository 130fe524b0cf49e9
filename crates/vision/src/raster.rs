//! Pixel-buffer helpers shared by every stage. Nothing here mutates its input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dockscan_core::{Rect, Size};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use thiserror::Error;

/// Tesseract works best around 300 DPI; larger regions only cost time.
const MAX_OCR_SIDE: u32 = 2800;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

pub fn size_of(img: &DynamicImage) -> Size {
    Size::new(img.width(), img.height())
}

/// Decode JPEG / PNG / WEBP / … bytes.
pub fn load_from_bytes(data: &[u8]) -> Result<DynamicImage, RasterError> {
    Ok(image::load_from_memory(data)?)
}

/// Perceptual luminance (BT.601 weights) of one RGB pixel.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)).round() as u8
}

/// Luminance plane of `img` using [`luminance`].
pub fn luminance_map(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        Luma([luminance(p[0], p[1], p[2])])
    })
}

/// Copy of the region under `rect`, clamped to the image first.
pub fn crop(img: &DynamicImage, rect: Rect) -> DynamicImage {
    let r = rect.clamp_to(size_of(img));
    img.crop_imm(r.x, r.y, r.width, r.height)
}

/// Downscale to `target_width` keeping the aspect ratio. Images already at
/// or below the target are returned as-is. The returned factor maps source
/// coordinates into the scaled image (`scaled = source * factor`).
pub fn downscale_to_width(img: &DynamicImage, target_width: u32) -> (DynamicImage, f64) {
    if img.width() <= target_width || img.width() == 0 {
        return (img.clone(), 1.0);
    }
    let factor = f64::from(target_width) / f64::from(img.width());
    let height = ((f64::from(img.height()) * factor).round() as u32).max(1);
    (img.resize_exact(target_width, height, FilterType::Triangle), factor)
}

/// Binary mask: 255 where `keep(luma)` holds, 0 elsewhere.
pub fn threshold_by(gray: &GrayImage, keep: impl Fn(u8) -> bool) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if keep(gray.get_pixel(x, y)[0]) { 255 } else { 0 }])
    })
}

/// Global Otsu binarization from the region's own histogram.
/// Zero-sized input comes back unchanged.
pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let level = imageproc::contrast::otsu_level(gray);
    threshold_by(gray, |v| v > level)
}

/// Grayscale + contrast stretch (+ optional Otsu), sized for the OCR engine.
pub fn prepare_for_ocr(region: &DynamicImage, binarize: bool) -> GrayImage {
    let region = if region.width() > MAX_OCR_SIDE || region.height() > MAX_OCR_SIDE {
        region.resize(MAX_OCR_SIDE, MAX_OCR_SIDE, FilterType::Lanczos3)
    } else {
        region.clone()
    };
    let stretched = contrast_stretch(&region.to_luma8());
    if binarize {
        otsu_binarize(&stretched)
    } else {
        stretched
    }
}

fn contrast_stretch(gray: &GrayImage) -> GrayImage {
    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px <= min_px {
        return gray.clone();
    }

    let range = u32::from(max_px - min_px);
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([(u32::from(p - min_px) * 255 / range) as u8])
    })
}

/// Clockwise rotation by a multiple of 90°. Other angles are treated as 0.
pub fn rotate(img: &DynamicImage, degrees: u16) -> DynamicImage {
    match degrees % 360 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img.clone(),
    }
}

/// Small base64 JPEG preview of `rect`, longest side at most `max_side`.
pub fn thumbnail_base64(
    img: &DynamicImage,
    rect: Rect,
    max_side: u32,
) -> Result<String, RasterError> {
    let thumb = crop(img, rect).thumbnail(max_side, max_side);
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(thumb.to_rgb8())
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .map_err(|e| RasterError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(buf))
}
