use std::sync::Arc;

use dockscan_core::{manifest_from_digits, DecodeResult, DecoderConfig, Rect, Size};
use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::raster;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Code engine not available: {0}")]
    Unavailable(String),
    #[error("Code engine error: {0}")]
    Engine(String),
}

/// One code found by an engine. Corners are in the frame of the image the
/// engine was given.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeCandidate {
    pub payload: String,
    pub format: String,
    pub corners: Vec<(f64, f64)>,
}

/// Abstraction over a barcode / 2-D code reader.
pub trait CodeEngine: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self, image: &DynamicImage) -> Result<Vec<CodeCandidate>, DecodeError>;
}

// ── QR engine (pure Rust, always available) ──────────────────────────────────

pub struct QrEngine;

impl CodeEngine for QrEngine {
    fn name(&self) -> &str {
        "general"
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<CodeCandidate>, DecodeError> {
        let gray = raster::luminance_map(image);
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        if w == 0 || h == 0 {
            return Ok(vec![]);
        }
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
            gray.get_pixel(x as u32, y as u32)[0]
        });
        let found = prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let corners = grid
                    .bounds
                    .iter()
                    .map(|p| (f64::from(p.x), f64::from(p.y)))
                    .collect();
                let (_, payload) = grid.decode().ok()?;
                Some(CodeCandidate { payload, format: "qr_code".to_string(), corners })
            })
            .collect();
        Ok(found)
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Native fast path first, then the general engine across rotations.
pub struct CodeDecoder {
    native: Option<Arc<dyn CodeEngine>>,
    general: Option<Arc<dyn CodeEngine>>,
    rotations: Vec<u16>,
}

impl CodeDecoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            native: None,
            general: Some(Arc::new(QrEngine)),
            rotations: config.rotations.clone(),
        }
    }

    pub fn with_native(mut self, engine: Arc<dyn CodeEngine>) -> Self {
        self.native = Some(engine);
        self
    }

    pub fn with_general(mut self, engine: Option<Arc<dyn CodeEngine>>) -> Self {
        self.general = engine;
        self
    }

    pub fn decode(&self, image: &DynamicImage) -> DecodeResult {
        let size = raster::size_of(image);

        if let Some(native) = &self.native {
            match native.detect(image) {
                Ok(found) => {
                    if let Some(best) = nearest_to_center(found, size) {
                        return into_result(best, native.name(), size);
                    }
                }
                Err(e) => warn!(engine = native.name(), error = %e, "native decode failed"),
            }
        }

        let Some(general) = &self.general else {
            return DecodeResult::not_found(size);
        };

        for &degrees in &self.rotations {
            let rotated = raster::rotate(image, degrees);
            let found = match general.detect(&rotated) {
                Ok(found) => found,
                Err(e) => {
                    warn!(engine = general.name(), degrees, error = %e, "general decode failed");
                    continue;
                }
            };
            let remapped = found
                .into_iter()
                .map(|mut c| {
                    c.corners = c
                        .corners
                        .iter()
                        .map(|&p| unrotate_point(p, degrees, size))
                        .collect();
                    c
                })
                .collect();
            if let Some(best) = nearest_to_center(remapped, size) {
                debug!(degrees, payload = %best.payload, "code decoded");
                return into_result(best, general.name(), size);
            }
        }

        DecodeResult::not_found(size)
    }
}

/// Map a point from an image rotated clockwise by `degrees` back into the
/// frame of the unrotated `source`.
pub fn unrotate_point((u, v): (f64, f64), degrees: u16, source: Size) -> (f64, f64) {
    let w = f64::from(source.width);
    let h = f64::from(source.height);
    match degrees % 360 {
        90 => (v, h - u),
        180 => (w - u, h - v),
        270 => (w - v, u),
        _ => (u, v),
    }
}

fn candidate_rect(c: &CodeCandidate, size: Size) -> Option<Rect> {
    Rect::bounding(&c.corners).map(|r| {
        let right = r.right().min(size.width);
        let bottom = r.bottom().min(size.height);
        let x = r.x.min(right);
        let y = r.y.min(bottom);
        Rect::new(x, y, right - x, bottom - y)
    })
}

fn nearest_to_center(found: Vec<CodeCandidate>, size: Size) -> Option<CodeCandidate> {
    let (cx, cy) = (f64::from(size.width) / 2.0, f64::from(size.height) / 2.0);
    let distance = |c: &CodeCandidate| {
        candidate_rect(c, size)
            .map(|r| {
                let (x, y) = r.center();
                (x - cx).hypot(y - cy)
            })
            .unwrap_or(f64::INFINITY)
    };
    found
        .into_iter()
        .min_by(|a, b| distance(a).total_cmp(&distance(b)))
}

fn into_result(c: CodeCandidate, engine: &str, size: Size) -> DecodeResult {
    DecodeResult {
        found: true,
        manifest_number: manifest_from_digits(&c.payload),
        bounding_box: candidate_rect(&c, size),
        format: format!("{engine}/{}", c.format),
        payload: c.payload,
        image_size: size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    /// Reports the box around all dark pixels as a "code", but only when the
    /// dark region is wider than tall, like a 1-D reader scanning rows.
    struct BarEngine {
        payload: &'static str,
    }

    impl CodeEngine for BarEngine {
        fn name(&self) -> &str {
            "bar"
        }

        fn detect(&self, image: &DynamicImage) -> Result<Vec<CodeCandidate>, DecodeError> {
            let Some(r) = dark_box(&image.to_luma8()) else {
                return Ok(vec![]);
            };
            if r.width <= r.height {
                return Ok(vec![]);
            }
            Ok(vec![CodeCandidate {
                payload: self.payload.to_string(),
                format: "code_128".into(),
                corners: corners_of(r),
            }])
        }
    }

    struct FixedEngine(Vec<CodeCandidate>);

    impl CodeEngine for FixedEngine {
        fn name(&self) -> &str {
            "native"
        }
        fn detect(&self, _: &DynamicImage) -> Result<Vec<CodeCandidate>, DecodeError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenEngine;

    impl CodeEngine for BrokenEngine {
        fn name(&self) -> &str {
            "native"
        }
        fn detect(&self, _: &DynamicImage) -> Result<Vec<CodeCandidate>, DecodeError> {
            Err(DecodeError::Unavailable("no hardware decoder".into()))
        }
    }

    fn corners_of(r: Rect) -> Vec<(f64, f64)> {
        let (l, t, rt, b) = (r.x as f64, r.y as f64, r.right() as f64, r.bottom() as f64);
        vec![(l, t), (rt, t), (rt, b), (l, b)]
    }

    fn dark_box(gray: &GrayImage) -> Option<Rect> {
        let mut pts = Vec::new();
        for (x, y, p) in gray.enumerate_pixels() {
            if p[0] < 100 {
                pts.push((x as f64, y as f64));
                pts.push((x as f64 + 1.0, y as f64 + 1.0));
            }
        }
        Rect::bounding(&pts)
    }

    fn with_block(w: u32, h: u32, block: Rect) -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(w, h, |x, y| {
            let inside = x >= block.x && x < block.right() && y >= block.y && y < block.bottom();
            Luma([if inside { 0 } else { 255 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn rotation_remap_round_trips() {
        let size = Size::new(200, 120);
        let block = Rect::new(30, 70, 50, 20);
        let img = with_block(size.width, size.height, block);
        for degrees in [0u16, 90, 180, 270] {
            let rotated = raster::rotate(&img, degrees);
            let found = dark_box(&rotated.to_luma8()).unwrap();
            let back: Vec<_> = corners_of(found)
                .into_iter()
                .map(|p| unrotate_point(p, degrees, size))
                .collect();
            assert_eq!(Rect::bounding(&back).unwrap(), block, "rotation {degrees}");
        }
    }

    #[test]
    fn vertical_code_is_found_on_rotated_pass_and_remapped() {
        // A tall block only "decodes" once the image is turned on its side.
        let block = Rect::new(120, 20, 16, 90);
        let img = with_block(240, 160, block);
        let decoder = CodeDecoder::new(&DecoderConfig::default())
            .with_general(Some(Arc::new(BarEngine { payload: "6100123456" })));

        let res = decoder.decode(&img);
        assert!(res.found);
        assert_eq!(res.bounding_box, Some(block));
        assert_eq!(res.manifest_number.as_deref(), Some("6100123456"));
        assert_eq!(res.format, "bar/code_128");
        assert_eq!(res.image_size, Size::new(240, 160));
    }

    #[test]
    fn three_angle_sweep_also_recovers_vertical_code() {
        let block = Rect::new(40, 10, 10, 60);
        let img = with_block(100, 100, block);
        let decoder = CodeDecoder::new(&DecoderConfig::three_angle())
            .with_general(Some(Arc::new(BarEngine { payload: "X" })));
        let res = decoder.decode(&img);
        assert_eq!(res.bounding_box, Some(block));
        assert_eq!(res.manifest_number, None);
    }

    #[test]
    fn nearest_center_wins_among_native_hits() {
        let far = CodeCandidate {
            payload: "6100000001".into(),
            format: "code_128".into(),
            corners: corners_of(Rect::new(0, 0, 20, 10)),
        };
        let near = CodeCandidate {
            payload: "6100000002".into(),
            format: "code_128".into(),
            corners: corners_of(Rect::new(90, 95, 20, 10)),
        };
        let decoder = CodeDecoder::new(&DecoderConfig::default())
            .with_native(Arc::new(FixedEngine(vec![far, near])));
        let res = decoder.decode(&with_block(200, 200, Rect::new(0, 0, 0, 0)));
        assert_eq!(res.payload, "6100000002");
        assert_eq!(res.format, "native/code_128");
    }

    #[test]
    fn broken_native_falls_through_to_general() {
        let block = Rect::new(10, 10, 60, 10);
        let decoder = CodeDecoder::new(&DecoderConfig::default())
            .with_native(Arc::new(BrokenEngine))
            .with_general(Some(Arc::new(BarEngine { payload: "ABC" })));
        let res = decoder.decode(&with_block(100, 50, block));
        assert!(res.found);
        assert_eq!(res.format, "bar/code_128");
    }

    #[test]
    fn invalid_payload_keeps_code_but_no_manifest() {
        let decoder = CodeDecoder::new(&DecoderConfig::default())
            .with_general(Some(Arc::new(BarEngine { payload: "610012" })));
        let res = decoder.decode(&with_block(100, 50, Rect::new(10, 10, 60, 10)));
        assert!(res.found);
        assert_eq!(res.manifest_number, None);
    }

    #[test]
    fn nothing_found_is_not_fatal() {
        let decoder = CodeDecoder::new(&DecoderConfig::default());
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([255])));
        let res = decoder.decode(&blank);
        assert!(!res.found);
        assert!(res.payload.is_empty());
        assert!(res.bounding_box.is_none());
    }

    /// White canvas with a real QR symbol drawn at `at`, `scale` px per module.
    fn qr_canvas(payload: &str, at: (u32, u32), scale: u32) -> (DynamicImage, Rect) {
        let code = qrcode::QrCode::new(payload.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let side = modules * scale;
        let img: GrayImage = ImageBuffer::from_fn(400, 300, |x, y| {
            let inside = (at.0..at.0 + side).contains(&x) && (at.1..at.1 + side).contains(&y);
            if !inside {
                return Luma([255]);
            }
            let (mx, my) = ((x - at.0) / scale, (y - at.1) / scale);
            match colors[(my * modules + mx) as usize] {
                qrcode::Color::Dark => Luma([0]),
                qrcode::Color::Light => Luma([255]),
            }
        });
        (DynamicImage::ImageLuma8(img), Rect::new(at.0, at.1, side, side))
    }

    #[test]
    fn qr_engine_reads_real_symbol_at_every_rotation() {
        let (img, symbol) = qr_canvas("MS 6100123456", (60, 50), 6);
        for degrees in [0u16, 90, 180, 270] {
            let config = DecoderConfig { rotations: vec![degrees], ..DecoderConfig::default() };
            let res = CodeDecoder::new(&config).decode(&img);

            assert!(res.found, "nothing decoded at {degrees}");
            assert_eq!(res.payload, "MS 6100123456");
            assert_eq!(res.format, "general/qr_code");
            assert_eq!(res.manifest_number.as_deref(), Some("6100123456"));

            let bbox = res.bounding_box.unwrap();
            let near = |a: u32, b: u32| a.abs_diff(b) <= 8;
            assert!(
                near(bbox.x, symbol.x)
                    && near(bbox.y, symbol.y)
                    && near(bbox.right(), symbol.right())
                    && near(bbox.bottom(), symbol.bottom()),
                "box {bbox:?} at {degrees} does not cover {symbol:?}"
            );
        }
    }
}
