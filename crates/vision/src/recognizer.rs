use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dockscan_core::{RecognitionMode, RecognitionResult, RecognitionStatus, RecognizerConfig};
use image::{DynamicImage, GrayImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::raster;

const LINE_WHITELIST: &str = "0123456789 -";
const LABEL_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-:/#";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image encode error: {0}")]
    ImageEncode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available: build with `tesseract` feature")]
    NotAvailable,
}

/// Engine settings for one call. Built fresh per call so nothing set for one
/// region can leak into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionParams {
    pub mode: RecognitionMode,
    /// Tesseract page segmentation mode.
    pub page_seg_mode: u8,
    pub whitelist: &'static str,
}

impl RecognitionParams {
    pub fn for_mode(mode: RecognitionMode) -> Self {
        let (page_seg_mode, whitelist) = match mode {
            RecognitionMode::Line => (7, LINE_WHITELIST),
            RecognitionMode::Block => (6, LABEL_WHITELIST),
            RecognitionMode::Sparse => (11, LABEL_WHITELIST),
        };
        Self { mode, page_seg_mode, whitelist }
    }
}

/// Abstraction over an OCR backend. Calls are blocking; the adapter moves
/// them off the async runtime.
pub trait TextEngine: Send + Sync {
    fn recognize(
        &self,
        region: &GrayImage,
        params: &RecognitionParams,
    ) -> Result<RecognitionResult, OcrError>;
}

/// What one adapter call produced. The result is empty whenever the status is
/// not `Ok`.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub result: RecognitionResult,
    pub status: RecognitionStatus,
    pub elapsed: Duration,
}

/// Wraps a [`TextEngine`] with pre-processing and a hard timeout.
#[derive(Clone)]
pub struct TextRecognizer {
    engine: Arc<dyn TextEngine>,
    timeout: Duration,
    binarize: bool,
}

impl TextRecognizer {
    pub fn new(engine: Arc<dyn TextEngine>, config: &RecognizerConfig) -> Self {
        Self {
            engine,
            timeout: Duration::from_secs(config.timeout_secs),
            binarize: config.binarize,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn recognize(&self, region: &DynamicImage, mode: RecognitionMode) -> Recognition {
        self.recognize_with(region, mode, self.binarize).await
    }

    /// Like [`recognize`](Self::recognize) with an explicit binarization choice.
    /// Never retries; a timeout or engine error degrades to an empty result.
    pub async fn recognize_with(
        &self,
        region: &DynamicImage,
        mode: RecognitionMode,
        binarize: bool,
    ) -> Recognition {
        let started = Instant::now();
        let prepared = raster::prepare_for_ocr(region, binarize);
        let params = RecognitionParams::for_mode(mode);
        let engine = Arc::clone(&self.engine);

        let job = tokio::task::spawn_blocking(move || engine.recognize(&prepared, &params));
        let (result, status) = match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(Ok(result))) => (result, RecognitionStatus::Ok),
            Ok(Ok(Err(e))) => {
                warn!(%mode, error = %e, "recognition failed");
                (RecognitionResult::empty(), RecognitionStatus::Failed(e.to_string()))
            }
            Ok(Err(join)) => {
                warn!(%mode, error = %join, "recognition task panicked");
                (RecognitionResult::empty(), RecognitionStatus::Failed(join.to_string()))
            }
            Err(_) => {
                warn!(%mode, timeout_secs = self.timeout.as_secs_f32(), "recognition timed out");
                (RecognitionResult::empty(), RecognitionStatus::TimedOut)
            }
        };

        let elapsed = started.elapsed();
        debug!(
            %mode,
            chars = result.raw_text.len(),
            words = result.words.len(),
            ?elapsed,
            "recognized"
        );
        Recognition { result, status, elapsed }
    }
}

// ── Mock engine (always available, used for tests) ────────────────────────────

/// Returns preset results, optionally per mode, and records the params of
/// every call.
pub struct MockEngine {
    default: Result<RecognitionResult, String>,
    per_mode: Vec<(RecognitionMode, RecognitionResult)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecognitionParams>>,
}

impl MockEngine {
    pub fn new(result: RecognitionResult) -> Self {
        Self {
            default: Ok(result),
            per_mode: Vec::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Raw text only, no word boxes.
    pub fn text(raw: impl Into<String>) -> Self {
        Self::new(RecognitionResult {
            raw_text: raw.into(),
            words: Vec::new(),
            overall_confidence: 90.0,
        })
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self { default: Err(message.into()), ..Self::new(RecognitionResult::empty()) }
    }

    pub fn with_mode(mut self, mode: RecognitionMode, result: RecognitionResult) -> Self {
        self.per_mode.push((mode, result));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecognitionParams> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl TextEngine for MockEngine {
    fn recognize(
        &self,
        _region: &GrayImage,
        params: &RecognitionParams,
    ) -> Result<RecognitionResult, OcrError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(params.clone());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some((_, r)) = self.per_mode.iter().find(|(m, _)| *m == params.mode) {
            return Ok(r.clone());
        }
        self.default.clone().map_err(OcrError::Engine)
    }
}

// ── Tesseract engine (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_engine {
    use super::{OcrError, RecognitionParams, TextEngine};
    use dockscan_core::{RecognitionResult, Word, WordBox};
    use image::GrayImage;
    use leptess::{LepTess, Variable};
    use std::io::Cursor;

    pub struct TesseractEngine {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractEngine {
        /// Fails early when the language data cannot be loaded.
        pub fn new(data_path: Option<String>, lang: &str) -> Result<Self, OcrError> {
            LepTess::new(data_path.as_deref(), lang).map_err(|e| OcrError::Engine(e.to_string()))?;
            Ok(Self { data_path, lang: lang.to_string() })
        }
    }

    impl TextEngine for TesseractEngine {
        fn recognize(
            &self,
            region: &GrayImage,
            params: &RecognitionParams,
        ) -> Result<RecognitionResult, OcrError> {
            if region.width() == 0 || region.height() == 0 {
                return Ok(RecognitionResult::empty());
            }
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &params.page_seg_mode.to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditCharWhitelist, params.whitelist)
                .map_err(|e| OcrError::Engine(e.to_string()))?;

            let mut png = Vec::new();
            region
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageEncode(e.to_string()))?;

            let raw_text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let overall_confidence = lt.mean_text_conf().clamp(0, 100) as f32;

            // No boxes just means no text.
            let mut words = Vec::new();
            let level = leptess::capi::TessPageIteratorLevel_RIL_WORD;
            if let Some(boxes) = lt.get_component_boxes(level, true) {
                for bbox in &boxes {
                    let g = bbox.get_geometry();
                    lt.set_rectangle(g.x, g.y, g.w, g.h);
                    let text = lt.get_utf8_text().unwrap_or_default().trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    words.push(Word {
                        text,
                        bbox: WordBox::new(
                            g.x as f32,
                            g.y as f32,
                            (g.x + g.w) as f32,
                            (g.y + g.h) as f32,
                        ),
                        confidence: lt.mean_text_conf().clamp(0, 100) as f32,
                    });
                }
            }

            Ok(RecognitionResult { raw_text, words, overall_confidence })
        }
    }
}
