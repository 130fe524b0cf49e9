use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dockscan_core::{
    CompiledProfile, CropSuggestion, DecodeResult, Diagnostics, LocatorCandidate, LocatorSource,
    ManifestSource, PipelineConfig, RecognitionMode, RecognitionStatus, Rect, ScanOutcome,
};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decoder::CodeDecoder;
use crate::extract::Extractor;
use crate::locator::{LabelLocator, LocatorOutput};
use crate::raster::{self, RasterError};
use crate::recognizer::{TextEngine, TextRecognizer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image decode failed: {0}")]
    Raster(#[from] RasterError),
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Orchestrates: decode code → locate label → crop → recognize → extract
/// → (line pass) → merge.
///
/// Only the decode and recognize stages can time out; both degrade to "found
/// nothing" instead of failing the scan.
#[derive(Clone)]
pub struct ScanPipeline {
    decoder: Arc<CodeDecoder>,
    locator: Arc<LabelLocator>,
    recognizer: TextRecognizer,
    config: Arc<PipelineConfig>,
}

impl ScanPipeline {
    pub fn new(config: PipelineConfig, engine: Arc<dyn TextEngine>) -> Self {
        Self {
            decoder: Arc::new(CodeDecoder::new(&config.decoder)),
            locator: Arc::new(LabelLocator::new(config.locator.clone())),
            recognizer: TextRecognizer::new(engine, &config.recognizer),
            config: Arc::new(config),
        }
    }

    pub fn with_decoder(mut self, decoder: CodeDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    pub fn with_recognizer(mut self, recognizer: TextRecognizer) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Same decoder, locator and config; a different OCR engine. Batch workers
    /// each get one of these so no engine is shared between them.
    pub fn for_engine(&self, engine: Arc<dyn TextEngine>) -> Self {
        Self {
            recognizer: TextRecognizer::new(engine, &self.config.recognizer),
            ..self.clone()
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read and scan a file. The file name becomes the outcome's source name.
    pub async fn scan_file(
        &self,
        path: &Path,
        profile: &CompiledProfile,
    ) -> Result<ScanOutcome, PipelineError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.scan_bytes(&name, data, profile).await
    }

    /// Decode encoded image bytes and scan them, recording their SHA-256.
    pub async fn scan_bytes(
        &self,
        name: &str,
        data: Vec<u8>,
        profile: &CompiledProfile,
    ) -> Result<ScanOutcome, PipelineError> {
        let (digest, image) = tokio::task::spawn_blocking(move || {
            let digest = sha256_hex(&data);
            raster::load_from_bytes(&data).map(|img| (digest, img))
        })
        .await??;

        let mut outcome = self.scan(name, Arc::new(image), profile, None).await;
        outcome.source_digest = Some(digest);
        Ok(outcome)
    }

    /// Scan one decoded image. `motion` is the live-capture frame delta, if
    /// any. Never fails: every stage degrades to its fallback.
    pub async fn scan(
        &self,
        name: &str,
        image: Arc<DynamicImage>,
        profile: &CompiledProfile,
        motion: Option<f32>,
    ) -> ScanOutcome {
        let started = Instant::now();

        let decoded = self.decode(Arc::clone(&image)).await;
        let (located, suggestions, region) =
            self.locate(Arc::clone(&image), decoded.clone(), profile).await;

        let mode = self.config.recognizer.mode_override.unwrap_or(profile.profile.recognition_mode);
        let general = self.recognizer.recognize(&region, mode).await;
        let extractor = Extractor::new(profile);
        let mut fields = extractor.extract(&general.result);

        let mut line_pass_status = None;
        if decoded.manifest_number.is_none()
            && fields.manifest_number.is_none()
            && self.config.recognizer.line_pass
            && general.status != RecognitionStatus::TimedOut
        {
            let line = self.recognizer.recognize_with(&region, RecognitionMode::Line, true).await;
            fields.manifest_number = extractor.find_manifest(&line.result);
            debug!(found = fields.manifest_number.is_some(), status = ?line.status, "line pass");
            line_pass_status = Some(line.status);
        }

        let manifest_source = if let Some(code) = &decoded.manifest_number {
            if let Some(ocr) = fields.manifest_number.as_deref().filter(|o| *o != code.as_str()) {
                debug!(code = %code, ocr, "code and text disagree, keeping code");
            }
            fields.manifest_number = Some(code.clone());
            ManifestSource::Barcode
        } else if fields.manifest_number.is_some() {
            ManifestSource::Ocr
        } else {
            ManifestSource::None
        };

        let diagnostics = Diagnostics {
            ocr_confidence: general.result.overall_confidence,
            motion: motion.unwrap_or(0.0),
            locator_source: located.primary.source,
            primary_rect: located.primary.rect,
            code_payload: decoded.found.then(|| decoded.payload.clone()),
            code_format: decoded.found.then(|| decoded.format.clone()),
            recognition_status: general.status,
            line_pass_status,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            source = name,
            brand = %profile.profile.id,
            manifest = fields.manifest_number.as_deref().unwrap_or("-"),
            from = %manifest_source,
            locator = %diagnostics.locator_source,
            elapsed_ms = diagnostics.elapsed_ms,
            "scan complete"
        );

        ScanOutcome {
            source_name: name.to_string(),
            source_digest: None,
            scanned_at: Utc::now(),
            brand: profile.profile.id.clone(),
            fields,
            manifest_source,
            raw_text: general.result.raw_text,
            diagnostics,
            crop_suggestions: suggestions,
        }
    }

    async fn decode(&self, image: Arc<DynamicImage>) -> DecodeResult {
        let size = raster::size_of(&image);
        let decoder = Arc::clone(&self.decoder);
        let job = tokio::task::spawn_blocking(move || decoder.decode(&image));
        let limit = Duration::from_secs(self.config.decoder.timeout_secs);
        match tokio::time::timeout(limit, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "code decode task failed");
                DecodeResult::not_found(size)
            }
            Err(_) => {
                warn!(timeout_secs = self.config.decoder.timeout_secs, "code decode timed out");
                DecodeResult::not_found(size)
            }
        }
    }

    /// Locator candidates, their thumbnails and the primary crop.
    async fn locate(
        &self,
        image: Arc<DynamicImage>,
        decoded: DecodeResult,
        profile: &CompiledProfile,
    ) -> (LocatorOutput, Vec<CropSuggestion>, DynamicImage) {
        let locator = Arc::clone(&self.locator);
        let brand = profile.profile.clone();
        let thumb_side = self.config.batch.thumbnail_size;
        let fallback = Arc::clone(&image);

        let job = tokio::task::spawn_blocking(move || {
            let located = locator.locate(&image, &decoded, &brand);
            let suggestions = crop_suggestions(&image, &located, thumb_side);
            let region = raster::crop(&image, located.primary.rect);
            (located, suggestions, region)
        });
        match job.await {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "locator task failed, using full frame");
                let size = raster::size_of(&fallback);
                let full = LocatorCandidate {
                    rect: Rect::full(size).clamp_to(size),
                    source: LocatorSource::FullFrame,
                    score: None,
                };
                let located = LocatorOutput { primary: full, candidates: vec![full] };
                (located, Vec::new(), (*fallback).clone())
            }
        }
    }
}

fn crop_suggestions(
    image: &DynamicImage,
    located: &LocatorOutput,
    max_side: u32,
) -> Vec<CropSuggestion> {
    located
        .candidates
        .iter()
        .map(|c| {
            let thumbnail = raster::thumbnail_base64(image, c.rect, max_side).unwrap_or_else(|e| {
                warn!(rect = %c.rect, error = %e, "thumbnail failed");
                String::new()
            });
            CropSuggestion { rect: c.rect, source: c.source, score: c.score, thumbnail }
        })
        .collect()
}

/// Lowercase hex SHA-256 (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
