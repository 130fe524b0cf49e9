use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{Rect, Size};

/// What the code decoder found in one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodeResult {
    pub found: bool,
    /// Raw decoded payload (empty when nothing was decoded).
    pub payload: String,
    /// Engine-qualified symbology, e.g. `native/code_128` or `general/qr_code`.
    pub format: String,
    /// Validated manifest number carried by the payload, if any.
    pub manifest_number: Option<String>,
    /// Code location in the unrotated image frame.
    pub bounding_box: Option<Rect>,
    pub image_size: Size,
}

impl DecodeResult {
    pub fn not_found(image_size: Size) -> Self {
        Self {
            found: false,
            payload: String::new(),
            format: "none".to_string(),
            manifest_number: None,
            bounding_box: None,
            image_size,
        }
    }
}

/// Strategy that produced a locator candidate, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorSource {
    Learned,
    CodeAnchored,
    ConnectedComponents,
    FullFrame,
}

impl fmt::Display for LocatorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorSource::Learned => write!(f, "learned"),
            LocatorSource::CodeAnchored => write!(f, "code_anchored"),
            LocatorSource::ConnectedComponents => write!(f, "connected_components"),
            LocatorSource::FullFrame => write!(f, "full_frame"),
        }
    }
}

impl std::str::FromStr for LocatorSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learned" => Ok(LocatorSource::Learned),
            "code_anchored" => Ok(LocatorSource::CodeAnchored),
            "connected_components" => Ok(LocatorSource::ConnectedComponents),
            "full_frame" => Ok(LocatorSource::FullFrame),
            other => Err(format!("Unknown locator source: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocatorCandidate {
    pub rect: Rect,
    pub source: LocatorSource,
    pub score: Option<f64>,
}

/// Word-level box as reported by the OCR engine (pixel edges, region frame).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl WordBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        self.y0 + self.height() / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub bbox: WordBox,
    /// Engine confidence, 0–100.
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub raw_text: String,
    pub words: Vec<Word>,
    /// Mean engine confidence, 0–100.
    pub overall_confidence: f32,
}

impl RecognitionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty() && self.words.is_empty()
    }
}

/// Recovered label fields. Each value is either validated or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    pub manifest_number: Option<String>,
    pub model: Option<String>,
    pub customer: Option<String>,
}

impl FieldSet {
    pub fn is_empty(&self) -> bool {
        self.manifest_number.is_none() && self.model.is_none() && self.customer.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    Barcode,
    Ocr,
    None,
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestSource::Barcode => write!(f, "barcode"),
            ManifestSource::Ocr => write!(f, "ocr"),
            ManifestSource::None => write!(f, "none"),
        }
    }
}

/// How the recognition call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum RecognitionStatus {
    Ok,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub ocr_confidence: f32,
    pub motion: f32,
    pub locator_source: LocatorSource,
    pub primary_rect: Rect,
    pub code_payload: Option<String>,
    pub code_format: Option<String>,
    pub recognition_status: RecognitionStatus,
    /// Outcome of the digits-only second pass; `None` when it did not run.
    pub line_pass_status: Option<RecognitionStatus>,
    pub elapsed_ms: u64,
}

/// A locator rectangle offered to the reviewer, with a small preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropSuggestion {
    pub rect: Rect,
    pub source: LocatorSource,
    pub score: Option<f64>,
    /// Base64-encoded JPEG thumbnail of the crop.
    pub thumbnail: String,
}

/// Terminal artifact of one pipeline run, handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub source_name: String,
    /// SHA-256 hex digest of the encoded source, when scanned from bytes.
    pub source_digest: Option<String>,
    pub scanned_at: DateTime<Utc>,
    pub brand: String,
    pub fields: FieldSet,
    pub manifest_source: ManifestSource,
    pub raw_text: String,
    pub diagnostics: Diagnostics,
    pub crop_suggestions: Vec<CropSuggestion>,
}

impl ScanOutcome {
    /// Last `n` digits of the manifest number, for operator confirmation.
    pub fn confirm_suffix(&self, n: usize) -> Option<&str> {
        let ms = self.fields.manifest_number.as_deref()?;
        Some(&ms[ms.len().saturating_sub(n)..])
    }

    /// Whether anything worth keeping was recovered.
    pub fn has_key_field(&self) -> bool {
        self.fields.manifest_number.is_some() || self.fields.model.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ms: Option<&str>) -> ScanOutcome {
        ScanOutcome {
            source_name: "a.jpg".into(),
            source_digest: None,
            scanned_at: Utc::now(),
            brand: "LG".into(),
            fields: FieldSet {
                manifest_number: ms.map(str::to_string),
                ..FieldSet::default()
            },
            manifest_source: ManifestSource::Ocr,
            raw_text: String::new(),
            diagnostics: Diagnostics {
                ocr_confidence: 0.0,
                motion: 0.0,
                locator_source: LocatorSource::FullFrame,
                primary_rect: Rect::new(0, 0, 32, 32),
                code_payload: None,
                code_format: None,
                recognition_status: RecognitionStatus::Ok,
                line_pass_status: None,
                elapsed_ms: 0,
            },
            crop_suggestions: vec![],
        }
    }

    #[test]
    fn locator_source_roundtrip() {
        use std::str::FromStr;
        for s in [
            LocatorSource::Learned,
            LocatorSource::CodeAnchored,
            LocatorSource::ConnectedComponents,
            LocatorSource::FullFrame,
        ] {
            assert_eq!(LocatorSource::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn locator_priority_order() {
        assert!(LocatorSource::Learned < LocatorSource::CodeAnchored);
        assert!(LocatorSource::CodeAnchored < LocatorSource::ConnectedComponents);
        assert!(LocatorSource::ConnectedComponents < LocatorSource::FullFrame);
    }

    #[test]
    fn confirm_suffix_takes_last_digits() {
        assert_eq!(outcome(Some("6100123456")).confirm_suffix(4), Some("3456"));
        assert_eq!(outcome(None).confirm_suffix(4), None);
    }

    #[test]
    fn key_field_needs_manifest_or_model() {
        assert!(outcome(Some("6100123456")).has_key_field());
        assert!(!outcome(None).has_key_field());
        let mut model_only = outcome(None);
        model_only.fields.model = Some("QX1".into());
        assert!(model_only.has_key_field());
    }

    #[test]
    fn recognition_status_serializes_tagged() {
        let json = serde_json::to_string(&RecognitionStatus::Failed("boom".into())).unwrap();
        assert_eq!(json, r#"{"status":"failed","detail":"boom"}"#);
    }
}
