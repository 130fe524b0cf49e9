use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Approved-dimension history kept per brand.
pub const MAX_DIMENSION_SAMPLES: usize = 20;
/// Samples required before the learned geometry is trusted.
pub const MIN_DIMENSION_SAMPLES: usize = 5;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to parse brand catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Unknown brand profile: '{0}'")]
    UnknownBrand(String),
    #[error("Duplicate brand profile id: '{0}'")]
    DuplicateBrand(String),
}

/// Whether a brand needs one capture or a shipping + product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelLogic {
    #[default]
    SingleLabel,
    DualLabel,
}

/// OCR parameter set requested for a recognition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    /// Single text line, digits and separators only.
    Line,
    /// Uniform text block, full label alphabet.
    Block,
    /// Scattered text, full label alphabet.
    #[default]
    Sparse,
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::Line => write!(f, "line"),
            RecognitionMode::Block => write!(f, "block"),
            RecognitionMode::Sparse => write!(f, "sparse"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSample {
    pub width: u32,
    pub height: u32,
}

/// Brand-specific extraction hints, owned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandProfile {
    pub id: String,
    pub name: String,
    pub logic: LabelLogic,
    pub manifest_keys: Vec<String>,
    pub model_keys: Vec<String>,
    pub customer_keys: Vec<String>,
    /// Overrides the built-in manifest pattern when set and valid.
    pub manifest_pattern: Option<String>,
    /// Fallback pattern for the model number over raw text.
    pub model_pattern: Option<String>,
    /// Also fold S→5 and B→8 on the numeric path.
    pub fold_extended_confusables: bool,
    pub recognition_mode: RecognitionMode,
    pub learned_dimension_samples: VecDeque<DimensionSample>,
}

impl Default for BrandProfile {
    fn default() -> Self {
        Self {
            id: "generic".to_string(),
            name: "Generic".to_string(),
            logic: LabelLogic::SingleLabel,
            manifest_keys: vec!["MS#".into(), "MS".into(), "M5#".into()],
            model_keys: vec!["MODEL".into()],
            customer_keys: vec!["CONSIGNEE".into(), "CUSTOMER".into()],
            manifest_pattern: None,
            model_pattern: None,
            fold_extended_confusables: false,
            recognition_mode: RecognitionMode::Sparse,
            learned_dimension_samples: VecDeque::new(),
        }
    }
}

impl BrandProfile {
    /// Record a supervisor-approved label size, evicting the oldest beyond
    /// [`MAX_DIMENSION_SAMPLES`]. Called by the review workflow.
    pub fn push_dimension_sample(&mut self, width: u32, height: u32) {
        self.learned_dimension_samples
            .push_back(DimensionSample { width, height });
        while self.learned_dimension_samples.len() > MAX_DIMENSION_SAMPLES {
            self.learned_dimension_samples.pop_front();
        }
    }

    /// Mean width/height over the most recent samples, once enough exist.
    pub fn learned_dimension(&self) -> Option<(u32, u32)> {
        let n = self.learned_dimension_samples.len();
        if n < MIN_DIMENSION_SAMPLES {
            return None;
        }
        let recent = self
            .learned_dimension_samples
            .iter()
            .skip(n.saturating_sub(MAX_DIMENSION_SAMPLES));
        let (count, sum_w, sum_h) = recent.fold((0u64, 0u64, 0u64), |(c, w, h), s| {
            (c + 1, w + u64::from(s.width), h + u64::from(s.height))
        });
        let avg = |sum: u64| (sum as f64 / count as f64).round() as u32;
        Some((avg(sum_w), avg(sum_h)))
    }
}

/// A profile with its patterns compiled once. Invalid patterns are dropped.
#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub profile: BrandProfile,
    pub manifest_regex: Option<Regex>,
    pub model_regex: Option<Regex>,
    manifest_keys: Vec<String>,
    model_keys: Vec<String>,
    customer_keys: Vec<String>,
}

impl CompiledProfile {
    pub fn new(profile: BrandProfile) -> Self {
        let manifest_regex =
            compile_optional(&profile.id, "manifest_pattern", &profile.manifest_pattern);
        let model_regex = compile_optional(&profile.id, "model_pattern", &profile.model_pattern);
        let upper = |keys: &[String]| -> Vec<String> {
            keys.iter()
                .map(|k| k.trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            manifest_keys: upper(&profile.manifest_keys),
            model_keys: upper(&profile.model_keys),
            customer_keys: upper(&profile.customer_keys),
            manifest_regex,
            model_regex,
            profile,
        }
    }

    pub fn manifest_keys(&self) -> &[String] {
        &self.manifest_keys
    }

    pub fn model_keys(&self) -> &[String] {
        &self.model_keys
    }

    pub fn customer_keys(&self) -> &[String] {
        &self.customer_keys
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn is_dual_label(&self) -> bool {
        self.profile.logic == LabelLogic::DualLabel
    }
}

impl Default for CompiledProfile {
    fn default() -> Self {
        Self::new(BrandProfile::default())
    }
}

fn compile_optional(id: &str, field: &str, pattern: &Option<String>) -> Option<Regex> {
    let pattern = pattern.as_deref()?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(brand = id, field, error = %e, "ignoring invalid profile pattern");
            None
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "brand")]
    brands: Vec<BrandProfile>,
}

/// Read-only set of brand profiles, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct BrandCatalog {
    brands: Vec<BrandProfile>,
}

impl BrandCatalog {
    pub fn new(brands: Vec<BrandProfile>) -> Result<Self, ProfileError> {
        for (i, b) in brands.iter().enumerate() {
            if brands[..i].iter().any(|other| other.id == b.id) {
                return Err(ProfileError::DuplicateBrand(b.id.clone()));
            }
        }
        Ok(Self { brands })
    }

    /// Parse `[[brand]]` tables.
    pub fn from_toml(toml_content: &str) -> Result<Self, ProfileError> {
        let file: CatalogFile = toml::from_str(toml_content)?;
        Self::new(file.brands)
    }

    pub fn get(&self, id: &str) -> Option<&BrandProfile> {
        self.brands.iter().find(|b| b.id == id)
    }

    pub fn compile(&self, id: &str) -> Result<CompiledProfile, ProfileError> {
        self.get(id)
            .cloned()
            .map(CompiledProfile::new)
            .ok_or_else(|| ProfileError::UnknownBrand(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.brands.iter().map(|b| b.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[brand]]
id = "lg"
name = "LG"
logic = "dual_label"
model_keys = ["model", "modelo"]
customer_keys = ["consignee"]
fold_extended_confusables = true
recognition_mode = "line"

[[brand]]
id = "acme"
name = "Acme"
model_pattern = "([A-Z]{2}\\d{4}"
"#;

    #[test]
    fn catalog_parses_brands() {
        let cat = BrandCatalog::from_toml(CATALOG).unwrap();
        assert_eq!(cat.ids().collect::<Vec<_>>(), vec!["lg", "acme"]);
        let lg = cat.get("lg").unwrap();
        assert_eq!(lg.logic, LabelLogic::DualLabel);
        assert!(lg.fold_extended_confusables);
        assert_eq!(lg.recognition_mode, RecognitionMode::Line);
        // Unspecified fields fall back to defaults.
        assert_eq!(lg.manifest_keys, BrandProfile::default().manifest_keys);
    }

    #[test]
    fn compiled_keys_are_uppercased() {
        let cat = BrandCatalog::from_toml(CATALOG).unwrap();
        let lg = cat.compile("lg").unwrap();
        assert_eq!(lg.model_keys(), ["MODEL", "MODELO"]);
        assert!(lg.is_dual_label());
    }

    #[test]
    fn invalid_pattern_fails_closed() {
        let cat = BrandCatalog::from_toml(CATALOG).unwrap();
        let acme = cat.compile("acme").unwrap();
        assert!(acme.model_regex.is_none());
    }

    #[test]
    fn unknown_brand_is_an_error() {
        let cat = BrandCatalog::from_toml(CATALOG).unwrap();
        assert!(matches!(cat.compile("nope"), Err(ProfileError::UnknownBrand(_))));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let dup = "[[brand]]\nid = \"a\"\n[[brand]]\nid = \"a\"\n";
        assert!(matches!(
            BrandCatalog::from_toml(dup),
            Err(ProfileError::DuplicateBrand(_))
        ));
    }

    #[test]
    fn dimension_history_is_bounded_fifo() {
        let mut p = BrandProfile::default();
        for i in 0..25 {
            p.push_dimension_sample(100 + i, 50);
        }
        assert_eq!(p.learned_dimension_samples.len(), MAX_DIMENSION_SAMPLES);
        assert_eq!(p.learned_dimension_samples.front().unwrap().width, 105);
    }

    #[test]
    fn learned_dimension_needs_five_samples() {
        let mut p = BrandProfile::default();
        for _ in 0..4 {
            p.push_dimension_sample(200, 100);
        }
        assert_eq!(p.learned_dimension(), None);
        p.push_dimension_sample(300, 150);
        assert_eq!(p.learned_dimension(), Some((220, 110)));
    }
}
