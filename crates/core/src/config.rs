//! Tunable thresholds for every pipeline stage.
//!
//! Earlier iterations of the label tooling used slightly different constants
//! for the same checks. The defaults below are the canonical set; the
//! alternates are kept as named constructors so a deployment can opt in
//! explicitly instead of editing numbers by hand.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::RecognitionMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decoder: DecoderConfig,
    pub locator: LocatorConfig,
    pub quality: QualityConfig,
    pub recognizer: RecognizerConfig,
    pub batch: BatchConfig,
}

impl PipelineConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self.decoder.rotations.iter().find(|&&d| d % 90 != 0 || d >= 360) {
            return Err(ConfigError::Invalid {
                field: "decoder.rotations",
                reason: format!("{bad} is not one of 0, 90, 180, 270"),
            });
        }
        let l = &self.locator;
        if l.analysis_width == 0 {
            return Err(ConfigError::Invalid {
                field: "locator.analysis_width",
                reason: "must be positive".into(),
            });
        }
        if l.aspect_min <= 0.0 || l.aspect_min > l.aspect_max {
            return Err(ConfigError::Invalid {
                field: "locator.aspect_min",
                reason: format!("range [{}, {}] is empty", l.aspect_min, l.aspect_max),
            });
        }
        if !(0.0..=1.0).contains(&l.density_min) || l.density_min > l.density_max {
            return Err(ConfigError::Invalid {
                field: "locator.density_min",
                reason: format!("range [{}, {}] is empty", l.density_min, l.density_max),
            });
        }
        if !(0.0..=1.0).contains(&l.anchor_top_share) {
            return Err(ConfigError::Invalid {
                field: "locator.anchor_top_share",
                reason: "must be within 0..=1".into(),
            });
        }
        if self.batch.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.workers",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Clockwise rotations tried by the general engine, in order.
    pub rotations: Vec<u16>,
    pub timeout_secs: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { rotations: vec![0, 90, 180, 270], timeout_secs: 10 }
    }
}

impl DecoderConfig {
    /// The three-angle sweep used by the first batch scanner.
    pub fn three_angle() -> Self {
        Self { rotations: vec![0, 90, 270], ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Four,
    Eight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Width the photo is downscaled to before blob analysis.
    pub analysis_width: u32,
    /// Luminance above which a pixel counts as label paper.
    pub bright_threshold: u8,
    /// Luminance below which a pixel counts as ink.
    pub dark_threshold: u8,
    pub connectivity: Connectivity,
    /// Minimum blob area in analysis pixels.
    pub min_blob_area: u32,
    pub aspect_min: f64,
    pub aspect_max: f64,
    pub density_min: f64,
    pub density_max: f64,
    /// Padding added to each side of the winning blob, as a fraction of its size.
    pub blob_padding: f64,
    /// Horizontal padding per side around a code box, in code widths.
    pub anchor_pad_x: f64,
    /// Vertical padding per side around a code box, in code heights.
    pub anchor_pad_y: f64,
    /// Share of the total vertical padding placed above the code.
    pub anchor_top_share: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            analysis_width: 480,
            bright_threshold: 200,
            dark_threshold: 150,
            connectivity: Connectivity::Eight,
            min_blob_area: 500,
            aspect_min: 0.2,
            aspect_max: 7.0,
            density_min: 0.05,
            density_max: 0.8,
            blob_padding: 0.05,
            anchor_pad_x: 2.2,
            anchor_pad_y: 1.5,
            anchor_top_share: 0.6,
        }
    }
}

impl LocatorConfig {
    /// The tighter blob filter used by the first label pre-processor.
    pub fn strict() -> Self {
        Self {
            dark_threshold: 165,
            connectivity: Connectivity::Four,
            aspect_min: 0.25,
            aspect_max: 5.5,
            density_min: 0.10,
            density_max: 0.65,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Normalized motion above which the frame is rejected.
    pub motion_threshold: f32,
    /// Motion below which a ready frame triggers a capture.
    pub capture_motion: f32,
    /// Smallest glyph height (px) that reads reliably.
    pub min_glyph_height: u32,
    /// Frames wider than this are downscaled before analysis.
    pub max_analysis_width: u32,
    pub binarize_threshold: u8,
    /// Components with this many pixels or fewer are treated as noise.
    pub min_component_pixels: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.08,
            capture_motion: 0.06,
            min_glyph_height: 20,
            max_analysis_width: 1000,
            binarize_threshold: 128,
            min_component_pixels: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub timeout_secs: u64,
    /// Otsu-binarize regions before the general pass.
    pub binarize: bool,
    /// Run a digits-only line pass when the general pass finds no manifest number.
    pub line_pass: bool,
    /// Overrides the profile's mode for the general pass.
    pub mode_override: Option<RecognitionMode>,
    pub language: String,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            binarize: false,
            line_pass: true,
            mode_override: None,
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
    /// Longest side of crop-suggestion thumbnails.
    pub thumbnail_size: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 2, thumbnail_size: 160 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = PipelineConfig::from_toml("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.batch.workers, 2);
        assert_eq!(cfg.recognizer.timeout_secs, 15);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = PipelineConfig::from_toml(
            "[locator]\naspect_max = 5.5\n[decoder]\nrotations = [0, 90, 270]\n",
        )
        .unwrap();
        assert_eq!(cfg.locator.aspect_max, 5.5);
        assert_eq!(cfg.locator.aspect_min, 0.2);
        assert_eq!(cfg.decoder, DecoderConfig::three_angle());
    }

    #[test]
    fn rejects_odd_rotation() {
        let err = PipelineConfig::from_toml("[decoder]\nrotations = [45]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "decoder.rotations", .. }));
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(PipelineConfig::from_toml("[batch]\nworkers = 0\n").is_err());
    }

    #[test]
    fn strict_locator_uses_tighter_bounds() {
        let s = LocatorConfig::strict();
        assert_eq!((s.aspect_min, s.aspect_max), (0.25, 5.5));
        assert_eq!((s.density_min, s.density_max), (0.10, 0.65));
    }
}
