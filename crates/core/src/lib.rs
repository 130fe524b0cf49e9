pub mod config;
pub mod geometry;
pub mod manifest;
pub mod profile;
pub mod scan;

pub use config::{
    BatchConfig, ConfigError, Connectivity, DecoderConfig, LocatorConfig, PipelineConfig,
    QualityConfig, RecognizerConfig,
};
pub use geometry::{Rect, Size, MIN_RECT_DIM};
pub use manifest::{is_valid_manifest_number, manifest_from_digits};
pub use profile::{
    BrandCatalog, BrandProfile, CompiledProfile, DimensionSample, LabelLogic, ProfileError,
    RecognitionMode,
};
pub use scan::{
    CropSuggestion, DecodeResult, Diagnostics, FieldSet, LocatorCandidate, LocatorSource,
    ManifestSource, RecognitionResult, RecognitionStatus, ScanOutcome, Word, WordBox,
};
