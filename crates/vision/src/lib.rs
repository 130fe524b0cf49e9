pub mod batch;
pub mod decoder;
pub mod dual_label;
pub mod extract;
pub mod live;
pub mod locator;
pub mod pipeline;
pub mod quality;
pub mod raster;
pub mod recognizer;
pub mod report;
pub mod util;

pub use batch::{BatchError, BatchItem, BatchRunner, JobInput, JobQueue, ResultSlots};
pub use decoder::{unrotate_point, CodeCandidate, CodeDecoder, CodeEngine, DecodeError, QrEngine};
pub use dual_label::{DualLabelSession, DualLabelState, DualLabelStep};
pub use extract::{fold_confusables, normalize_text, Extractor};
pub use live::{FrameResult, LiveSession, StopHandle};
pub use locator::{LabelLocator, LocatorOutput};
pub use pipeline::{sha256_hex, PipelineError, ScanPipeline};
pub use quality::{assess, motion_delta, should_capture, Guidance, MotionTracker};
pub use raster::RasterError;
pub use recognizer::{
    MockEngine, OcrError, Recognition, RecognitionParams, TextEngine, TextRecognizer,
};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_engine::TesseractEngine;
