//! Frame-by-frame capture loop: gate each frame, scan the ones that are ready
//! and still, and feed dual-label profiles through their state machine.

use std::sync::Arc;

use dockscan_core::{CompiledProfile, QualityConfig, ScanOutcome};
use image::DynamicImage;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::dual_label::{DualLabelSession, DualLabelStep};
use crate::pipeline::ScanPipeline;
use crate::quality::{self, Guidance, MotionTracker};

/// Cloneable handle that stops a [`LiveSession`] from another task.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug)]
pub enum FrameResult {
    /// The session was stopped before this frame; nothing ran.
    Stopped,
    /// Frame not captured; show the guidance.
    Guidance(Guidance),
    Captured {
        guidance: Guidance,
        outcome: Box<ScanOutcome>,
        /// Set for dual-label profiles.
        dual_label: Option<DualLabelStep>,
    },
    /// Stopped while the capture was being analysed; the result was dropped.
    Cancelled,
}

pub struct LiveSession {
    pipeline: ScanPipeline,
    profile: Arc<CompiledProfile>,
    quality: QualityConfig,
    motion: MotionTracker,
    dual_label: Option<DualLabelSession>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    frames: u64,
}

impl LiveSession {
    pub fn new(pipeline: ScanPipeline, profile: Arc<CompiledProfile>) -> Self {
        let (tx, rx) = watch::channel(false);
        let dual_label = profile.is_dual_label().then(|| {
            let mut s = DualLabelSession::new();
            s.start();
            s
        });
        Self {
            quality: pipeline.config().quality.clone(),
            pipeline,
            profile,
            motion: MotionTracker::new(),
            dual_label,
            stop_tx: Arc::new(tx),
            stop_rx: rx,
            frames: 0,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { tx: Arc::clone(&self.stop_tx) }
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    pub fn dual_label(&self) -> Option<&DualLabelSession> {
        self.dual_label.as_ref()
    }

    pub async fn on_frame(&mut self, frame: DynamicImage) -> FrameResult {
        if self.is_stopped() {
            return FrameResult::Stopped;
        }
        self.frames += 1;

        let motion = self.motion.update(&frame);
        let guidance = quality::assess(&frame, motion, &self.quality);
        if !quality::should_capture(&guidance, motion, &self.quality) {
            return FrameResult::Guidance(guidance);
        }

        let name = format!("frame-{}", self.frames);
        debug!(frame = %name, motion, "capturing");
        let mut stop = self.stop_rx.clone();
        let scan = self.pipeline.scan(&name, Arc::new(frame), &self.profile, Some(motion));
        let outcome = tokio::select! {
            outcome = scan => outcome,
            _ = stop.wait_for(|stopped| *stopped) => {
                info!(frame = %name, "capture cancelled");
                return FrameResult::Cancelled;
            }
        };

        // Require the camera to settle again before the next capture.
        self.motion.reset();
        let dual_label = self.dual_label.as_mut().map(|session| {
            let step = session.submit(outcome.clone());
            // The record is handed out with this frame; the next capture
            // starts a new pair.
            if matches!(step, DualLabelStep::Completed(_)) {
                session.reset();
            }
            step
        });
        FrameResult::Captured { guidance, outcome: Box::new(outcome), dual_label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{MockEngine, OcrError, RecognitionParams, TextEngine};
    use dockscan_core::{
        BrandProfile, LabelLogic, PipelineConfig, RecognitionMode, RecognitionResult,
    };
    use image::{GrayImage, ImageBuffer, Luma};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out one scripted text per general pass. Digits-only passes read
    /// nothing.
    struct Script(Mutex<VecDeque<&'static str>>);

    impl TextEngine for Script {
        fn recognize(
            &self,
            _region: &GrayImage,
            params: &RecognitionParams,
        ) -> Result<RecognitionResult, OcrError> {
            if params.mode == RecognitionMode::Line {
                return Ok(RecognitionResult::empty());
            }
            let text = self.0.lock().unwrap().pop_front().unwrap_or_default();
            Ok(RecognitionResult { raw_text: text.into(), ..RecognitionResult::empty() })
        }
    }

    fn page() -> DynamicImage {
        let img: GrayImage = ImageBuffer::from_fn(400, 300, |x, y| {
            let in_row = (100..130).contains(&y);
            let in_bar = x >= 40 && x < 360 && (x - 40) % 30 < 14;
            Luma([if in_row && in_bar { 0 } else { 255 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    fn session(engine: MockEngine, logic: LabelLogic) -> LiveSession {
        let brand = BrandProfile { logic, ..BrandProfile::default() };
        let pipeline = ScanPipeline::new(PipelineConfig::default(), Arc::new(engine));
        LiveSession::new(pipeline, Arc::new(CompiledProfile::new(brand)))
    }

    #[tokio::test]
    async fn first_frame_only_gives_guidance() {
        let mut s = session(MockEngine::text(""), LabelLogic::SingleLabel);
        let FrameResult::Guidance(g) = s.on_frame(page()).await else {
            panic!("expected guidance");
        };
        assert_eq!(g.message, "Hold steady");
    }

    #[tokio::test]
    async fn steady_ready_frame_is_captured() {
        let mut s = session(MockEngine::text("MS# 6100123456"), LabelLogic::SingleLabel);
        s.on_frame(page()).await;
        let FrameResult::Captured { outcome, dual_label, .. } = s.on_frame(page()).await else {
            panic!("expected capture");
        };
        assert_eq!(outcome.fields.manifest_number.as_deref(), Some("6100123456"));
        assert_eq!(outcome.source_name, "frame-2");
        assert!(dual_label.is_none());
        // Tracker was reset: the next frame must settle again.
        assert!(matches!(s.on_frame(page()).await, FrameResult::Guidance(_)));
    }

    #[tokio::test]
    async fn dual_label_profile_stages_ship_label() {
        let mut s = session(MockEngine::text("MS# 6100123456"), LabelLogic::DualLabel);
        s.on_frame(page()).await;
        let FrameResult::Captured { dual_label, .. } = s.on_frame(page()).await else {
            panic!("expected capture");
        };
        assert_eq!(dual_label, Some(DualLabelStep::Staged));
        assert_eq!(s.dual_label().map(|d| d.state().name()), Some("staged"));
    }

    #[tokio::test]
    async fn dual_label_session_records_consecutive_pairs() {
        let script = Script(Mutex::new(VecDeque::from([
            "MS# 6100123456",
            "MODEL ABC123",
            "MS# 6100999999",
            "MODEL XYZ789",
        ])));
        let brand = BrandProfile { logic: LabelLogic::DualLabel, ..BrandProfile::default() };
        let pipeline = ScanPipeline::new(PipelineConfig::default(), Arc::new(script));
        let mut s = LiveSession::new(pipeline, Arc::new(CompiledProfile::new(brand)));

        let mut steps = Vec::new();
        for _ in 0..16 {
            if steps.len() == 4 {
                break;
            }
            if let FrameResult::Captured { dual_label: Some(step), .. } = s.on_frame(page()).await {
                steps.push(step);
            }
        }

        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], DualLabelStep::Staged);
        let DualLabelStep::Completed(first) = &steps[1] else {
            panic!("expected first record, got {:?}", steps[1]);
        };
        assert_eq!(first.fields.manifest_number.as_deref(), Some("6100123456"));
        assert_eq!(first.fields.model.as_deref(), Some("ABC123"));

        assert_eq!(steps[2], DualLabelStep::Staged);
        let DualLabelStep::Completed(second) = &steps[3] else {
            panic!("expected second record, got {:?}", steps[3]);
        };
        assert_eq!(second.fields.manifest_number.as_deref(), Some("6100999999"));
        assert_eq!(second.fields.model.as_deref(), Some("XYZ789"));
        assert_eq!(s.dual_label().map(|d| d.state().name()), Some("awaiting_ship"));
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_capture_and_rejects_frames() {
        let engine = MockEngine::text("6100123456").with_delay(Duration::from_millis(500));
        let mut s = session(engine, LabelLogic::SingleLabel);
        s.on_frame(page()).await;

        let handle = s.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.stop();
        });
        assert!(matches!(s.on_frame(page()).await, FrameResult::Cancelled));
        assert!(s.is_stopped());
        assert!(matches!(s.on_frame(page()).await, FrameResult::Stopped));
    }

    #[tokio::test]
    async fn stopped_session_runs_nothing() {
        let engine = Arc::new(MockEngine::text(""));
        let pipeline = ScanPipeline::new(PipelineConfig::default(), engine.clone());
        let mut s = LiveSession::new(pipeline, Arc::new(CompiledProfile::default()));
        s.stop();
        assert!(matches!(s.on_frame(page()).await, FrameResult::Stopped));
        assert!(engine.calls().is_empty());
    }
}
