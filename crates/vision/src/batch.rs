//! Bounded worker pool over a FIFO of scan jobs.
//!
//! Workers share exactly two things: the [`JobQueue`] and the [`ResultSlots`].
//! Each worker owns its OCR engine, so a recognition mode chosen by one
//! worker can never be seen by another.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use dockscan_core::{CompiledProfile, ScanOutcome};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::pipeline::{PipelineError, ScanPipeline};
use crate::recognizer::{OcrError, TextEngine};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(#[from] OcrError),
    #[error("Batch worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub enum JobInput {
    File(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl JobInput {
    pub fn name(&self) -> String {
        match self {
            JobInput::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            JobInput::Bytes { name, .. } => name.clone(),
        }
    }
}

/// One finished job, at its submission index.
#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub name: String,
    pub result: Result<ScanOutcome, PipelineError>,
}

/// FIFO of pending jobs tagged with their submission index.
pub struct JobQueue {
    pending: Mutex<VecDeque<(usize, JobInput)>>,
}

impl JobQueue {
    pub fn new(jobs: Vec<JobInput>) -> Self {
        Self { pending: Mutex::new(jobs.into_iter().enumerate().collect()) }
    }

    /// Take the next job. A job is handed to exactly one caller.
    pub async fn pop(&self) -> Option<(usize, JobInput)> {
        self.pending.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Results indexed by submission order, sized up front.
pub struct ResultSlots {
    slots: Mutex<Vec<Option<BatchItem>>>,
}

impl ResultSlots {
    pub fn new(len: usize) -> Self {
        Self { slots: Mutex::new((0..len).map(|_| None).collect()) }
    }

    /// Store `item` at its index. Returns `false` (and drops the item) when the
    /// index is out of range or already filled.
    pub async fn fill(&self, item: BatchItem) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(item.index) {
            Some(slot @ None) => {
                *slot = Some(item);
                true
            }
            Some(Some(_)) => {
                warn!(index = item.index, "result slot already filled");
                false
            }
            None => false,
        }
    }

    /// Drain the filled slots in submission order.
    pub async fn take(&self) -> Vec<BatchItem> {
        std::mem::take(&mut *self.slots.lock().await).into_iter().flatten().collect()
    }
}

pub struct BatchRunner {
    pipeline: ScanPipeline,
    workers: usize,
}

impl BatchRunner {
    pub fn new(pipeline: ScanPipeline) -> Self {
        let workers = pipeline.config().batch.workers.max(1);
        Self { pipeline, workers }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Scan every job and return the results in submission order.
    ///
    /// `engine_factory` is called once per worker before any job starts; if it
    /// fails the batch is aborted. A failing image only fails its own slot.
    pub async fn run<F>(
        &self,
        jobs: Vec<JobInput>,
        profile: Arc<CompiledProfile>,
        engine_factory: F,
    ) -> Result<Vec<BatchItem>, BatchError>
    where
        F: Fn() -> Result<Arc<dyn TextEngine>, OcrError>,
    {
        let total = jobs.len();
        let workers = self.workers.min(total);
        if workers == 0 {
            return Ok(Vec::new());
        }

        let mut pipelines = Vec::with_capacity(workers);
        for _ in 0..workers {
            pipelines.push(self.pipeline.for_engine(engine_factory()?));
        }

        info!(jobs = total, workers, "batch started");
        let queue = Arc::new(JobQueue::new(jobs));
        let slots = Arc::new(ResultSlots::new(total));

        let mut set = JoinSet::new();
        for (worker, pipeline) in pipelines.into_iter().enumerate() {
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let profile = Arc::clone(&profile);
            set.spawn(async move {
                while let Some((index, job)) = queue.pop().await {
                    let name = job.name();
                    debug!(worker, index, name = %name, "job started");
                    let result = match job {
                        JobInput::File(path) => pipeline.scan_file(&path, &profile).await,
                        JobInput::Bytes { name: label, data } => {
                            pipeline.scan_bytes(&label, data, &profile).await
                        }
                    };
                    if let Err(e) = &result {
                        warn!(worker, index, name = %name, error = %e, "job failed");
                    }
                    slots.fill(BatchItem { index, name, result }).await;
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            joined?;
        }

        let items = slots.take().await;
        info!(
            jobs = total,
            failed = items.iter().filter(|i| i.result.is_err()).count(),
            "batch finished"
        );
        Ok(items)
    }
}
