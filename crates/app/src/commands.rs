use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dockscan_core::{BrandCatalog, CompiledProfile, PipelineConfig};
use dockscan_vision::{
    quality, report, BatchItem, BatchRunner, JobInput, MockEngine, OcrError, ScanPipeline,
    TextEngine,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

/// Files are usually still being written when the create event fires.
const INTAKE_SETTLE: Duration = Duration::from_millis(300);

pub struct Settings {
    pub config: PipelineConfig,
    pub profile: Arc<CompiledProfile>,
}

impl Settings {
    /// Explicit paths must exist; the per-user defaults are optional.
    pub fn load(
        config_path: Option<PathBuf>,
        catalog_path: Option<PathBuf>,
        brand: Option<String>,
    ) -> Result<Self> {
        let user_dir = directories::ProjectDirs::from("com", "dockscan", "Dockscan")
            .map(|d| d.config_dir().to_path_buf());
        let pick = |explicit: Option<PathBuf>, file: &str| -> Option<(PathBuf, bool)> {
            match explicit {
                Some(p) => Some((p, true)),
                None => user_dir.as_ref().map(|d| (d.join(file), false)),
            }
        };

        let config = match read_optional(pick(config_path, "dockscan.toml"))? {
            Some(text) => PipelineConfig::from_toml(&text).context("invalid pipeline config")?,
            None => PipelineConfig::default(),
        };

        let catalog = match read_optional(pick(catalog_path, "brands.toml"))? {
            Some(text) => BrandCatalog::from_toml(&text).context("invalid brand catalog")?,
            None => BrandCatalog::default(),
        };
        let profile = match brand {
            Some(id) => catalog.compile(&id)?,
            None => CompiledProfile::default(),
        };
        info!(brand = %profile.profile.id, workers = config.batch.workers, "settings loaded");

        Ok(Self { config, profile: Arc::new(profile) })
    }
}

fn read_optional(candidate: Option<(PathBuf, bool)>) -> Result<Option<String>> {
    let Some((path, required)) = candidate else {
        return Ok(None);
    };
    if !required && !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(text))
}

#[cfg(feature = "tesseract")]
fn engine_factory(config: &PipelineConfig) -> impl Fn() -> Result<Arc<dyn TextEngine>, OcrError> {
    let language = config.recognizer.language.clone();
    move || {
        let engine = dockscan_vision::TesseractEngine::new(None, &language)?;
        Ok(Arc::new(engine) as Arc<dyn TextEngine>)
    }
}

#[cfg(not(feature = "tesseract"))]
fn engine_factory(_config: &PipelineConfig) -> impl Fn() -> Result<Arc<dyn TextEngine>, OcrError> {
    warn!("built without the `tesseract` feature: only machine-readable codes will be read");
    || Ok(Arc::new(MockEngine::text("")) as Arc<dyn TextEngine>)
}

pub async fn scan(
    settings: &Settings,
    files: Vec<PathBuf>,
    workers: Option<usize>,
    csv: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let factory = engine_factory(&settings.config);
    scan_with(settings, files, workers, csv, json, factory).await
}

async fn scan_with<F>(
    settings: &Settings,
    files: Vec<PathBuf>,
    workers: Option<usize>,
    csv: Option<PathBuf>,
    json: bool,
    factory: F,
) -> Result<()>
where
    F: Fn() -> Result<Arc<dyn TextEngine>, OcrError>,
{
    // Every worker builds its own engine from the factory; the pipeline's own
    // recognizer is never used by the batch.
    let pipeline = ScanPipeline::new(settings.config.clone(), Arc::new(MockEngine::text("")));
    let mut runner = BatchRunner::new(pipeline);
    if let Some(n) = workers {
        runner = runner.with_workers(n);
    }

    let jobs = files.into_iter().map(JobInput::File).collect();
    let items = runner.run(jobs, Arc::clone(&settings.profile), factory).await?;

    if json {
        let rendered: Vec<serde_json::Value> = items
            .iter()
            .map(|item| match &item.result {
                Ok(outcome) => serde_json::json!({
                    "index": item.index,
                    "file": item.name,
                    "outcome": outcome,
                }),
                Err(e) => serde_json::json!({
                    "index": item.index,
                    "file": item.name,
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for item in &items {
            match &item.result {
                Ok(o) => println!(
                    "{}\t{}\t{}\t{}\t{}",
                    item.index,
                    item.name,
                    o.fields.manifest_number.as_deref().unwrap_or("-"),
                    o.manifest_source,
                    o.fields.model.as_deref().unwrap_or("-"),
                ),
                Err(e) => println!("{}\t{}\terror: {e}", item.index, item.name),
            }
        }
    }

    let unread = unreadable(&items);
    if !unread.is_empty() {
        warn!(count = unread.len(), files = ?unread, "no manifest number or model recovered");
    }

    if let Some(path) = csv {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        report::write_csv(&items, file)?;
        info!(path = %path.display(), rows = items.len(), "CSV report written");
    }
    Ok(())
}

pub async fn watch(settings: &Settings, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let factory = engine_factory(&settings.config);
    let pipeline = ScanPipeline::new(settings.config.clone(), factory()?);

    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    // Must stay alive for as long as events are wanted.
    let _watcher = spawn_intake_watcher(dir, tx).context("failed to start folder watcher")?;
    info!(dir = %dir.display(), "watching for label photos");

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(path) = next else { break };
                if !is_image(&path) {
                    continue;
                }
                tokio::time::sleep(INTAKE_SETTLE).await;
                match pipeline.scan_file(&path, &settings.profile).await {
                    Ok(outcome) => {
                        if !outcome.has_key_field() {
                            warn!(path = %path.display(), "no manifest number or model recovered");
                        }
                        println!("{}", serde_json::to_string(&outcome)?);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "scan failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watcher");
                break;
            }
        }
    }
    Ok(())
}

pub fn assess(settings: &Settings, image: &Path, motion: f32) -> Result<()> {
    let frame = image::open(image).with_context(|| format!("failed to open {}", image.display()))?;
    let guidance = quality::assess(&frame, motion, &settings.config.quality);
    let capture = quality::should_capture(&guidance, motion, &settings.config.quality);
    let report = serde_json::json!({ "guidance": guidance, "capture": capture });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Send the path of every file created in `watch_dir` to `tx`. The returned
/// watcher must be kept alive.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                for path in ev.paths {
                    let _ = tx.try_send(path);
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Names of images that scanned cleanly but yielded no key field.
fn unreadable(items: &[BatchItem]) -> Vec<&str> {
    items
        .iter()
        .filter(|item| matches!(&item.result, Ok(o) if !o.has_key_field()))
        .map(|item| item.name.as_str())
        .collect()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}
