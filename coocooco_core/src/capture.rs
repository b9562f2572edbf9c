//! Turns a picked photo into a new bird on the field.
//!
//! Copy, detection, classification and the store write all run on a spawned
//! task; the result comes back through a one-slot channel that the camera
//! screen polls each tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::storage::{BirdRecord, BirdStore};
use crate::vision::VisionService;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Saved(BirdRecord),
    Failed(String),
}

pub struct CapturePipeline {
    vision: Arc<dyn VisionService>,
    store: Arc<dyn BirdStore>,
    captures_dir: PathBuf,
    runtime: tokio::runtime::Handle,
    busy: bool,
    result_tx: flume::Sender<CaptureOutcome>,
    result_rx: flume::Receiver<CaptureOutcome>,
}

impl CapturePipeline {
    pub fn new(
        vision: Arc<dyn VisionService>,
        store: Arc<dyn BirdStore>,
        captures_dir: impl Into<PathBuf>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (result_tx, result_rx) = flume::bounded(1);
        Self {
            vision,
            store,
            captures_dir: captures_dir.into(),
            runtime,
            busy: false,
            result_tx,
            result_rx,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Starts processing `source`. Returns false while a capture is running.
    pub fn start(&mut self, source: PathBuf) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;

        let vision = Arc::clone(&self.vision);
        let store = Arc::clone(&self.store);
        let captures_dir = self.captures_dir.clone();
        let tx = self.result_tx.clone();

        self.runtime.spawn(async move {
            let outcome = match run_capture(vision, store, &captures_dir, &source).await {
                Ok(record) => {
                    tracing::info!(
                        "Captured {} as {} ({})",
                        record.image_path,
                        record.species,
                        record.id
                    );
                    CaptureOutcome::Saved(record)
                }
                Err(error) => {
                    tracing::error!("Capture of {:?} failed: {:#}", source, error);
                    CaptureOutcome::Failed(format!("{:#}", error))
                }
            };
            let _ = tx.send_async(outcome).await;
        });
        true
    }

    pub fn poll(&mut self) -> Option<CaptureOutcome> {
        let outcome = self.result_rx.try_recv().ok()?;
        self.busy = false;
        Some(outcome)
    }
}

async fn run_capture(
    vision: Arc<dyn VisionService>,
    store: Arc<dyn BirdStore>,
    captures_dir: &Path,
    source: &Path,
) -> Result<BirdRecord> {
    tokio::fs::create_dir_all(captures_dir)
        .await
        .with_context(|| format!("Failed to create captures directory {:?}", captures_dir))?;

    let dest = capture_destination(captures_dir, source, chrono::Local::now());
    tokio::fs::copy(source, &dest)
        .await
        .with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))?;

    let crop = vision.detect_and_crop(&dest, &captures_dir.join("crops")).await;
    let species = vision.classify(crop.as_deref().unwrap_or(&dest)).await;

    let mut record = BirdRecord::new(species, dest.to_string_lossy());
    record.cropped_path = crop.map(|path| path.to_string_lossy().into_owned());

    let saved = record.clone();
    tokio::task::spawn_blocking(move || store.add(saved))
        .await
        .context("Store task failed")??;
    Ok(record)
}

/// `bird_<YYYYmmdd_HHMMSS>.<ext>`, with a numeric suffix when two captures
/// land in the same second.
fn capture_destination(
    captures_dir: &Path,
    source: &Path,
    now: chrono::DateTime<chrono::Local>,
) -> PathBuf {
    let ext = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    let stem = format!("bird_{}", now.format("%Y%m%d_%H%M%S"));

    let mut candidate = captures_dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = captures_dir.join(format!("{}_{}.{}", stem, n, ext));
        n += 1;
    }
    candidate
}
