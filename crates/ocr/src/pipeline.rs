use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tally_core::Receipt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigError, OcrCallPolicy, ScanConfig};
use crate::guard::recognize_guarded;
use crate::preprocess::ImagePreprocessor;
use crate::recognizer::OcrBackend;
use crate::scan::{ReceiptParser, ScanError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// The result of a single receipt processing run.
#[derive(Debug)]
pub struct ScanResult {
    /// Raw OCR text output.
    pub ocr_text: String,
    pub receipt: Receipt,
}

/// Orchestrates: preprocess → guarded OCR call → normalize → extract → assemble.
///
/// The async counterpart of [`crate::ReceiptScanner`]: same stages, but the
/// OCR call runs on the blocking pool under the configured timeout/retry policy.
pub struct ReceiptPipeline<R: OcrBackend + ?Sized> {
    recognizer: Arc<R>,
    preprocessor: ImagePreprocessor,
    parser: ReceiptParser,
    policy: OcrCallPolicy,
}

impl<R: OcrBackend + ?Sized + 'static> ReceiptPipeline<R> {
    pub fn new(
        recognizer: Arc<R>,
        preprocessor: ImagePreprocessor,
        parser: ReceiptParser,
        policy: OcrCallPolicy,
    ) -> Self {
        Self { recognizer, preprocessor, parser, policy }
    }

    pub fn from_config(recognizer: Arc<R>, config: &ScanConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            recognizer,
            config.preprocessor(),
            config.build_parser()?,
            config.ocr.call_policy(),
        ))
    }

    /// Process a file on disk.
    pub async fn process_file(&self, path: &Path) -> Result<ScanResult, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        self.process_bytes(&bytes).await
    }

    /// Process raw bytes (from an upload or file read).
    pub async fn process_bytes(&self, data: &[u8]) -> Result<ScanResult, PipelineError> {
        // 1. Preprocess image.
        let image: Arc<[u8]> = self.preprocessor.resize(data).map_err(ScanError::from)?.into();

        // 2. Run OCR.
        let ocr_text = recognize_guarded(self.recognizer.clone(), image, self.policy)
            .await
            .map_err(ScanError::from)?;
        tracing::debug!(chars = ocr_text.chars().count(), "OCR text received");

        // 3. Normalize, extract, assemble.
        let receipt = self.parser.parse(&ocr_text).map_err(ScanError::from)?;

        Ok(ScanResult { ocr_text, receipt })
    }
}

// ── Watch-folder integration ──────────────────────────────────────────────────

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Spawn a notify watcher on `watch_dir` that sends new image paths to `tx`.
/// Watching stops when the returned watcher is dropped.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(ev) if matches!(ev.kind, EventKind::Create(_)) => {
                for path in ev.paths.into_iter().filter(|p| is_image_path(p)) {
                    if tx.try_send(path).is_err() {
                        tracing::warn!("intake queue full or closed, dropping event");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("watch error: {e}"),
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Wait until a freshly created file stops growing.
///
/// Watch events fire when a file is created, which can be before the writer
/// has finished. Returns the settled size once two reads `interval` apart
/// agree on a non-zero length, or the last seen size after `max_checks` reads.
pub async fn wait_until_written(
    path: &Path,
    interval: Duration,
    max_checks: u32,
) -> std::io::Result<u64> {
    let mut last = tokio::fs::metadata(path).await?.len();
    for _ in 0..max_checks {
        tokio::time::sleep(interval).await;
        let len = tokio::fs::metadata(path).await?.len();
        if len == last && len > 0 {
            return Ok(len);
        }
        last = len;
    }
    tracing::debug!("{} still changing, processing anyway", path.display());
    Ok(last)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
