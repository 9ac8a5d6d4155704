use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tally_ocr::{
    FailureKind, MockRecognizer, OcrBackend, OcrBackendKind, OcrConfig, PipelineError,
    ReceiptPipeline, ScanConfig, VisionRecognizer,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "TALLY_CONFIG";
const API_KEY_ENV: &str = "TALLY_VISION_API_KEY";
const SETTLE_INTERVAL: Duration = Duration::from_millis(200);
const SETTLE_CHECKS: u32 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let project_dirs = directories::ProjectDirs::from("com", "tally", "Tally")
        .context("no home directory to place app data in")?;
    let data_dir = project_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let config_path = config_path(&data_dir, std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let config = ScanConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let db = tally_storage::create_db(&data_dir.join("receipts.db"))
        .await
        .context("opening receipt database")?;

    let intake_dir = data_dir.join("intake");
    std::fs::create_dir_all(&intake_dir)
        .with_context(|| format!("creating {}", intake_dir.display()))?;

    let backend = build_backend(&config.ocr, std::env::var(API_KEY_ENV).ok())?;
    let pipeline = ReceiptPipeline::from_config(backend, &config)?;
    tracing::info!(backend = ?config.ocr.backend, "OCR backend ready");

    // The channel bridges the notify watcher thread and the async processor.
    // The consumer starts first so a large backlog cannot fill it.
    let (receipt_tx, receipt_rx) = mpsc::channel::<PathBuf>(64);
    let worker = tokio::spawn(run_intake(pipeline, db.clone(), receipt_rx, SETTLE_INTERVAL));

    let backlog = pending_images(&intake_dir)?;
    if !backlog.is_empty() {
        tracing::info!("{} receipts waiting in intake folder", backlog.len());
    }
    let backlog_task = tokio::spawn(queue_backlog(backlog, receipt_tx.clone()));

    // Dropping the watcher stops the notifications.
    let _watcher = tally_ocr::spawn_intake_watcher(&intake_dir, receipt_tx)
        .context("starting intake folder watcher")?;
    tracing::info!("Watching intake folder: {}", intake_dir.display());

    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
    tracing::info!("shutting down");
    backlog_task.abort();
    worker.abort();

    db.close().await;
    Ok(())
}

/// Process queued paths until every sender is gone. Returns how many
/// receipts were stored.
async fn run_intake(
    pipeline: ReceiptPipeline<dyn OcrBackend>,
    db: tally_storage::DbPool,
    mut receipt_rx: mpsc::Receiver<PathBuf>,
    settle_interval: Duration,
) -> usize {
    let mut stored = 0;
    while let Some(path) = receipt_rx.recv().await {
        if process(&pipeline, &db, &path, settle_interval).await {
            stored += 1;
        }
    }
    stored
}

async fn queue_backlog(paths: Vec<PathBuf>, receipt_tx: mpsc::Sender<PathBuf>) {
    for path in paths {
        if receipt_tx.send(path).await.is_err() {
            break;
        }
    }
}

async fn process(
    pipeline: &ReceiptPipeline<dyn OcrBackend>,
    db: &tally_storage::DbPool,
    path: &Path,
    settle_interval: Duration,
) -> bool {
    tracing::info!("Processing receipt: {}", path.display());
    if let Err(e) = tally_ocr::wait_until_written(path, settle_interval, SETTLE_CHECKS).await {
        tracing::warn!("skipping {}: {e}", path.display());
        return false;
    }
    match pipeline.process_file(path).await {
        Ok(result) => match tally_storage::save_receipt(db, &result.receipt).await {
            Ok(id) => {
                tracing::info!(
                    id,
                    store = result.receipt.store_name(),
                    total = %result.receipt.total_price(),
                    "receipt stored"
                );
                true
            }
            Err(e) => {
                tracing::error!("storing {}: {e}", path.display());
                false
            }
        },
        Err(e) => {
            match failure_kind(&e) {
                FailureKind::ClientInput => tracing::warn!("skipping {}: {e}", path.display()),
                FailureKind::Upstream => tracing::error!("scanning {}: {e}", path.display()),
            }
            false
        }
    }
}

/// A file that vanished or cannot be read is the sender's problem, like a bad image.
fn failure_kind(e: &PipelineError) -> FailureKind {
    match e {
        PipelineError::Io(_) => FailureKind::ClientInput,
        PipelineError::Scan(scan) => scan.kind(),
    }
}

fn config_path(data_dir: &Path, from_env: Option<PathBuf>) -> PathBuf {
    from_env.unwrap_or_else(|| data_dir.join("tally.toml"))
}

fn build_backend(ocr: &OcrConfig, api_key: Option<String>) -> anyhow::Result<Arc<dyn OcrBackend>> {
    let backend: Arc<dyn OcrBackend> = match ocr.backend {
        OcrBackendKind::Vision => {
            let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
                bail!("the vision backend needs {API_KEY_ENV} to be set");
            };
            Arc::new(
                VisionRecognizer::new(key, ocr.call_policy().timeout)
                    .with_endpoint(&ocr.endpoint)
                    .with_language_hints(ocr.language_hints.clone()),
            )
        }
        OcrBackendKind::Tesseract => tesseract_backend(ocr)?,
        OcrBackendKind::Mock => Arc::new(MockRecognizer::new("")),
    };
    Ok(backend)
}

#[cfg(feature = "tesseract")]
fn tesseract_backend(ocr: &OcrConfig) -> anyhow::Result<Arc<dyn OcrBackend>> {
    Ok(Arc::new(tally_ocr::TesseractRecognizer::new(
        None,
        &ocr.language,
    )))
}

#[cfg(not(feature = "tesseract"))]
fn tesseract_backend(_ocr: &OcrConfig) -> anyhow::Result<Arc<dyn OcrBackend>> {
    bail!("this build has no tesseract support; rebuild with --features tesseract")
}

/// Images already sitting in the intake folder, oldest name first.
fn pending_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && tally_ocr::is_image_path(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ValidationError;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::io::Cursor;
    use tally_ocr::{ImageDecodeError, OcrError, ScanError};

    fn tiny_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(4, 4, |_, _| Luma([200u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn ocr(backend: OcrBackendKind) -> OcrConfig {
        OcrConfig { backend, ..OcrConfig::default() }
    }

    #[test]
    fn config_path_prefers_env() {
        let data = Path::new("/data");
        assert_eq!(config_path(data, None), PathBuf::from("/data/tally.toml"));
        assert_eq!(
            config_path(data, Some(PathBuf::from("/etc/tally.toml"))),
            PathBuf::from("/etc/tally.toml")
        );
    }

    #[test]
    fn mock_backend_needs_nothing() {
        let backend = build_backend(&ocr(OcrBackendKind::Mock), None).unwrap();
        assert_eq!(backend.recognize(b"anything").unwrap(), "");
    }

    #[test]
    fn vision_backend_requires_key() {
        assert!(build_backend(&ocr(OcrBackendKind::Vision), None).is_err());
        assert!(build_backend(&ocr(OcrBackendKind::Vision), Some("  ".into())).is_err());
        assert!(build_backend(&ocr(OcrBackendKind::Vision), Some("k".into())).is_ok());
    }

    #[cfg(not(feature = "tesseract"))]
    #[test]
    fn tesseract_backend_unavailable_without_feature() {
        match build_backend(&ocr(OcrBackendKind::Tesseract), None) {
            Err(e) => assert!(e.to_string().contains("tesseract")),
            Ok(_) => panic!("tesseract backend built without the feature"),
        }
    }

    #[cfg(feature = "tesseract")]
    #[test]
    fn tesseract_backend_builds_with_feature() {
        assert!(build_backend(&ocr(OcrBackendKind::Tesseract), None).is_ok());
    }

    #[test]
    fn failures_are_classified() {
        let io = PipelineError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(failure_kind(&io), FailureKind::ClientInput);

        let decode = PipelineError::Scan(ScanError::ImageDecode(ImageDecodeError::UnknownFormat));
        assert_eq!(failure_kind(&decode), FailureKind::ClientInput);

        let invalid = PipelineError::Scan(ScanError::Validation(ValidationError::BlankStoreName));
        assert_eq!(failure_kind(&invalid), FailureKind::ClientInput);

        let ocr = PipelineError::Scan(ScanError::Ocr(OcrError::NotAvailable));
        assert_eq!(failure_kind(&ocr), FailureKind::Upstream);
    }

    #[test]
    fn pending_images_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("a.JPG"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let found = pending_images(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
    }

    #[tokio::test]
    async fn backlog_larger_than_the_queue_is_fully_stored() {
        let dir = tempfile::tempdir().unwrap();
        let intake = dir.path().join("intake");
        std::fs::create_dir(&intake).unwrap();
        let png = tiny_png();
        for i in 0..70 {
            std::fs::write(intake.join(format!("r{i:03}.png")), &png).unwrap();
        }

        let db = tally_storage::create_db(&dir.path().join("receipts.db")).await.unwrap();
        let backend: Arc<dyn OcrBackend> =
            Arc::new(MockRecognizer::new("Store Name: まるや 合計 ¥300"));
        let pipeline = ReceiptPipeline::from_config(backend, &ScanConfig::default()).unwrap();

        let (tx, rx) = mpsc::channel(64);
        let worker = tokio::spawn(run_intake(pipeline, db.clone(), rx, Duration::from_millis(1)));

        let backlog = pending_images(&intake).unwrap();
        assert_eq!(backlog.len(), 70);
        tokio::time::timeout(Duration::from_secs(30), queue_backlog(backlog, tx))
            .await
            .expect("backlog queued without blocking");

        let stored = tokio::time::timeout(Duration::from_secs(30), worker)
            .await
            .expect("intake finished")
            .unwrap();
        assert_eq!(stored, 70);

        let receipts = tally_storage::list_receipts(&db).await.unwrap();
        assert_eq!(receipts.len(), 70);
        assert!(receipts.iter().all(|r| r.store_name == "まるや"));
    }

    #[tokio::test]
    async fn undecodable_file_is_skipped_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let db = tally_storage::create_db(&dir.path().join("receipts.db")).await.unwrap();
        let backend: Arc<dyn OcrBackend> = Arc::new(MockRecognizer::new("合計 ¥1"));
        let pipeline = ReceiptPipeline::from_config(backend, &ScanConfig::default()).unwrap();

        assert!(!process(&pipeline, &db, &path, Duration::from_millis(1)).await);
        assert!(tally_storage::list_receipts(&db).await.unwrap().is_empty());
    }
}
