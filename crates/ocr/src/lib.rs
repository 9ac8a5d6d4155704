//! Receipt scanning: image preprocessing, OCR collaborators, and the
//! normalize → extract → assemble text pipeline.

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static ::regex::Regex {
            static R: ::std::sync::OnceLock<::regex::Regex> = ::std::sync::OnceLock::new();
            R.get_or_init(|| ::regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}

pub mod assemble;
pub mod config;
pub mod extract;
pub mod guard;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod scan;
pub mod types;
pub mod vision;

pub use assemble::ReceiptAssembler;
pub use config::{ConfigError, OcrBackendKind, OcrCallPolicy, OcrConfig, ScanConfig};
pub use extract::Extractor;
pub use guard::recognize_guarded;
pub use normalize::normalize;
pub use pipeline::{
    is_image_path, spawn_intake_watcher, wait_until_written, PipelineError, ReceiptPipeline,
    ScanResult,
};
pub use preprocess::{ImageDecodeError, ImagePreprocessor, DEFAULT_MAX_DIMENSION};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError};
#[cfg(feature = "tesseract")]
pub use recognizer::TesseractRecognizer;
pub use scan::{FailureKind, ReceiptParser, ReceiptScanner, ScanError};
pub use types::{ExtractedFields, MatcherKind, MissingStorePolicy, StoreMatcher};
pub use vision::VisionRecognizer;
