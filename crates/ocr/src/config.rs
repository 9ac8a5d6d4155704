use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::assemble::ReceiptAssembler;
use crate::extract::Extractor;
use crate::preprocess::{ImagePreprocessor, DEFAULT_MAX_DIMENSION};
use crate::scan::ReceiptParser;
use crate::types::{MissingStorePolicy, StoreMatcher};
use crate::vision::DEFAULT_ENDPOINT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid store-name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Everything the scanning pipeline can be tuned with. Every field has a
/// default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_dimension: u32,
    pub missing_store: MissingStorePolicy,
    pub store_matchers: Vec<StoreMatcher>,
    pub ocr: OcrConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            missing_store: MissingStorePolicy::default(),
            store_matchers: StoreMatcher::defaults(),
            ocr: OcrConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    #[default]
    Vision,
    Tesseract,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackendKind,
    pub timeout_secs: u64,
    pub retry_once: bool,
    /// Tesseract traineddata name.
    pub language: String,
    /// Vision `imageContext.languageHints`.
    pub language_hints: Vec<String>,
    pub endpoint: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackendKind::default(),
            timeout_secs: 30,
            retry_once: true,
            language: "jpn".to_string(),
            language_hints: vec!["ja".to_string()],
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl OcrConfig {
    pub fn call_policy(&self) -> OcrCallPolicy {
        OcrCallPolicy {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry_once: self.retry_once,
        }
    }
}

/// Timeout and retry rules for one OCR call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrCallPolicy {
    pub timeout: Duration,
    pub retry_once: bool,
}

impl Default for OcrCallPolicy {
    fn default() -> Self {
        OcrConfig::default().call_policy()
    }
}

impl ScanConfig {
    /// Parse and check that every store pattern compiles.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ScanConfig = toml::from_str(content)?;
        Extractor::new(&config.store_matchers)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// `load` if the file exists, built-in defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn preprocessor(&self) -> ImagePreprocessor {
        ImagePreprocessor::new(self.max_dimension)
    }

    pub fn build_parser(&self) -> Result<ReceiptParser, ConfigError> {
        Ok(ReceiptParser::new(
            Extractor::new(&self.store_matchers)?,
            ReceiptAssembler::new(self.missing_store),
        ))
    }
}
