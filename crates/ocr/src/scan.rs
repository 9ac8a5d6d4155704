use tally_core::{Receipt, ValidationError};
use thiserror::Error;

use crate::assemble::ReceiptAssembler;
use crate::extract::Extractor;
use crate::normalize::normalize;
use crate::preprocess::{ImageDecodeError, ImagePreprocessor};
use crate::recognizer::{OcrBackend, OcrError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    ImageDecode(#[from] ImageDecodeError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Who a failed scan should be blamed on when reported to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unreadable image or unusable content: a bad request.
    ClientInput,
    /// The OCR collaborator failed.
    Upstream,
}

impl ScanError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::ImageDecode(_) | ScanError::Validation(_) => FailureKind::ClientInput,
            ScanError::Ocr(_) => FailureKind::Upstream,
        }
    }
}

/// Raw OCR text → normalized text → field map → [`Receipt`].
#[derive(Debug, Default)]
pub struct ReceiptParser {
    extractor: Extractor,
    assembler: ReceiptAssembler,
}

impl ReceiptParser {
    pub fn new(extractor: Extractor, assembler: ReceiptAssembler) -> Self {
        Self { extractor, assembler }
    }

    pub fn parse(&self, raw_text: &str) -> Result<Receipt, ValidationError> {
        let text = normalize(raw_text);
        tracing::debug!(chars = text.chars().count(), "normalized OCR text");
        self.assembler.assemble(self.extractor.extract(&text))
    }
}

/// Synchronous scan of one image with an injected OCR backend.
///
/// Any failure is final for the request; nothing here retries.
pub struct ReceiptScanner<R: OcrBackend> {
    recognizer: R,
    preprocessor: ImagePreprocessor,
    parser: ReceiptParser,
}

impl<R: OcrBackend> ReceiptScanner<R> {
    pub fn new(recognizer: R, preprocessor: ImagePreprocessor, parser: ReceiptParser) -> Self {
        Self { recognizer, preprocessor, parser }
    }

    pub fn process_receipt_image(&self, raw: &[u8]) -> Result<Receipt, ScanError> {
        tracing::debug!(bytes = raw.len(), "scanning receipt image");
        let image = self.preprocessor.resize(raw)?;
        let text = self.recognizer.recognize(&image)?;
        Ok(self.parser.parse(&text)?)
    }
}
