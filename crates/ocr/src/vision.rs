//! Google Cloud Vision `images:annotate` backend.

use base64::Engine;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;

use crate::recognizer::{OcrBackend, OcrError};

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Document text detection over REST, authenticated with an API key.
///
/// Uses a blocking HTTP client, so call it from a blocking context
/// (`recognize_guarded` does).
pub struct VisionRecognizer {
    endpoint: String,
    api_key: String,
    language_hints: Vec<String>,
    timeout: Duration,
    // Built on first use so construction inside an async runtime is safe.
    client: OnceLock<Client>,
}

impl VisionRecognizer {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            language_hints: Vec::new(),
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_language_hints(mut self, hints: Vec<String>) -> Self {
        self.language_hints = hints;
        self
    }

    fn client(&self) -> Result<&Client, OcrError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| OcrError::Http(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn request_body(&self, image_bytes: &[u8]) -> serde_json::Value {
        let mut request = json!({
            "image": { "content": base64::engine::general_purpose::STANDARD.encode(image_bytes) },
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
        });
        if !self.language_hints.is_empty() {
            request["imageContext"] = json!({ "languageHints": self.language_hints });
        }
        json!({ "requests": [request] })
    }
}

impl OcrBackend for VisionRecognizer {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        let response = self
            .client()?
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(image_bytes))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout(self.timeout)
                } else {
                    OcrError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| OcrError::Http(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(if status.is_server_error() {
                OcrError::Http(message)
            } else {
                OcrError::Api(message)
            });
        }

        parse_annotate_response(&body)
    }
}

// ── Response shape (only the fields we read) ──────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Status,
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error.message)
}

/// Full-page text if present, else the first text annotation, else empty.
/// A receipt with no readable text is not an OCR failure.
fn parse_annotate_response(body: &str) -> Result<String, OcrError> {
    let parsed: AnnotateResponse = serde_json::from_str(body)
        .map_err(|e| OcrError::Api(format!("unexpected response: {e}")))?;

    let Some(first) = parsed.responses.into_iter().next() else {
        return Ok(String::new());
    };
    if let Some(status) = first.error {
        return Err(OcrError::Api(status.message));
    }
    if let Some(full) = first.full_text_annotation {
        return Ok(full.text);
    }
    let text = first
        .text_annotations
        .into_iter()
        .next()
        .map(|a| a.description)
        .unwrap_or_default();
    if text.is_empty() {
        tracing::debug!("no text found in image");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_annotation_preferred() {
        let body = r#"{"responses":[{
            "textAnnotations":[{"description":"first block"}],
            "fullTextAnnotation":{"text":"合計 ¥1,200\n2024年12月07日\n"}
        }]}"#;
        assert_eq!(parse_annotate_response(body).unwrap(), "合計 ¥1,200\n2024年12月07日\n");
    }

    #[test]
    fn falls_back_to_first_text_annotation() {
        let body = r#"{"responses":[{"textAnnotations":[{"description":"a"},{"description":"b"}]}]}"#;
        assert_eq!(parse_annotate_response(body).unwrap(), "a");
    }

    #[test]
    fn no_text_is_empty_string() {
        assert_eq!(parse_annotate_response(r#"{"responses":[{}]}"#).unwrap(), "");
        assert_eq!(parse_annotate_response(r#"{}"#).unwrap(), "");
    }

    #[test]
    fn per_image_error_is_api_error() {
        let body = r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#;
        let err = parse_annotate_response(body).unwrap_err();
        assert!(matches!(err, OcrError::Api(m) if m == "Bad image data."));
    }

    #[test]
    fn malformed_body_is_api_error() {
        assert!(matches!(parse_annotate_response("<html>"), Err(OcrError::Api(_))));
    }

    #[test]
    fn error_body_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body).as_deref(), Some("API key not valid."));
        assert_eq!(error_message("oops"), None);
    }

    #[test]
    fn request_body_shape() {
        let r = VisionRecognizer::new("k", Duration::from_secs(1))
            .with_language_hints(vec!["ja".into()]);
        let body = r.request_body(b"abc");
        assert_eq!(body["requests"][0]["image"]["content"], "YWJj");
        assert_eq!(body["requests"][0]["features"][0]["type"], "DOCUMENT_TEXT_DETECTION");
        assert_eq!(body["requests"][0]["imageContext"]["languageHints"][0], "ja");

        let bare = VisionRecognizer::new("k", Duration::from_secs(1)).request_body(b"abc");
        assert!(bare["requests"][0].get("imageContext").is_none());
    }
}
