use std::sync::Arc;
use std::time::Duration;

use crate::config::OcrCallPolicy;
use crate::recognizer::{OcrBackend, OcrError};

/// Call the OCR backend off the async executor, bounded by the policy's
/// timeout, with at most one retry for transient failures.
///
/// A timed-out attempt is abandoned, not cancelled: the blocking call keeps
/// running on the blocking pool until the backend returns.
pub async fn recognize_guarded<R>(
    backend: Arc<R>,
    image: Arc<[u8]>,
    policy: OcrCallPolicy,
) -> Result<String, OcrError>
where
    R: OcrBackend + ?Sized + 'static,
{
    let max_attempts = if policy.retry_once { 2 } else { 1 };
    let mut attempt = 1;
    loop {
        match attempt_once(backend.clone(), image.clone(), policy.timeout).await {
            Ok(text) => return Ok(text),
            Err(e) if attempt < max_attempts && e.is_transient() => {
                tracing::warn!(attempt, error = %e, "OCR call failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "OCR call failed");
                return Err(e);
            }
        }
    }
}

async fn attempt_once<R>(
    backend: Arc<R>,
    image: Arc<[u8]>,
    timeout: Duration,
) -> Result<String, OcrError>
where
    R: OcrBackend + ?Sized + 'static,
{
    let call = tokio::task::spawn_blocking(move || backend.recognize(&image));
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(OcrError::Engine(format!("OCR task aborted: {join}"))),
        Err(_) => Err(OcrError::Timeout(timeout)),
    }
}
