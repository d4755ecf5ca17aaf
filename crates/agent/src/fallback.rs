//! Fallback chain over reasoning backends.
//!
//! Tries each entry in order, moving on when a call errors, times out, or
//! comes back empty. An empty response (no text, no tool calls) is never a
//! valid answer, so it is treated like any other transient failure. The
//! error from the last entry is what the caller sees when the whole chain
//! is exhausted.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use taskforge_core::backend::{BackendRequest, BackendResponse, ReasoningBackend};
use taskforge_core::error::BackendError;
use tracing::{info, warn};

/// One link in the chain: a backend, the model to request from it, and how
/// long to wait before giving up on it.
pub struct FallbackEntry {
    pub backend: Arc<dyn ReasoningBackend>,
    pub model: String,
    pub timeout: Duration,
}

pub struct FallbackBackend {
    entries: Vec<FallbackEntry>,
}

impl FallbackBackend {
    pub fn new(entries: Vec<FallbackEntry>) -> Self {
        Self { entries }
    }

    /// Convenience constructor: one backend shared across a primary model
    /// and an ordered list of fallback models.
    pub fn with_models(
        backend: Arc<dyn ReasoningBackend>,
        primary: &str,
        fallbacks: &[String],
        timeout: Duration,
    ) -> Self {
        let mut entries = vec![FallbackEntry {
            backend: backend.clone(),
            model: primary.to_string(),
            timeout,
        }];
        for model in fallbacks {
            entries.push(FallbackEntry {
                backend: backend.clone(),
                model: model.clone(),
                timeout,
            });
        }
        Self::new(entries)
    }
}

#[async_trait]
impl ReasoningBackend for FallbackBackend {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn complete(
        &self,
        request: BackendRequest,
    ) -> std::result::Result<BackendResponse, BackendError> {
        let mut last_error: Option<BackendError> = None;

        for (i, entry) in self.entries.iter().enumerate() {
            let mut attempt = request.clone();
            attempt.model = entry.model.clone();

            match tokio::time::timeout(entry.timeout, entry.backend.complete(attempt)).await {
                Ok(Ok(response)) if response.is_empty() => {
                    warn!(
                        backend = entry.backend.name(),
                        model = %entry.model,
                        "Empty response, trying next entry"
                    );
                    last_error = Some(BackendError::EmptyResponse(format!(
                        "{} returned no content and no tool calls",
                        entry.model
                    )));
                }
                Ok(Ok(response)) => {
                    if i > 0 {
                        info!(model = %entry.model, entry = i, "Fallback entry succeeded");
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!(
                        backend = entry.backend.name(),
                        model = %entry.model,
                        error = %e,
                        "Backend call failed, trying next entry"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        backend = entry.backend.name(),
                        model = %entry.model,
                        timeout_secs = entry.timeout.as_secs(),
                        "Backend call timed out, trying next entry"
                    );
                    last_error = Some(BackendError::Timeout(format!(
                        "{} did not respond within {}s",
                        entry.model,
                        entry.timeout.as_secs()
                    )));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| BackendError::NotConfigured("fallback chain is empty".into())))
    }
}
