//! LLM provider abstraction.
//!
//! The daemon needs an LLM for exactly two things: session handoff
//! summaries and tool recommendations. Both reduce to "prompt in, text
//! out", so the seam is one trait. Providers that shell out to a CLI or
//! call an API live behind it; the daemon runs fine with none
//! configured — every caller treats [`LlmError::NotConfigured`] as "skip
//! the feature", never as a failure.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from text generation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No provider is configured.
    #[error("no LLM provider configured")]
    NotConfigured,

    /// The provider rejected the request.
    #[error("llm request failed: {0}")]
    RequestFailed(String),

    /// The provider did not answer within the deadline.
    #[error("llm request timed out after {seconds}s")]
    Timeout {
        /// Deadline that elapsed.
        seconds: u64,
    },
}

/// Result type for providers.
pub type LlmResult<T> = Result<T, LlmError>;

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging ("claude", "gemini", ...).
    fn name(&self) -> &str;

    /// Generate text for a prompt, optionally steered by a system
    /// prompt.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] when generation fails or times out.
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> LlmResult<String>;
}

/// The always-available null provider.
///
/// Used when no real provider is configured; every call reports
/// [`LlmError::NotConfigured`] so callers skip LLM-backed features.
#[derive(Debug, Clone, Default)]
pub struct DisabledProvider;

#[async_trait]
impl LlmProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> LlmResult<String> {
        Err(LlmError::NotConfigured)
    }
}

/// Fixed-output provider for tests.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    output: String,
}

impl StaticProvider {
    /// Provider that always answers `output`.
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> LlmResult<String> {
        Ok(self.output.clone())
    }
}
