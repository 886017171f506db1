//! LLM inference collaborator.
//!
//! The endpoint is a black box that returns text or fails. Failures are described by
//! [`ServiceError`] so the retry engine can tell throttling from broken credentials.

mod command;

pub use command::CommandLlmClient;

use crate::failure::{ClassifiedError, Classify, FailureSignal};
use crate::retry::{self, RetryPolicy};
use crate::structured_logger::StructuredLogger;
use async_trait::async_trait;

/// Per-call parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmParams {
    /// Model override; the backend default is used when `None`.
    pub model: Option<String>,
    /// Short label identifying the call in logs.
    pub purpose: String,
}

impl LlmParams {
    pub fn for_purpose(purpose: impl Into<String>) -> Self {
        Self {
            model: None,
            purpose: purpose.into(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("credentials rejected: {0}")]
    Credentials(String),
    #[error("misconfigured: {0}")]
    Misconfigured(String),
    #[error("{0}")]
    Other(String),
}

impl Classify for ServiceError {
    fn signal(&self) -> FailureSignal {
        match self {
            ServiceError::Throttled(d) => FailureSignal::Throttled(d.clone()),
            ServiceError::Unavailable(d) => FailureSignal::ServiceUnavailable(d.clone()),
            ServiceError::Credentials(d) => FailureSignal::InvalidCredentials(d.clone()),
            ServiceError::Misconfigured(d) => FailureSignal::MissingConfiguration(d.clone()),
            ServiceError::Other(d) => FailureSignal::Uncategorized(d.clone()),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, prompt: &str, params: &LlmParams) -> Result<String, ServiceError>;
}

/// Invokes `client` under `policy`, logging every failed attempt.
pub async fn invoke_with_retry(
    client: &dyn LlmClient,
    policy: &RetryPolicy,
    prompt: &str,
    params: &LlmParams,
    logger: Option<&StructuredLogger>,
) -> Result<String, ClassifiedError> {
    retry::execute_with_observer(
        policy,
        move || client.invoke(prompt, params),
        |attempt| {
            tracing::debug!(
                purpose = %params.purpose,
                attempt = attempt.attempt,
                kind = %attempt.classification.kind,
                "LLM call failed"
            );
            if let Some(logger) = logger {
                logger.log_retry_attempt(&format!("llm:{}", params.purpose), attempt);
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests;
