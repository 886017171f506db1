use super::{LlmClient, LlmParams, ServiceError};
use crate::config::LlmConfig;
use crate::failure::{is_credential_error, is_transient_error};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs a command-line LLM client: the prompt goes to stdin, the answer comes from stdout.
pub struct CommandLlmClient {
    config: LlmConfig,
}

impl CommandLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn build_args(&self, params: &LlmParams) -> Vec<String> {
        let mut args = self.config.args.clone();
        if let Some(model) = params.model.as_ref().or(self.config.model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

/// Maps the text of a failed run to a service error.
fn failure_from_output(status: &str, text: &str) -> ServiceError {
    let detail = if text.trim().is_empty() {
        format!("exited with {}", status)
    } else {
        format!("exited with {}: {}", status, text.trim())
    };
    if is_credential_error(text) {
        ServiceError::Credentials(detail)
    } else if is_transient_error(text) {
        let lower = text.to_lowercase();
        if ["throttl", "rate limit", "rate exceeded", "429"]
            .iter()
            .any(|p| lower.contains(p))
        {
            ServiceError::Throttled(detail)
        } else {
            ServiceError::Unavailable(detail)
        }
    } else {
        ServiceError::Other(detail)
    }
}

#[async_trait]
impl LlmClient for CommandLlmClient {
    async fn invoke(&self, prompt: &str, params: &LlmParams) -> Result<String, ServiceError> {
        let program = which::which(&self.config.command).map_err(|e| {
            ServiceError::Misconfigured(format!(
                "LLM command '{}' not found: {}",
                self.config.command, e
            ))
        })?;

        let mut child = Command::new(program)
            .args(self.build_args(params))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServiceError::Misconfigured(format!(
                    "failed to start '{}': {}",
                    self.config.command, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // Written concurrently so a large prompt cannot deadlock against a full stdout pipe.
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(error = %e, "LLM command closed stdin early");
                }
            });
        }

        let timeout = self.timeout();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ServiceError::Unavailable(e.to_string()))?,
            Err(_) => {
                return Err(ServiceError::Unavailable(format!(
                    "no answer within {}s",
                    timeout.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = format!("{}\n{}", stderr.trim(), stdout.trim());
            return Err(failure_from_output(&output.status.to_string(), &text));
        }

        let answer = stdout.trim().to_string();
        if answer.is_empty() {
            return Err(ServiceError::Unavailable(
                "the LLM returned an empty response".to_string(),
            ));
        }
        tracing::debug!(purpose = %params.purpose, chars = answer.len(), "LLM call succeeded");
        Ok(answer)
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
