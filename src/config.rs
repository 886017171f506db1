use crate::failure::{Classify, FailureSignal};
use crate::paths::StorageLayout;
use crate::retry::{PolicyError, RetryPolicy};
use crate::state_machine::StepLimits;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Minimum hard timeout for the diagram step, whatever the collaborator budgets add up to.
const MIN_DIAGRAM_STEP_TIMEOUT: Duration = Duration::from_secs(180);

/// Why a loaded configuration cannot be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid retry settings: {0}")]
    Retry(#[from] PolicyError),
    #[error("{section}.{field} must not be empty")]
    Empty {
        section: &'static str,
        field: &'static str,
    },
    #[error("{section}.{field} must be greater than zero")]
    Zero {
        section: &'static str,
        field: &'static str,
    },
    #[error("report box must have positive finite dimensions, got {width}x{height}")]
    InvalidBox { width: f64, height: f64 },
}

impl Classify for ConfigError {
    fn signal(&self) -> FailureSignal {
        FailureSignal::MissingConfiguration(self.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retry: RetryConfig,
    pub llm: LlmConfig,
    pub diagrams: DiagramsConfig,
    pub report: ReportConfig,
    pub clarification: ClarificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

/// Command-line LLM backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub model: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            timeout_secs: 300,
            model: None,
        }
    }
}

/// Diagram tool server, spawned per call and spoken to over stdio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagramsConfig {
    pub server_command: String,
    pub server_args: Vec<String>,
    pub tool_name: String,
    pub timeout_secs: u64,
    pub env: BTreeMap<String, String>,
}

impl Default for DiagramsConfig {
    fn default() -> Self {
        Self {
            server_command: "uvx".to_string(),
            server_args: vec!["awslabs.aws-diagram-mcp-server".to_string()],
            tool_name: "generate_diagram".to_string(),
            timeout_secs: 180,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Serializer name, `html` or `markdown`.
    pub format: String,
    pub timeout_secs: u64,
    pub max_diagrams: usize,
    /// Content box in inches.
    pub box_width: f64,
    pub box_height: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: "html".to_string(),
            timeout_secs: 120,
            max_diagrams: 4,
            box_width: 6.0,
            box_height: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    pub max_questions: u32,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self { max_questions: 5 }
    }
}

impl AppConfig {
    /// Loads configuration: `explicit` if given, else `<home>/config.yaml` if present,
    /// else the built-in defaults.
    pub fn load(explicit: Option<&Path>, layout: &StorageLayout) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = layout.config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file deserializes to null rather than an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy()?;
        if self.llm.command.trim().is_empty() {
            return Err(ConfigError::Empty {
                section: "llm",
                field: "command",
            });
        }
        if self.diagrams.server_command.trim().is_empty() {
            return Err(ConfigError::Empty {
                section: "diagrams",
                field: "server_command",
            });
        }
        if self.diagrams.tool_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                section: "diagrams",
                field: "tool_name",
            });
        }
        let zero_checks = [
            ("llm", "timeout_secs", self.llm.timeout_secs),
            ("diagrams", "timeout_secs", self.diagrams.timeout_secs),
            ("report", "timeout_secs", self.report.timeout_secs),
        ];
        for (section, field, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::Zero { section, field });
            }
        }
        let (width, height) = (self.report.box_width, self.report.box_height);
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(ConfigError::InvalidBox { width, height });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
            self.retry.backoff_multiplier,
            Duration::from_millis(self.retry.max_delay_ms),
        )?)
    }

    /// Hard per-step timeouts derived from the collaborator timeouts and the retry budget.
    ///
    /// Analysis steps get every LLM attempt plus the backoff between them. The diagram step
    /// also asks the LLM for diagram code before calling the tool, so it gets both budgets.
    pub fn step_limits(&self) -> Result<StepLimits, ConfigError> {
        let policy = self.retry_policy()?;
        let llm = retry_budget(&policy, Duration::from_secs(self.llm.timeout_secs));
        let tool = retry_budget(&policy, Duration::from_secs(self.diagrams.timeout_secs));
        Ok(StepLimits {
            default_timeout: llm,
            diagram_timeout: llm.saturating_add(tool).max(MIN_DIAGRAM_STEP_TIMEOUT),
            export_timeout: Duration::from_secs(self.report.timeout_secs),
            max_questions: self.clarification.max_questions,
        })
    }
}

/// Worst-case time spent by `max_attempts` calls of `per_call` with backoff in between.
fn retry_budget(policy: &RetryPolicy, per_call: Duration) -> Duration {
    let calls = per_call.saturating_mul(policy.max_attempts());
    policy
        .delays()
        .into_iter()
        .fold(calls, |total, delay| total.saturating_add(delay))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
