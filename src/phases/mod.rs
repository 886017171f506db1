//! The work behind each workflow step.
//!
//! A [`PhaseRunner`] turns the state of a session into the output text of one step. It
//! never mutates state: the state machine records whatever the runner returns.

pub mod prompts;

use crate::config::{AppConfig, ReportConfig};
use crate::diagrams::{self, DiagramOrchestrator};
use crate::failure::{ClassifiedError, Classify, FailureSignal};
use crate::llm::{invoke_with_retry, LlmClient, LlmParams};
use crate::mcp::DiagramRenderer;
use crate::paths::StorageLayout;
use crate::report::{self, serializer_for, ExportError, ReportAssembler};
use crate::retry::RetryPolicy;
use crate::state::{Step, WorkflowState};
use crate::structured_logger::StructuredLogger;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A rendered report and the file extension it should be saved with.
#[derive(Debug)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

/// Renders the report for `state` from the diagram run its diagram step recorded.
pub fn render_report(
    config: &ReportConfig,
    layout: &StorageLayout,
    state: &WorkflowState,
) -> Result<RenderedReport, ExportError> {
    let serializer = serializer_for(&config.format)?;
    let candidates = diagrams::recorded_run_dir(state)
        .map(|dir| diagrams::candidate_images(&dir))
        .unwrap_or_default();
    let bytes = ReportAssembler::from_config(config).export(state, &candidates, serializer.as_ref())?;
    Ok(RenderedReport {
        bytes,
        extension: serializer.file_extension(),
    })
}

/// Writes `bytes` to `path`, creating parent directories.
fn write_export(path: &Path, bytes: &[u8]) -> Result<(), ClassifiedError> {
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::write(path, bytes));
    result.map_err(|e| {
        ClassifiedError::from_signal(FailureSignal::Uncategorized(format!(
            "failed to write {}: {}",
            path.display(),
            e
        )))
    })
}

pub struct PhaseRunner {
    llm: Arc<dyn LlmClient>,
    renderer: Arc<dyn DiagramRenderer>,
    policy: RetryPolicy,
    model: Option<String>,
    report: ReportConfig,
    layout: StorageLayout,
}

impl PhaseRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        renderer: Arc<dyn DiagramRenderer>,
        policy: RetryPolicy,
        layout: StorageLayout,
    ) -> Self {
        Self {
            llm,
            renderer,
            policy,
            model: None,
            report: ReportConfig::default(),
            layout,
        }
    }

    /// Runner wired to the configured collaborators.
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        renderer: Arc<dyn DiagramRenderer>,
        layout: StorageLayout,
    ) -> Result<Self, ClassifiedError> {
        let policy = config
            .retry_policy()
            .map_err(|e| ClassifiedError::from_signal(e.signal()))?;
        Ok(Self {
            model: config.llm.model.clone(),
            report: config.report.clone(),
            ..Self::new(llm, renderer, policy, layout)
        })
    }

    pub fn report_config(&self) -> &ReportConfig {
        &self.report
    }

    /// Text recorded as the input of `step`.
    pub fn input_for(&self, step: Step, state: &WorkflowState) -> String {
        match step {
            Step::Intake | Step::ArchitectureAnalysis => state
                .input_text(prompts::DESCRIPTION_INPUT)
                .unwrap_or_default(),
            Step::Clarification => state
                .qa_session
                .as_ref()
                .map(|qa| format!("{} question(s) asked", qa.questions_asked))
                .unwrap_or_default(),
            Step::TargetDesign | Step::DiagramGeneration => {
                state.output_of(Step::ArchitectureAnalysis).to_string()
            }
            Step::CostAnalysis | Step::Roadmap => state.output_of(Step::TargetDesign).to_string(),
            Step::Export => self.report.format.clone(),
        }
    }

    async fn ask(
        &self,
        purpose: &str,
        prompt: String,
        logger: &StructuredLogger,
    ) -> Result<String, ClassifiedError> {
        let params = LlmParams::for_purpose(purpose).with_model(self.model.clone());
        invoke_with_retry(self.llm.as_ref(), &self.policy, &prompt, &params, Some(logger)).await
    }

    /// Produces the output of `step` from `state`.
    pub async fn run(
        &self,
        step: Step,
        state: &WorkflowState,
        logger: &Arc<StructuredLogger>,
    ) -> Result<String, ClassifiedError> {
        match step {
            Step::Intake => self.intake(state),
            Step::ArchitectureAnalysis => {
                self.ask("analysis", prompts::architecture_analysis(state), logger)
                    .await
            }
            Step::Clarification => Ok(clarification_summary(state)),
            Step::TargetDesign => {
                self.ask("target_design", prompts::target_design(state), logger)
                    .await
            }
            Step::DiagramGeneration => self.diagrams(state, logger).await,
            Step::CostAnalysis => {
                self.ask("cost_analysis", prompts::cost_analysis(state), logger)
                    .await
            }
            Step::Roadmap => self.ask("roadmap", prompts::roadmap(state), logger).await,
            Step::Export => self.export(state, logger).await,
        }
    }

    fn intake(&self, state: &WorkflowState) -> Result<String, ClassifiedError> {
        match state.input_text(prompts::DESCRIPTION_INPUT) {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => Err(ClassifiedError::from_signal(FailureSignal::InvalidRequest(
                "no architecture description was provided".to_string(),
            ))),
        }
    }

    /// Asks the analyst for the next clarifying question. `None` means it has enough.
    pub async fn next_question(
        &self,
        state: &WorkflowState,
        logger: &StructuredLogger,
    ) -> Result<Option<String>, ClassifiedError> {
        let reply = self
            .ask("clarifying_question", prompts::clarifying_question(state), logger)
            .await?;
        let question = reply.trim();
        if question.is_empty() || question.contains(prompts::NO_MORE_QUESTIONS) {
            Ok(None)
        } else {
            Ok(Some(question.to_string()))
        }
    }

    /// One-line takeaway of an answer.
    pub async fn synthesize(
        &self,
        state: &WorkflowState,
        question: &str,
        answer: &str,
        logger: &StructuredLogger,
    ) -> Result<String, ClassifiedError> {
        self.ask(
            "synthesis",
            prompts::answer_synthesis(state, question, answer),
            logger,
        )
        .await
    }

    async fn diagrams(
        &self,
        state: &WorkflowState,
        logger: &Arc<StructuredLogger>,
    ) -> Result<String, ClassifiedError> {
        let code = self
            .ask("diagram_code", prompts::diagram_code(state), logger)
            .await
            .map_err(ClassifiedError::degrade)?;
        let output_dir = self
            .layout
            .diagrams_dir(&state.session_id)
            .join(diagrams::new_run_id());
        DiagramOrchestrator::new(self.renderer.clone(), self.policy.clone())
            .with_logger(logger.clone())
            .generate(prompts::strip_code_fence(&code), &output_dir)
            .await
            .into_step_outcome()
    }

    /// Writes the report to the exports directory. When rendering fails the structured
    /// data is written instead and the failure still surfaces.
    async fn export(
        &self,
        state: &WorkflowState,
        logger: &StructuredLogger,
    ) -> Result<String, ClassifiedError> {
        let config = self.report.clone();
        let layout = self.layout.clone();
        let snapshot = state.clone();
        let rendered =
            tokio::task::spawn_blocking(move || render_report(&config, &layout, &snapshot))
                .await
                .map_err(|e| {
                    ClassifiedError::from_signal(FailureSignal::Uncategorized(e.to_string()))
                })?;

        let exports = self.layout.exports_dir();
        match rendered {
            Ok(report) => {
                let path = exports.join(format!("{}-report.{}", state.session_id, report.extension));
                write_export(&path, &report.bytes)?;
                logger.log_export(&self.report.format, true, &path.display().to_string());
                Ok(format!("Report written to {}", path.display()))
            }
            Err(err) => {
                let mut error = ClassifiedError::from_signal(err.signal());
                logger.log_export(&self.report.format, false, &error.detail);
                let fallback = self.export_fallback(state, &exports);
                if let Some(path) = fallback {
                    error.detail = format!(
                        "{}; structured data written to {}",
                        error.detail,
                        path.display()
                    );
                }
                Err(error)
            }
        }
    }

    fn export_fallback(&self, state: &WorkflowState, exports: &Path) -> Option<PathBuf> {
        let path = exports.join(format!("{}-data.json", state.session_id));
        let written = report::export_structured_data(state)
            .map_err(|e| ClassifiedError::from_signal(e.signal()))
            .and_then(|bytes| write_export(&path, &bytes));
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Structured data fallback could not be written");
                None
            }
        }
    }
}

/// Clarification output: every answered exchange, or a note that none were needed.
fn clarification_summary(state: &WorkflowState) -> String {
    let transcript = state
        .qa_session
        .as_ref()
        .map(|qa| qa.transcript())
        .unwrap_or_default();
    if transcript.is_empty() {
        "No clarifications were needed.".to_string()
    } else {
        transcript
    }
}

#[cfg(test)]
mod tests;
