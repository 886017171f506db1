//! Diagram generation: output-directory management, tool invocation through the retry
//! engine, and verification of what actually landed on disk.
//!
//! The tool's own answer is advisory. Only image files with a non-zero size found in the
//! output directory after the call count as results.

use crate::failure::{ClassifiedError, FailureSignal};
use crate::mcp::DiagramRenderer;
use crate::retry::{self, RetryPolicy};
use crate::state::{Step, WorkflowState};
use crate::structured_logger::StructuredLogger;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Extensions accepted as diagram images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// First line of a successful diagram step output: `Generated <n> diagram(s) in <dir>`.
const SUMMARY_PREFIX: &str = "Generated ";
const SUMMARY_DIR_MARKER: &str = " diagram(s) in ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagramStatus {
    Success,
    NoFilesProduced,
    Error,
}

impl DiagramStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramStatus::Success => "success",
            DiagramStatus::NoFilesProduced => "no_files_produced",
            DiagramStatus::Error => "error",
        }
    }
}

/// Outcome of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramGenerationResult {
    pub status: DiagramStatus,
    /// Verified files, listed fresh after the call.
    pub diagram_paths: Vec<PathBuf>,
    pub error: Option<ClassifiedError>,
    pub output_directory: PathBuf,
}

impl DiagramGenerationResult {
    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.detail.as_str())
    }

    /// Step-level outcome: a summary of the files on success, otherwise a Degraded error.
    pub fn into_step_outcome(self) -> Result<String, ClassifiedError> {
        match self.status {
            DiagramStatus::Success => {
                let mut summary = format!(
                    "{}{}{}{}",
                    SUMMARY_PREFIX,
                    self.diagram_paths.len(),
                    SUMMARY_DIR_MARKER,
                    self.output_directory.display()
                );
                for path in &self.diagram_paths {
                    summary.push_str(&format!("\n- {}", path.display()));
                }
                Ok(summary)
            }
            DiagramStatus::NoFilesProduced => Err(ClassifiedError::from_signal(
                FailureSignal::NoArtifacts(format!(
                    "the diagram tool reported success but {} contains no images",
                    self.output_directory.display()
                )),
            )),
            DiagramStatus::Error => Err(self
                .error
                .unwrap_or_else(|| {
                    ClassifiedError::from_signal(FailureSignal::ToolUnreachable(
                        "diagram generation failed".to_string(),
                    ))
                })
                .degrade()),
        }
    }
}

/// A sortable, collision-free run directory name: `YYYYMMDD-HHMMSS-xxxxxxxx`.
pub fn new_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{}-{}", timestamp, suffix)
}

/// Creates `dir` if absent and returns its absolute path. Idempotent.
pub fn ensure_output_dir(dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    fs::canonicalize(dir)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image-named files in `dir` and its immediate subdirectories, sorted by path.
///
/// Some renderers write into a subfolder of the directory they are given.
pub fn candidate_images(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_images(dir, 1, &mut files);
    files.sort();
    files
}

fn collect_images(dir: &Path, depth: usize, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            if depth > 0 {
                collect_images(&path, depth - 1, files);
            }
        } else if has_image_extension(&path) {
            files.push(path);
        }
    }
}

/// Candidate images with a non-zero size.
///
/// Recomputed on every call; a missing directory yields an empty list.
pub fn list_valid_diagrams(dir: &Path) -> Vec<PathBuf> {
    candidate_images(dir)
        .into_iter()
        .filter(|path| {
            fs::metadata(path)
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false)
        })
        .collect()
}

/// The run directory recorded by the session's diagram step.
///
/// `None` unless the step completed with generated files; a skipped or degraded step
/// owns no run, whatever older runs are still on disk.
pub fn recorded_run_dir(state: &WorkflowState) -> Option<PathBuf> {
    if !state.is_completed(Step::DiagramGeneration) {
        return None;
    }
    let summary = state.output_of(Step::DiagramGeneration).lines().next()?;
    let (_, dir) = summary
        .strip_prefix(SUMMARY_PREFIX)?
        .split_once(SUMMARY_DIR_MARKER)?;
    Some(PathBuf::from(dir))
}

/// Runs diagram generation against a renderer, with retries and on-disk verification.
pub struct DiagramOrchestrator {
    renderer: Arc<dyn DiagramRenderer>,
    policy: RetryPolicy,
    logger: Option<Arc<StructuredLogger>>,
}

impl DiagramOrchestrator {
    pub fn new(renderer: Arc<dyn DiagramRenderer>, policy: RetryPolicy) -> Self {
        Self {
            renderer,
            policy,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<StructuredLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Generates diagrams for `description` into `output_dir`.
    ///
    /// The directory exists before the renderer is first invoked. Never fails: every
    /// problem is reported through the returned status.
    pub async fn generate(&self, description: &str, output_dir: &Path) -> DiagramGenerationResult {
        let dir = match ensure_output_dir(output_dir) {
            Ok(dir) => dir,
            Err(e) => {
                let error = ClassifiedError::from_signal(FailureSignal::ToolUnreachable(format!(
                    "cannot create output directory {}: {}",
                    output_dir.display(),
                    e
                )));
                return self.finish(DiagramGenerationResult {
                    status: DiagramStatus::Error,
                    diagram_paths: Vec::new(),
                    error: Some(error),
                    output_directory: output_dir.to_path_buf(),
                });
            }
        };

        let renderer: &dyn DiagramRenderer = self.renderer.as_ref();
        let dir_ref = dir.as_path();
        let call = retry::execute_with_observer(
            &self.policy,
            move || renderer.render(description, dir_ref),
            |attempt| {
                if let Some(logger) = &self.logger {
                    logger.log_retry_attempt("diagram_tool", attempt);
                }
            },
        )
        .await;

        let diagram_paths = list_valid_diagrams(&dir);
        let (status, error) = match (call, diagram_paths.is_empty()) {
            (Ok(response), true) => {
                tracing::warn!(response = %response.text, "Diagram tool reported success without files");
                (DiagramStatus::NoFilesProduced, None)
            }
            (Ok(_), false) => (DiagramStatus::Success, None),
            (Err(err), false) => {
                tracing::warn!(error = %err, "Diagram tool failed but left valid files");
                (DiagramStatus::Success, Some(err))
            }
            (Err(err), true) => (DiagramStatus::Error, Some(err)),
        };

        self.finish(DiagramGenerationResult {
            status,
            diagram_paths,
            error,
            output_directory: dir,
        })
    }

    fn finish(&self, result: DiagramGenerationResult) -> DiagramGenerationResult {
        if let Some(logger) = &self.logger {
            logger.log_diagram_verification(
                &result.output_directory,
                result.status.as_str(),
                result.diagram_paths.len(),
            );
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/diagrams_tests.rs"]
mod tests;
