//! Report assembly.
//!
//! Builds a multi-section document from a session's state plus whatever diagram files
//! exist at assembly time, then hands it to a [`DocumentSerializer`]. A single bad
//! diagram becomes a placeholder note; it never aborts the document.

pub mod layout;
pub mod serializer;

pub use layout::{ContentBox, DisplaySize};
pub use serializer::{
    serializer_for, DocumentSerializer, HtmlSerializer, MarkdownSerializer, SerializeError,
};

use crate::config::ReportConfig;
use crate::failure::{Classify, FailureSignal};
use crate::state::{Step, WorkflowState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const REPORT_TITLE: &str = "Architecture Assessment Report";

/// Most recommendations lifted into the summary block.
const MAX_RECOMMENDATIONS: usize = 10;

/// Version tag of the structured data export.
pub const STRUCTURED_EXPORT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("failed to encode session data: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Classify for ExportError {
    fn signal(&self) -> FailureSignal {
        match self {
            ExportError::Serialize(SerializeError::Unavailable(detail)) => {
                FailureSignal::SerializerUnavailable(detail.clone())
            }
            other => FailureSignal::Uncategorized(other.to_string()),
        }
    }
}

/// One section per completed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub step: Step,
    pub title: String,
    pub body: String,
    /// Shown when the step degraded or left an error behind.
    pub note: Option<String>,
}

impl ReportSection {
    pub fn anchor(&self) -> String {
        self.title.to_lowercase().replace(' ', "-")
    }

    /// Diagrams are rendered inside the diagram step's section.
    pub fn is_artifact_section(&self) -> bool {
        self.step == Step::DiagramGeneration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedDiagram {
    pub path: PathBuf,
    pub name: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub display: DisplaySize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactPlaceholder {
    pub path: PathBuf,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    Embedded(EmbeddedDiagram),
    Placeholder(ArtifactPlaceholder),
}

/// A serializer-neutral report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub recommendations: Vec<String>,
    pub sections: Vec<ReportSection>,
    pub artifacts: Vec<Artifact>,
}

impl ReportDocument {
    pub fn table_of_contents(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }

    pub fn section(&self, step: Step) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.step == step)
    }

    pub fn embedded(&self) -> impl Iterator<Item = &EmbeddedDiagram> {
        self.artifacts.iter().filter_map(|a| match a {
            Artifact::Embedded(d) => Some(d),
            Artifact::Placeholder(_) => None,
        })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &ArtifactPlaceholder> {
        self.artifacts.iter().filter_map(|a| match a {
            Artifact::Placeholder(p) => Some(p),
            Artifact::Embedded(_) => None,
        })
    }
}

pub struct ReportAssembler {
    max_diagrams: usize,
    content_box: ContentBox,
}

impl Default for ReportAssembler {
    fn default() -> Self {
        Self::new(4, ContentBox::default())
    }
}

impl ReportAssembler {
    pub fn new(max_diagrams: usize, content_box: ContentBox) -> Self {
        Self {
            max_diagrams,
            content_box,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(
            config.max_diagrams,
            ContentBox {
                max_width: config.box_width,
                max_height: config.box_height,
            },
        )
    }

    /// Builds the document. Steps that never completed get no section; diagrams are only
    /// considered once the diagram step is behind the session.
    ///
    /// Export never gets a section, even once completed: the document is what that step
    /// produces, so the sections are the completed steps other than Export. Re-exporting a
    /// finished session yields the same sections as the export the workflow ran.
    pub fn assemble(&self, state: &WorkflowState, candidates: &[PathBuf]) -> ReportDocument {
        let sections: Vec<ReportSection> = Step::ALL
            .iter()
            .copied()
            .filter(|step| *step != Step::Export && state.is_completed(*step))
            .map(|step| section_for(state, step))
            .collect();

        let artifacts = if state.is_completed(Step::DiagramGeneration) {
            candidates
                .iter()
                .take(self.max_diagrams)
                .map(|path| self.prepare_artifact(path))
                .collect()
        } else {
            Vec::new()
        };

        ReportDocument {
            title: REPORT_TITLE.to_string(),
            session_id: state.session_id.clone(),
            generated_at: Utc::now(),
            recommendations: recommendations(state),
            sections,
            artifacts,
        }
    }

    /// Assembles and serializes. Only a serializer failure fails the export.
    pub fn export(
        &self,
        state: &WorkflowState,
        candidates: &[PathBuf],
        serializer: &dyn DocumentSerializer,
    ) -> Result<Vec<u8>, ExportError> {
        let document = self.assemble(state, candidates);
        let placeholders = document.placeholders().count();
        if placeholders > 0 {
            tracing::warn!(placeholders, "Some diagrams were replaced by placeholders");
        }
        Ok(serializer.serialize(&document)?)
    }

    fn prepare_artifact(&self, path: &Path) -> Artifact {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match self.measure(path) {
            Ok((pixel_width, pixel_height, display)) => Artifact::Embedded(EmbeddedDiagram {
                path: path.to_path_buf(),
                name,
                pixel_width,
                pixel_height,
                display,
            }),
            Err(reason) => {
                tracing::debug!(path = %path.display(), %reason, "Diagram replaced by placeholder");
                Artifact::Placeholder(ArtifactPlaceholder {
                    path: path.to_path_buf(),
                    name,
                    reason,
                })
            }
        }
    }

    fn measure(&self, path: &Path) -> Result<(u32, u32, DisplaySize), String> {
        let metadata = std::fs::metadata(path).map_err(|_| "file is missing".to_string())?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err("file is empty".to_string());
        }
        let (width, height) =
            image::image_dimensions(path).map_err(|e| format!("unreadable image: {}", e))?;
        let display = self
            .content_box
            .fit(width, height)
            .ok_or_else(|| format!("image has no usable size ({}x{})", width, height))?;
        Ok((width, height, display))
    }
}

fn section_for(state: &WorkflowState, step: Step) -> ReportSection {
    let body = state.output_of(step).to_string();
    let degraded = state
        .step_outputs
        .get(&step)
        .map(|i| i.degraded)
        .unwrap_or(false);
    let note = match state.errors.get(&step) {
        Some(error) => Some(format!("This step did not complete: {}", error.message)),
        None if degraded => Some("This step was skipped.".to_string()),
        None => None,
    };
    ReportSection {
        step,
        title: step.section_title().to_string(),
        body,
        note,
    }
}

/// Bullet points of the roadmap, or of the latest completed step with output.
fn recommendations(state: &WorkflowState) -> Vec<String> {
    let source = std::iter::once(Step::Roadmap)
        .chain(state.completed_steps.iter().rev().copied())
        .map(|step| state.output_of(step).trim())
        .find(|text| !text.is_empty());
    let Some(text) = source else {
        return Vec::new();
    };

    let bullets: Vec<String> = text
        .lines()
        .filter_map(strip_list_marker)
        .filter(|item| !item.is_empty())
        .take(MAX_RECOMMENDATIONS)
        .map(str::to_string)
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }
    text.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(|p| vec![p.to_string()])
        .unwrap_or_default()
}

fn strip_list_marker(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line.get(digits..)
        .and_then(|rest| rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")))
        .map(str::trim)
}

#[derive(Serialize)]
struct StructuredExport<'a> {
    format_version: u32,
    exported_at: DateTime<Utc>,
    state: &'a WorkflowState,
}

/// JSON dump of the whole session. Needs no document backend, so it stays available when
/// report export fails.
pub fn export_structured_data(state: &WorkflowState) -> Result<Vec<u8>, ExportError> {
    let export = StructuredExport {
        format_version: STRUCTURED_EXPORT_VERSION,
        exported_at: Utc::now(),
        state,
    };
    Ok(serde_json::to_vec_pretty(&export)?)
}
