use crate::failure::{ClassifiedError, ErrorKind, SuggestedAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One stage of the fixed workflow sequence, in canonical order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intake,
    ArchitectureAnalysis,
    Clarification,
    TargetDesign,
    DiagramGeneration,
    CostAnalysis,
    Roadmap,
    Export,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Intake,
        Step::ArchitectureAnalysis,
        Step::Clarification,
        Step::TargetDesign,
        Step::DiagramGeneration,
        Step::CostAnalysis,
        Step::Roadmap,
        Step::Export,
    ];

    pub fn first() -> Step {
        Step::Intake
    }

    /// The step after this one, or `None` for the terminal step.
    pub fn next(self) -> Option<Step> {
        let idx = self.index();
        Step::ALL.get(idx + 1).copied()
    }

    pub fn index(self) -> usize {
        Step::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// Optional steps degrade and continue on failure instead of blocking.
    pub fn is_optional(self) -> bool {
        matches!(self, Step::DiagramGeneration | Step::Export)
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Intake => "Intake",
            Step::ArchitectureAnalysis => "ArchitectureAnalysis",
            Step::Clarification => "Clarification",
            Step::TargetDesign => "TargetDesign",
            Step::DiagramGeneration => "DiagramGeneration",
            Step::CostAnalysis => "CostAnalysis",
            Step::Roadmap => "Roadmap",
            Step::Export => "Export",
        }
    }

    /// Heading used for this step's report section.
    pub fn section_title(self) -> &'static str {
        match self {
            Step::Intake => "Current Environment",
            Step::ArchitectureAnalysis => "Architecture Analysis",
            Step::Clarification => "Clarifications",
            Step::TargetDesign => "Target Architecture",
            Step::DiagramGeneration => "Architecture Diagrams",
            Step::CostAnalysis => "Cost Analysis",
            Step::Roadmap => "Migration Roadmap",
            Step::Export => "Export",
        }
    }

    pub fn parse(name: &str) -> Option<Step> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        Step::ALL
            .iter()
            .copied()
            .find(|s| s.label().to_lowercase() == normalized)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Record of the work performed for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInteraction {
    pub timestamp: DateTime<Utc>,
    pub step: Step,
    pub input: String,
    pub output: String,
    /// Set when the step failed or was skipped and the workflow continued anyway.
    #[serde(default)]
    pub degraded: bool,
}

impl AgentInteraction {
    pub fn new(step: Step, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            step,
            input: input.into(),
            output: output.into(),
            degraded: false,
        }
    }

    pub fn degraded(step: Step, input: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::new(step, input, "")
        }
    }
}

/// Last recorded error for a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
    pub suggested_action: SuggestedAction,
    pub attempts: u32,
    pub occurred_at: DateTime<Utc>,
}

impl From<&ClassifiedError> for ErrorSummary {
    fn from(err: &ClassifiedError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            suggested_action: err.suggested_action(),
            attempts: err.attempts,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaExchange {
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub synthesis: Option<String>,
}

/// The clarification dialogue between the analyst and the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaSession {
    pub exchanges: Vec<QaExchange>,
    pub is_open: bool,
    pub questions_asked: u32,
}

impl Default for QaSession {
    fn default() -> Self {
        Self {
            exchanges: Vec::new(),
            is_open: true,
            questions_asked: 0,
        }
    }
}

impl QaSession {
    /// The last exchange if it is still waiting for an answer.
    pub fn pending(&self) -> Option<&QaExchange> {
        self.exchanges.last().filter(|e| e.answer.is_none())
    }

    pub fn pending_mut(&mut self) -> Option<&mut QaExchange> {
        self.exchanges.last_mut().filter(|e| e.answer.is_none())
    }

    /// Answered exchanges rendered as a running transcript.
    pub fn transcript(&self) -> String {
        self.exchanges
            .iter()
            .filter_map(|e| {
                let answer = e.answer.as_deref()?;
                let mut entry = format!("Q: {}\nA: {}", e.question, answer);
                if let Some(synthesis) = e.synthesis.as_deref().filter(|s| !s.is_empty()) {
                    entry.push_str(&format!("\nSummary: {}", synthesis));
                }
                Some(entry)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Everything one session has produced so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub session_id: String,
    pub current_step: Step,
    #[serde(default)]
    pub completed_steps: Vec<Step>,
    #[serde(default)]
    pub step_outputs: BTreeMap<Step, AgentInteraction>,
    #[serde(default)]
    pub user_inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub errors: BTreeMap<Step, ErrorSummary>,
    #[serde(default)]
    pub qa_session: Option<QaSession>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            current_step: Step::first(),
            completed_steps: Vec::new(),
            step_outputs: BTreeMap::new(),
            user_inputs: BTreeMap::new(),
            errors: BTreeMap::new(),
            qa_session: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self, step: Step) -> bool {
        self.completed_steps.contains(&step)
    }

    /// True once the terminal step has been completed.
    pub fn is_finished(&self) -> bool {
        self.is_completed(Step::Export)
    }

    /// Output text of a step, empty when the step has not completed.
    pub fn output_of(&self, step: Step) -> &str {
        self.step_outputs
            .get(&step)
            .map(|i| i.output.as_str())
            .unwrap_or("")
    }

    /// A captured user input rendered as plain text.
    pub fn input_text(&self, name: &str) -> Option<String> {
        self.user_inputs.get(name).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn set_updated_at(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Marks `step` done and moves `current_step` forward, keeping it on the terminal step.
    pub(crate) fn record_completion(&mut self, interaction: AgentInteraction) {
        let step = interaction.step;
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.step_outputs.insert(step, interaction);
        if let Some(next) = step.next() {
            self.current_step = next;
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
