//! Events emitted by the state machine after processing commands.
//!
//! These are for logging and notification purposes only. UI collaborators get
//! updates via the watch channel's StateSnapshot.

use crate::failure::{ErrorKind, SuggestedAction};
use crate::state::Step;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StateEvent {
    StepCompleted { step: Step, next: Option<Step> },
    /// `advanced` is true when an optional step degraded and the workflow moved on
    StepFailed {
        step: Step,
        kind: ErrorKind,
        suggested_action: SuggestedAction,
        advanced: bool,
    },
    StepSkipped { step: Step, next: Option<Step> },
    /// A previously recorded error was cleared by a later success
    ErrorCleared { step: Step },
    UserInputRecorded { name: String },
    QuestionOpened { number: u32 },
    QuestionAnswered { number: u32 },
    DialogueClosed { questions_asked: u32 },
    WorkflowComplete,
}
