//! Commands that can mutate workflow state.
//!
//! All state changes MUST go through the state machine's `apply()` method.

use crate::failure::ClassifiedError;
use crate::state::Step;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StateCommand {
    // Step outcomes
    /// The step's work succeeded; record its interaction and move on
    CompleteStep {
        step: Step,
        input: String,
        output: String,
    },
    /// The step's work failed after the retry engine gave up
    FailStep {
        step: Step,
        input: String,
        error: ClassifiedError,
    },
    /// Skip an optional step with an empty, degraded result
    SkipStep { step: Step },

    // User input
    RecordUserInput { name: String, value: Value },

    // Clarification dialogue
    /// Ask the user a new question
    OpenQuestion { question: String },
    /// Answer the pending question
    AnswerQuestion {
        answer: String,
        synthesis: Option<String>,
    },
    CloseDialogue,
}
