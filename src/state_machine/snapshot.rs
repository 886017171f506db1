//! Read-only snapshot of workflow state for UI collaborators.
//!
//! Watchers NEVER mutate this; they receive new snapshots via the watch channel.

use crate::state::{Step, WorkflowState};

#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub session_id: String,
    pub current_step: Step,
    pub completed_steps: Vec<Step>,
    /// Steps with a recorded error
    pub failed_steps: Vec<Step>,
    pub dialogue_open: bool,
    pub pending_question: Option<String>,
    pub questions_asked: u32,
    pub finished: bool,
}

impl From<&WorkflowState> for StateSnapshot {
    fn from(state: &WorkflowState) -> Self {
        let qa = state.qa_session.as_ref();
        Self {
            session_id: state.session_id.clone(),
            current_step: state.current_step,
            completed_steps: state.completed_steps.clone(),
            failed_steps: state.errors.keys().copied().collect(),
            dialogue_open: qa.is_some_and(|q| q.is_open),
            pending_question: qa
                .and_then(|q| q.pending())
                .map(|e| e.question.clone()),
            questions_asked: qa.map(|q| q.questions_asked).unwrap_or(0),
            finished: state.is_finished(),
        }
    }
}
