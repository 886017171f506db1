//! Centralized state machine for workflow state management.
//!
//! This module provides the ONLY place where state transitions happen.
//! The state machine owns the state, validates commands, emits events,
//! persists after every applied command and broadcasts snapshots to
//! subscribers via a watch channel.

mod commands;
mod events;
mod snapshot;

pub use commands::StateCommand;
pub use events::StateEvent;
pub use snapshot::StateSnapshot;

use crate::failure::{
    classify, ClassifiedError, ErrorClassification, FailureSignal,
};
use crate::session_store::{self, SessionSnapshot, SessionStore, StoreError};
use crate::state::{AgentInteraction, ErrorSummary, QaExchange, Step, WorkflowState};
use crate::structured_logger::StructuredLogger;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why a step could not be run or recorded.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("cannot run {requested}: the workflow is at {expected}")]
    SequenceViolation { expected: Step, requested: Step },
    #[error("the workflow is already complete")]
    WorkflowComplete,
    #[error("{0} is mandatory and cannot be skipped")]
    NotOptional(Step),
    #[error("{step} failed: {error}")]
    Failed { step: Step, error: ClassifiedError },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("failed to persist session: {0}")]
    Persistence(#[from] StoreError),
}

impl StepError {
    /// Classification the caller uses to offer retry, skip or abort.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            StepError::Failed { error, .. } => error.classification.clone(),
            StepError::Persistence(err) => classify(&FailureSignal::Uncategorized(err.to_string())),
            other => classify(&FailureSignal::InvalidRequest(other.to_string())),
        }
    }
}

/// Result of a step that let the workflow move on.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub step: Step,
    pub output: String,
    pub next_step: Option<Step>,
    /// Set when an optional step failed and the workflow continued without it.
    pub warning: Option<ClassifiedError>,
}

impl StepOutput {
    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }
}

/// Hard per-step limits enforced by [`WorkflowStateMachine::advance`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepLimits {
    pub default_timeout: Duration,
    pub diagram_timeout: Duration,
    pub export_timeout: Duration,
    pub max_questions: u32,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(900),
            diagram_timeout: Duration::from_secs(600),
            export_timeout: Duration::from_secs(120),
            max_questions: 5,
        }
    }
}

impl StepLimits {
    pub fn timeout_for(&self, step: Step) -> Duration {
        match step {
            Step::DiagramGeneration => self.diagram_timeout,
            Step::Export => self.export_timeout,
            _ => self.default_timeout,
        }
    }
}

/// Decodes a persisted session and returns its state exactly as it was saved.
pub fn resume(persisted: &[u8]) -> Result<WorkflowState, StoreError> {
    Ok(SessionSnapshot::decode(persisted)?.state)
}

/// The ONLY place state transitions happen.
/// Owns the state, validates commands, emits events, broadcasts snapshots.
pub struct WorkflowStateMachine {
    state: WorkflowState,
    snapshot_tx: watch::Sender<StateSnapshot>,
    logger: Arc<StructuredLogger>,
    store: Arc<dyn SessionStore>,
    limits: StepLimits,
    seq: u64,
}

impl WorkflowStateMachine {
    /// Creates a new state machine with the given initial state.
    ///
    /// Returns the state machine and a watch receiver for state snapshots.
    pub fn new(
        initial_state: WorkflowState,
        store: Arc<dyn SessionStore>,
        logger: Arc<StructuredLogger>,
        limits: StepLimits,
    ) -> (Self, watch::Receiver<StateSnapshot>) {
        let snapshot = StateSnapshot::from(&initial_state);
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);

        let machine = Self {
            state: initial_state,
            snapshot_tx,
            logger,
            store,
            limits,
            seq: 0,
        };

        (machine, snapshot_rx)
    }

    /// All mutations go through this single method.
    /// Returns events for logging; persists and broadcasts the snapshot automatically.
    ///
    /// A command either lands in memory and in the store, or in neither: when the
    /// snapshot cannot be saved the prior state is restored and nothing is broadcast.
    pub fn apply(&mut self, command: StateCommand) -> Result<Vec<StateEvent>, StepError> {
        self.seq += 1;

        self.logger.log_command(self.seq, &command);

        let prior = self.state.clone();
        let events = match self.apply_internal(command) {
            Ok(events) => events,
            Err(err) => {
                self.state = prior;
                return Err(err);
            }
        };
        self.state.set_updated_at();

        if let Err(err) = self.save() {
            tracing::error!(
                session_id = %self.state.session_id,
                error = %err,
                "Snapshot not saved; command rolled back"
            );
            self.state = prior;
            return Err(err.into());
        }

        for event in &events {
            self.logger.log_event(self.seq, event);
        }
        self.broadcast_snapshot();

        Ok(events)
    }

    fn apply_internal(&mut self, command: StateCommand) -> Result<Vec<StateEvent>, StepError> {
        use StateCommand::*;
        use StateEvent::*;

        match command {
            CompleteStep {
                step,
                input,
                output,
            } => {
                self.check_current(step)?;
                let mut events = Vec::new();
                if step == Step::Clarification {
                    events.extend(self.close_dialogue());
                }
                if self.state.errors.remove(&step).is_some() {
                    events.push(ErrorCleared { step });
                }
                self.state
                    .record_completion(AgentInteraction::new(step, input, output));
                events.push(StepCompleted {
                    step,
                    next: step.next(),
                });
                events.extend(self.completion_event(step));
                Ok(events)
            }

            FailStep { step, input, error } => {
                self.check_current(step)?;
                self.state.errors.insert(step, ErrorSummary::from(&error));
                let advanced = step.is_optional();
                if advanced {
                    // Degraded completion keeps the completed-step prefix intact.
                    self.state
                        .record_completion(AgentInteraction::degraded(step, input));
                }
                let mut events = vec![StepFailed {
                    step,
                    kind: error.kind(),
                    suggested_action: error.suggested_action(),
                    advanced,
                }];
                if advanced {
                    events.extend(self.completion_event(step));
                }
                Ok(events)
            }

            SkipStep { step } => {
                self.check_current(step)?;
                if !step.is_optional() {
                    return Err(StepError::NotOptional(step));
                }
                let mut events = Vec::new();
                if self.state.errors.remove(&step).is_some() {
                    events.push(ErrorCleared { step });
                }
                self.state
                    .record_completion(AgentInteraction::degraded(step, ""));
                events.push(StepSkipped {
                    step,
                    next: step.next(),
                });
                events.extend(self.completion_event(step));
                Ok(events)
            }

            RecordUserInput { name, value } => {
                self.state.user_inputs.insert(name.clone(), value);
                Ok(vec![UserInputRecorded { name }])
            }

            OpenQuestion { question } => {
                if self.state.current_step != Step::Clarification {
                    return Err(StepError::InvalidCommand(format!(
                        "questions can only be asked during {}, the workflow is at {}",
                        Step::Clarification,
                        self.state.current_step
                    )));
                }
                let max_questions = self.limits.max_questions;
                if let Some(existing) = self.state.qa_session.as_ref() {
                    if !existing.is_open {
                        return Err(StepError::InvalidCommand(
                            "the clarification dialogue is closed".to_string(),
                        ));
                    }
                    if existing.pending().is_some() {
                        return Err(StepError::InvalidCommand(
                            "the previous question has not been answered".to_string(),
                        ));
                    }
                    if existing.questions_asked >= max_questions {
                        return Err(StepError::InvalidCommand(format!(
                            "question limit of {} reached",
                            max_questions
                        )));
                    }
                } else if max_questions == 0 {
                    return Err(StepError::InvalidCommand(
                        "clarifying questions are disabled".to_string(),
                    ));
                }
                let qa = self.state.qa_session.get_or_insert_with(Default::default);
                qa.exchanges.push(QaExchange {
                    question,
                    answer: None,
                    synthesis: None,
                });
                qa.questions_asked += 1;
                Ok(vec![QuestionOpened {
                    number: qa.questions_asked,
                }])
            }

            AnswerQuestion { answer, synthesis } => {
                let qa = self.state.qa_session.as_mut();
                let Some(qa) = qa else {
                    return Err(StepError::InvalidCommand(
                        "no question is waiting for an answer".to_string(),
                    ));
                };
                let number = qa.questions_asked;
                let Some(pending) = qa.pending_mut() else {
                    return Err(StepError::InvalidCommand(
                        "no question is waiting for an answer".to_string(),
                    ));
                };
                pending.answer = Some(answer);
                pending.synthesis = synthesis;
                Ok(vec![QuestionAnswered { number }])
            }

            CloseDialogue => Ok(self.close_dialogue().into_iter().collect()),
        }
    }

    fn check_current(&self, step: Step) -> Result<(), StepError> {
        if self.state.is_finished() {
            return Err(StepError::WorkflowComplete);
        }
        if step != self.state.current_step {
            return Err(StepError::SequenceViolation {
                expected: self.state.current_step,
                requested: step,
            });
        }
        Ok(())
    }

    fn close_dialogue(&mut self) -> Option<StateEvent> {
        let qa = self.state.qa_session.get_or_insert_with(Default::default);
        if !qa.is_open {
            return None;
        }
        qa.is_open = false;
        Some(StateEvent::DialogueClosed {
            questions_asked: qa.questions_asked,
        })
    }

    fn completion_event(&self, step: Step) -> Option<StateEvent> {
        (step == Step::Export).then_some(StateEvent::WorkflowComplete)
    }

    /// Runs `work` for `step` under the step's hard timeout and records the outcome.
    ///
    /// A mandatory step that fails leaves `current_step` unchanged and returns
    /// [`StepError::Failed`]. An optional step that fails is recorded as a degraded
    /// completion and returned as a [`StepOutput`] carrying a warning. If this future is
    /// dropped before `work` finishes, nothing is recorded.
    pub async fn advance<F>(
        &mut self,
        step: Step,
        input: impl Into<String>,
        work: F,
    ) -> Result<StepOutput, StepError>
    where
        F: Future<Output = Result<String, ClassifiedError>>,
    {
        let input = input.into();
        self.check_current(step)?;
        self.logger.log_step_started(step);

        let limit = self.limits.timeout_for(step);
        let outcome = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(ClassifiedError::from_signal(FailureSignal::StepTimeout {
                after: limit,
                optional: step.is_optional(),
            })),
        };

        match outcome {
            Ok(output) => {
                self.apply(StateCommand::CompleteStep {
                    step,
                    input,
                    output: output.clone(),
                })?;
                Ok(StepOutput {
                    step,
                    output,
                    next_step: step.next(),
                    warning: None,
                })
            }
            Err(error) => {
                tracing::warn!(step = %step, kind = %error.kind(), "Step failed: {}", error.detail);
                self.apply(StateCommand::FailStep {
                    step,
                    input,
                    error: error.clone(),
                })?;
                if step.is_optional() {
                    Ok(StepOutput {
                        step,
                        output: String::new(),
                        next_step: step.next(),
                        warning: Some(error),
                    })
                } else {
                    Err(StepError::Failed { step, error })
                }
            }
        }
    }

    /// Skips the current optional step with an empty, degraded result.
    pub fn skip(&mut self, step: Step) -> Result<StepOutput, StepError> {
        self.apply(StateCommand::SkipStep { step })?;
        Ok(StepOutput {
            step,
            output: String::new(),
            next_step: step.next(),
            warning: None,
        })
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn limits(&self) -> &StepLimits {
        &self.limits
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    /// A new receiver for state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Persists the current state to the session store.
    pub fn save(&self) -> Result<(), StoreError> {
        session_store::persist(self.store.as_ref(), &self.state)
    }

    pub fn broadcast_snapshot(&self) {
        let snapshot = StateSnapshot::from(&self.state);
        self.snapshot_tx.send_replace(snapshot);
    }
}
