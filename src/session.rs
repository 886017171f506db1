//! Session-keyed access to workflow state machines.
//!
//! Each open session owns one [`WorkflowStateMachine`] behind its own async mutex, so a
//! session's steps run strictly one after another while distinct sessions never wait on
//! each other. Opening a session takes its advisory lock, which keeps a second process
//! from driving the same session.

use crate::diagrams;
use crate::failure::{classify, Classify, ErrorClassification, FailureSignal};
use crate::paths::{validate_session_id, StorageLayout};
use crate::phases::{prompts, render_report, PhaseRunner, RenderedReport};
use crate::report::{self, ExportError};
use crate::session_store::{load_snapshot, SessionLock, SessionStore, SessionSummary, StoreError};
use crate::state::{Step, WorkflowState};
use crate::state_machine::{
    StateCommand, StateSnapshot, StepError, StepLimits, StepOutput, WorkflowStateMachine,
};
use crate::structured_logger::StructuredLogger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidId(String),
    #[error("no session named {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("session {0} is busy running a step")]
    Busy(String),
    #[error("cannot open event log: {0}")]
    Log(String),
    #[error("{0}")]
    Internal(String),
}

impl SessionError {
    /// Classification the caller uses to offer retry, skip or abort.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            SessionError::Step(err) => err.classification(),
            SessionError::Export(err) => classify(&err.signal()),
            SessionError::Store(StoreError::Locked(_)) => {
                classify(&FailureSignal::InvalidRequest(self.to_string()))
            }
            SessionError::InvalidId(_) | SessionError::NotFound(_) | SessionError::Busy(_) => {
                classify(&FailureSignal::InvalidRequest(self.to_string()))
            }
            other => classify(&FailureSignal::Uncategorized(other.to_string())),
        }
    }
}

/// Result of opening a session.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedSession {
    pub snapshot: StateSnapshot,
    /// True when persisted state was found and restored.
    pub resumed: bool,
}

/// What one call to [`SessionManager::advance`] achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// The current step finished (possibly degraded) and the workflow moved on.
    Advanced(StepOutput),
    /// The clarification dialogue is waiting for the user's answer.
    AwaitingAnswer { question: String },
}

/// Everything a [`SessionManager::run`] call did before it stopped.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outputs: Vec<StepOutput>,
    pub awaiting_answer: Option<String>,
    pub finished: bool,
    pub failure: Option<StepError>,
}

struct OpenSession {
    machine: Arc<tokio::sync::Mutex<WorkflowStateMachine>>,
    _lock: SessionLock,
}

pub struct SessionManager {
    layout: StorageLayout,
    store: Arc<dyn SessionStore>,
    runner: Arc<PhaseRunner>,
    limits: StepLimits,
    sessions: Mutex<HashMap<String, OpenSession>>,
}

impl SessionManager {
    pub fn new(
        layout: StorageLayout,
        store: Arc<dyn SessionStore>,
        runner: Arc<PhaseRunner>,
        limits: StepLimits,
    ) -> Self {
        Self {
            layout,
            store,
            runner,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a new session for `description` and persists it.
    pub fn create(&self, description: &str) -> Result<String, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let machine = self.attach(WorkflowState::new(&session_id), false)?;
        let mut machine = machine
            .try_lock()
            .map_err(|_| SessionError::Busy(session_id.clone()))?;
        machine.apply(StateCommand::RecordUserInput {
            name: prompts::DESCRIPTION_INPUT.to_string(),
            value: serde_json::Value::String(description.to_string()),
        })?;
        Ok(session_id)
    }

    /// Resumes `session_id` from its persisted state, or starts it fresh.
    pub fn open(&self, session_id: &str) -> Result<OpenedSession, SessionError> {
        validate_session_id(session_id).map_err(|e| SessionError::InvalidId(format!("{:#}", e)))?;
        if let Some(machine) = self.lookup(session_id) {
            let machine = machine
                .try_lock()
                .map_err(|_| SessionError::Busy(session_id.to_string()))?;
            return Ok(OpenedSession {
                snapshot: StateSnapshot::from(machine.state()),
                resumed: true,
            });
        }
        let (state, resumed) = match load_snapshot(self.store.as_ref(), session_id)? {
            Some(snapshot) => (snapshot.state, true),
            None => (WorkflowState::new(session_id), false),
        };
        let snapshot = StateSnapshot::from(&state);
        self.attach(state, resumed)?;
        Ok(OpenedSession { snapshot, resumed })
    }

    /// Deletes the persisted state and generated diagrams and starts over, keeping the
    /// original description.
    pub async fn discard(&self, session_id: &str) -> Result<OpenedSession, SessionError> {
        let description = match self.machine(session_id) {
            Ok(machine) => {
                let machine = machine.lock().await;
                machine.state().input_text(prompts::DESCRIPTION_INPUT)
            }
            Err(SessionError::NotFound(_)) => None,
            Err(other) => return Err(other),
        };
        self.close(session_id);
        self.store.delete(session_id)?;
        remove_diagrams(&self.layout.diagrams_dir(session_id))?;
        tracing::info!(session_id, "Session discarded");

        let machine = self.attach(WorkflowState::new(session_id), false)?;
        let mut machine = machine.lock().await;
        if let Some(description) = description {
            machine.apply(StateCommand::RecordUserInput {
                name: prompts::DESCRIPTION_INPUT.to_string(),
                value: serde_json::Value::String(description),
            })?;
        } else {
            machine.save()?;
        }
        Ok(OpenedSession {
            snapshot: StateSnapshot::from(machine.state()),
            resumed: false,
        })
    }

    /// Releases the in-memory machine and the session lock.
    pub fn close(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
    }

    /// Runs the current step of an existing session.
    pub async fn advance(&self, session_id: &str) -> Result<Progress, SessionError> {
        let machine = self.machine(session_id)?;
        let mut machine = machine.lock().await;
        let step = machine.state().current_step;
        if machine.state().is_finished() {
            return Err(StepError::WorkflowComplete.into());
        }

        if step == Step::Clarification {
            if let Some(question) = self.clarify(&mut machine).await? {
                return Ok(Progress::AwaitingAnswer { question });
            }
        }

        let state = machine.state().clone();
        let logger = machine.logger().clone();
        let input = self.runner.input_for(step, &state);
        let output = machine
            .advance(step, input, self.runner.run(step, &state, &logger))
            .await?;
        Ok(Progress::Advanced(output))
    }

    /// Opens the next clarifying question if the dialogue wants one.
    async fn clarify(
        &self,
        machine: &mut WorkflowStateMachine,
    ) -> Result<Option<String>, SessionError> {
        let qa = machine.state().qa_session.clone().unwrap_or_default();
        if !qa.is_open {
            return Ok(None);
        }
        if let Some(pending) = qa.pending() {
            return Ok(Some(pending.question.clone()));
        }
        if qa.questions_asked >= self.limits.max_questions {
            return Ok(None);
        }

        let state = machine.state().clone();
        let logger = machine.logger().clone();
        match self.runner.next_question(&state, &logger).await {
            Ok(Some(question)) => {
                machine.apply(StateCommand::OpenQuestion {
                    question: question.clone(),
                })?;
                Ok(Some(question))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                let input = self.runner.input_for(Step::Clarification, &state);
                machine.apply(StateCommand::FailStep {
                    step: Step::Clarification,
                    input,
                    error: error.clone(),
                })?;
                Err(StepError::Failed {
                    step: Step::Clarification,
                    error,
                }
                .into())
            }
        }
    }

    /// Records the user's answer to the pending clarifying question.
    ///
    /// The answer is kept even if summarising it fails.
    pub async fn answer(&self, session_id: &str, answer: &str) -> Result<(), SessionError> {
        let machine = self.machine(session_id)?;
        let mut machine = machine.lock().await;
        let question = machine
            .state()
            .qa_session
            .as_ref()
            .and_then(|qa| qa.pending())
            .map(|e| e.question.clone())
            .ok_or_else(|| StepError::InvalidCommand("no question is waiting for an answer".into()))?;

        let state = machine.state().clone();
        let logger = machine.logger().clone();
        let synthesis = match self
            .runner
            .synthesize(&state, &question, answer, &logger)
            .await
        {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(error = %err, "Answer recorded without a summary");
                None
            }
        };
        machine.apply(StateCommand::AnswerQuestion {
            answer: answer.to_string(),
            synthesis,
        })?;
        Ok(())
    }

    /// Ends the clarification dialogue early.
    pub async fn close_dialogue(&self, session_id: &str) -> Result<(), SessionError> {
        let machine = self.machine(session_id)?;
        let mut machine = machine.lock().await;
        machine.apply(StateCommand::CloseDialogue)?;
        Ok(())
    }

    /// Skips the current step; only optional steps can be skipped.
    pub async fn skip(&self, session_id: &str) -> Result<StepOutput, SessionError> {
        let machine = self.machine(session_id)?;
        let mut machine = machine.lock().await;
        let step = machine.state().current_step;
        Ok(machine.skip(step)?)
    }

    /// Advances until the workflow finishes, waits for an answer, fails, or completes `until`.
    pub async fn run(&self, session_id: &str, until: Option<Step>) -> Result<RunReport, SessionError> {
        let mut report = RunReport::default();
        loop {
            match self.advance(session_id).await {
                Ok(Progress::Advanced(output)) => {
                    let step = output.step;
                    report.outputs.push(output);
                    if step == Step::Export {
                        report.finished = true;
                        break;
                    }
                    if until == Some(step) {
                        break;
                    }
                }
                Ok(Progress::AwaitingAnswer { question }) => {
                    report.awaiting_answer = Some(question);
                    break;
                }
                Err(SessionError::Step(StepError::WorkflowComplete)) => {
                    report.finished = true;
                    break;
                }
                Err(SessionError::Step(err)) => {
                    report.failure = Some(err);
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    /// Verified diagram files of the run the session's diagram step produced.
    pub async fn get_diagram_files(&self, session_id: &str) -> Result<Vec<PathBuf>, SessionError> {
        let state = self.state(session_id).await?;
        Ok(diagrams::recorded_run_dir(&state)
            .map(|dir| diagrams::list_valid_diagrams(&dir))
            .unwrap_or_default())
    }

    pub async fn export_report(&self, session_id: &str) -> Result<RenderedReport, SessionError> {
        let state = self.state(session_id).await?;
        let config = self.runner.report_config().clone();
        let layout = self.layout.clone();
        let rendered = tokio::task::spawn_blocking(move || render_report(&config, &layout, &state))
            .await
            .map_err(|e| SessionError::Internal(format!("report task failed: {}", e)))??;
        Ok(rendered)
    }

    /// JSON of the whole session. Does not depend on any report backend.
    pub async fn export_structured_data(&self, session_id: &str) -> Result<Vec<u8>, SessionError> {
        let state = self.state(session_id).await?;
        Ok(report::export_structured_data(&state)?)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<StateSnapshot, SessionError> {
        let machine = self.machine(session_id)?;
        let machine = machine.lock().await;
        Ok(StateSnapshot::from(machine.state()))
    }

    pub async fn state(&self, session_id: &str) -> Result<WorkflowState, SessionError> {
        let machine = self.machine(session_id)?;
        let machine = machine.lock().await;
        Ok(machine.state().clone())
    }

    pub async fn subscribe(&self, session_id: &str) -> Result<watch::Receiver<StateSnapshot>, SessionError> {
        let machine = self.machine(session_id)?;
        let machine = machine.lock().await;
        Ok(machine.subscribe())
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        Ok(self.store.list()?)
    }

    fn lookup(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<WorkflowStateMachine>>> {
        self.sessions
            .lock()
            .ok()?
            .get(session_id)
            .map(|s| s.machine.clone())
    }

    /// The machine of an open session, resuming persisted state if needed.
    fn machine(
        &self,
        session_id: &str,
    ) -> Result<Arc<tokio::sync::Mutex<WorkflowStateMachine>>, SessionError> {
        if let Some(machine) = self.lookup(session_id) {
            return Ok(machine);
        }
        validate_session_id(session_id).map_err(|e| SessionError::InvalidId(format!("{:#}", e)))?;
        let snapshot = load_snapshot(self.store.as_ref(), session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        self.attach(snapshot.state, true)
    }

    fn attach(
        &self,
        state: WorkflowState,
        resumed: bool,
    ) -> Result<Arc<tokio::sync::Mutex<WorkflowStateMachine>>, SessionError> {
        let session_id = state.session_id.clone();
        let lock = SessionLock::acquire(&self.layout, &session_id)?;
        let logger = StructuredLogger::new(&session_id, &self.layout.logs_dir(&session_id))
            .map_err(|e| SessionError::Log(format!("{:#}", e)))?;
        if resumed {
            logger.increment_run_id();
            tracing::info!(session_id = %session_id, step = %state.current_step, "Resuming session");
        }
        let (machine, _rx) =
            WorkflowStateMachine::new(state, self.store.clone(), Arc::new(logger), self.limits.clone());
        let machine = Arc::new(tokio::sync::Mutex::new(machine));

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| SessionError::Internal("session table poisoned".to_string()))?;
        sessions.insert(
            session_id,
            OpenSession {
                machine: machine.clone(),
                _lock: lock,
            },
        );
        Ok(machine)
    }
}

fn remove_diagrams(dir: &Path) -> Result<(), SessionError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::Internal(format!(
            "failed to remove diagrams in {}: {}",
            dir.display(),
            e
        ))),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
