//! Per-session JSONL event log.
//!
//! Every line is one [`LogEntry`]: a sequence number that keeps growing across resumed
//! runs, a microsecond UTC timestamp, the session and run ids, the emitting component,
//! and the event itself. Writing never fails the caller; a broken log only loses lines.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::failure::ErrorKind;
use crate::retry::RetryAttempt;
use crate::state::Step;
use crate::state_machine::{StateCommand, StateEvent};

const LOG_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    StateMachine,
    Workflow,
    Retry,
    Diagrams,
    Export,
}

/// Something worth reconstructing a session from.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum LogEvent<'a> {
    Command {
        machine_seq: u64,
        command: &'a StateCommand,
    },
    Event {
        machine_seq: u64,
        event: &'a StateEvent,
    },
    StepStarted {
        step: Step,
    },
    AttemptFailed {
        operation: &'a str,
        attempt: u32,
        max_attempts: u32,
        kind: ErrorKind,
        retryable: bool,
        detail: &'a str,
        next_delay_ms: Option<u64>,
    },
    DiagramsVerified {
        output_dir: &'a Path,
        status: &'a str,
        valid_files: usize,
    },
    ExportFinished {
        format: &'a str,
        success: bool,
        detail: &'a str,
    },
}

impl LogEvent<'_> {
    pub fn component(&self) -> Component {
        match self {
            LogEvent::Command { .. } | LogEvent::Event { .. } => Component::StateMachine,
            LogEvent::StepStarted { .. } => Component::Workflow,
            LogEvent::AttemptFailed { .. } => Component::Retry,
            LogEvent::DiagramsVerified { .. } => Component::Diagrams,
            LogEvent::ExportFinished { .. } => Component::Export,
        }
    }
}

/// One line of `events.jsonl`, as read back.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    /// RFC 3339 UTC with microseconds.
    pub ts: String,
    pub session_id: String,
    /// Bumped each time a process resumes the session.
    pub run_id: u64,
    pub component: Component,
    pub event: Value,
}

pub struct StructuredLogger {
    session_id: String,
    run_id: AtomicU64,
    seq: AtomicU64,
    file: Mutex<File>,
    path: PathBuf,
}

impl StructuredLogger {
    /// Opens (or continues) the log at `<logs_dir>/events.jsonl`.
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(LOG_FILE_NAME);
        let (last_seq, last_run) = last_position(&path);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(last_run.max(1)),
            seq: AtomicU64::new(last_seq),
            file: Mutex::new(file),
            path,
        })
    }

    pub fn increment_run_id(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: LogEvent<'_>) {
        let entry = LogEntry {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            session_id: self.session_id.clone(),
            run_id: self.run_id.load(Ordering::SeqCst),
            component: event.component(),
            event: serde_json::to_value(&event).unwrap_or(Value::Null),
        };
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
            let _ = file.flush();
        }
    }

    pub fn log_command(&self, machine_seq: u64, command: &StateCommand) {
        self.record(LogEvent::Command {
            machine_seq,
            command,
        });
    }

    pub fn log_event(&self, machine_seq: u64, event: &StateEvent) {
        self.record(LogEvent::Event { machine_seq, event });
    }

    pub fn log_step_started(&self, step: Step) {
        self.record(LogEvent::StepStarted { step });
    }

    pub fn log_retry_attempt(&self, operation: &str, attempt: &RetryAttempt) {
        self.record(LogEvent::AttemptFailed {
            operation,
            attempt: attempt.attempt,
            max_attempts: attempt.max_attempts,
            kind: attempt.classification.kind,
            retryable: attempt.classification.retryable,
            detail: &attempt.detail,
            next_delay_ms: attempt
                .next_delay
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        });
    }

    pub fn log_diagram_verification(&self, output_dir: &Path, status: &str, valid_files: usize) {
        self.record(LogEvent::DiagramsVerified {
            output_dir,
            status,
            valid_files,
        });
    }

    pub fn log_export(&self, format: &str, success: bool, detail: &str) {
        self.record(LogEvent::ExportFinished {
            format,
            success,
            detail,
        });
    }
}

/// Reads every parseable entry of a log file, skipping torn or foreign lines.
pub fn read_entries(path: &Path) -> anyhow::Result<Vec<LogEntry>> {
    let file = File::open(path)?;
    Ok(BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect())
}

/// Highest sequence number and run id already in the log, so a resumed process continues
/// the numbering instead of restarting it.
fn last_position(path: &Path) -> (u64, u64) {
    read_entries(path)
        .unwrap_or_default()
        .iter()
        .fold((0, 0), |(seq, run), entry| {
            (seq.max(entry.seq), run.max(entry.run_id))
        })
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
