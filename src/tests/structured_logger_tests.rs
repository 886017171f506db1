use super::*;
use crate::failure::{classify, FailureSignal};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &TempDir) -> StructuredLogger {
    StructuredLogger::new("s-42", dir.path()).unwrap()
}

fn entries(dir: &TempDir) -> Vec<LogEntry> {
    read_entries(&dir.path().join("events.jsonl")).unwrap()
}

#[test]
fn test_state_machine_traffic_is_tagged() {
    let dir = TempDir::new().unwrap();
    let logger = open(&dir);

    logger.log_command(
        7,
        &StateCommand::SkipStep {
            step: Step::DiagramGeneration,
        },
    );
    logger.log_event(
        7,
        &StateEvent::StepSkipped {
            step: Step::DiagramGeneration,
            next: Some(Step::CostAnalysis),
        },
    );
    logger.log_step_started(Step::CostAnalysis);

    let entries = entries(&dir);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].component, Component::StateMachine);
    assert_eq!(entries[0].event["type"], "Command");
    assert_eq!(entries[0].event["machine_seq"], 7);
    assert_eq!(entries[0].event["command"]["type"], "SkipStep");
    assert_eq!(entries[1].event["event"]["next"], "cost_analysis");
    assert_eq!(entries[2].component, Component::Workflow);
    assert_eq!(entries[2].event["step"], "cost_analysis");
    assert!(entries.iter().all(|e| e.session_id == "s-42"));
}

#[test]
fn test_retry_attempt_carries_classification() {
    let dir = TempDir::new().unwrap();
    let logger = open(&dir);
    let signal = FailureSignal::Throttled("slow down".into());

    logger.log_retry_attempt(
        "llm:analysis",
        &RetryAttempt {
            attempt: 2,
            max_attempts: 3,
            classification: classify(&signal),
            detail: signal.detail(),
            next_delay: Some(Duration::from_secs(2)),
        },
    );

    let entry = &entries(&dir)[0];
    assert_eq!(entry.component, Component::Retry);
    assert_eq!(entry.event["type"], "AttemptFailed");
    assert_eq!(entry.event["operation"], "llm:analysis");
    assert_eq!(entry.event["kind"], "transient");
    assert_eq!(entry.event["retryable"], true);
    assert_eq!(entry.event["next_delay_ms"], 2000);
}

#[test]
fn test_diagram_and_export_results() {
    let dir = TempDir::new().unwrap();
    let logger = open(&dir);

    logger.log_diagram_verification(Path::new("/tmp/run-1"), "no_files_produced", 0);
    logger.log_export("html", false, "serializer unavailable");

    let entries = entries(&dir);
    assert_eq!(entries[0].component, Component::Diagrams);
    assert_eq!(entries[0].event["status"], "no_files_produced");
    assert_eq!(entries[0].event["valid_files"], 0);
    assert_eq!(entries[1].component, Component::Export);
    assert_eq!(entries[1].event["success"], false);
}

#[test]
fn test_resumed_log_continues_numbering() {
    let dir = TempDir::new().unwrap();
    {
        let first = open(&dir);
        first.log_step_started(Step::Intake);
        first.log_step_started(Step::ArchitectureAnalysis);
    }

    let resumed = open(&dir);
    resumed.increment_run_id();
    resumed.log_step_started(Step::Clarification);

    let entries = entries(&dir);
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    let runs: Vec<u64> = entries.iter().map(|e| e.run_id).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(runs, vec![1, 1, 2]);
}

#[test]
fn test_torn_lines_are_skipped_on_read() {
    let dir = TempDir::new().unwrap();
    let logger = open(&dir);
    logger.log_step_started(Step::Intake);
    {
        let mut file = OpenOptions::new().append(true).open(logger.path()).unwrap();
        writeln!(file, "{{\"seq\": 2, \"ts\":").unwrap();
    }
    logger.log_step_started(Step::ArchitectureAnalysis);

    let entries = entries(&dir);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].seq, 2);
}

#[test]
fn test_concurrent_writers_get_distinct_sequence_numbers() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(open(&dir));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let logger = logger.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    logger.log_step_started(Step::Roadmap);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let seqs: HashSet<u64> = entries(&dir).iter().map(|e| e.seq).collect();
    assert_eq!(seqs.len(), 100);
    assert_eq!(seqs.iter().max(), Some(&100));
}

#[test]
fn test_timestamps_are_utc_with_microseconds() {
    let dir = TempDir::new().unwrap();
    open(&dir).log_step_started(Step::Intake);

    let ts = entries(&dir).remove(0).ts;
    let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
    assert_eq!(parsed.offset().local_minus_utc(), 0);
    let fraction = ts.split('.').nth(1).unwrap();
    assert_eq!(fraction.trim_end_matches('Z').len(), 6);
}
