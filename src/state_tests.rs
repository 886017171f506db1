//! Tests for state module.

use super::*;

#[test]
fn test_new_state_starts_at_intake() {
    let state = WorkflowState::new("session-1");
    assert_eq!(state.current_step, Step::Intake);
    assert!(state.completed_steps.is_empty());
    assert!(state.step_outputs.is_empty());
    assert!(state.errors.is_empty());
    assert!(state.qa_session.is_none());
}

#[test]
fn test_step_sequence_order() {
    assert_eq!(Step::Intake.next(), Some(Step::ArchitectureAnalysis));
    assert_eq!(Step::TargetDesign.next(), Some(Step::DiagramGeneration));
    assert_eq!(Step::Roadmap.next(), Some(Step::Export));
    assert_eq!(Step::Export.next(), None);
    for pair in Step::ALL.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn test_only_diagram_and_export_are_optional() {
    let optional: Vec<Step> = Step::ALL.iter().copied().filter(|s| s.is_optional()).collect();
    assert_eq!(optional, vec![Step::DiagramGeneration, Step::Export]);
}

#[test]
fn test_step_parse_accepts_loose_names() {
    assert_eq!(Step::parse("CostAnalysis"), Some(Step::CostAnalysis));
    assert_eq!(Step::parse("cost-analysis"), Some(Step::CostAnalysis));
    assert_eq!(Step::parse("diagram_generation"), Some(Step::DiagramGeneration));
    assert_eq!(Step::parse("nope"), None);
}

#[test]
fn test_record_completion_advances_and_stays_on_terminal() {
    let mut state = WorkflowState::new("s");
    state.record_completion(AgentInteraction::new(Step::Intake, "in", "out"));
    assert_eq!(state.current_step, Step::ArchitectureAnalysis);
    assert_eq!(state.completed_steps, vec![Step::Intake]);

    let mut state = WorkflowState::new("s");
    state.current_step = Step::Export;
    state.record_completion(AgentInteraction::new(Step::Export, "", "report"));
    assert_eq!(state.current_step, Step::Export);
    assert!(state.is_finished());
}

#[test]
fn test_qa_transcript_skips_pending_question() {
    let qa = QaSession {
        exchanges: vec![
            QaExchange {
                question: "How many users?".into(),
                answer: Some("About 2000".into()),
                synthesis: Some("Medium scale".into()),
            },
            QaExchange {
                question: "Which region?".into(),
                answer: None,
                synthesis: None,
            },
        ],
        is_open: true,
        questions_asked: 2,
    };
    let transcript = qa.transcript();
    assert!(transcript.contains("About 2000"));
    assert!(transcript.contains("Medium scale"));
    assert!(!transcript.contains("Which region?"));
    assert_eq!(qa.pending().map(|e| e.question.as_str()), Some("Which region?"));
}

#[test]
fn test_input_text_renders_strings_without_quotes() {
    let mut state = WorkflowState::new("s");
    state
        .user_inputs
        .insert("description".into(), serde_json::json!("monolith on VMs"));
    state.user_inputs.insert("users".into(), serde_json::json!(42));
    assert_eq!(state.input_text("description").as_deref(), Some("monolith on VMs"));
    assert_eq!(state.input_text("users").as_deref(), Some("42"));
    assert_eq!(state.input_text("missing"), None);
}
