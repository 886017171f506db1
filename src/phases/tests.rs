use super::*;
use crate::failure::ErrorKind;
use crate::llm::ServiceError;
use crate::mcp::{ToolError, ToolResponse};
use crate::state::AgentInteraction;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use tempfile::TempDir;

struct ScriptedLlm {
    replies: Mutex<Vec<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, prompt: &str, params: &LlmParams) -> Result<String, ServiceError> {
        self.prompts
            .lock()
            .unwrap()
            .push((params.purpose.clone(), prompt.to_string()));
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok("ok".to_string())
        } else {
            replies.remove(0)
        }
    }
}

/// Writes a small PNG into the directory it is given.
struct PngRenderer {
    received: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl DiagramRenderer for PngRenderer {
    async fn render(&self, description: &str, output_dir: &Path) -> Result<ToolResponse, ToolError> {
        self.received
            .lock()
            .unwrap()
            .push((description.to_string(), output_dir.to_path_buf()));
        image::RgbImage::new(30, 20)
            .save(output_dir.join("target.png"))
            .map_err(|e| ToolError::Reported(e.to_string()))?;
        Ok(ToolResponse {
            text: "done".to_string(),
        })
    }
}

struct Fixture {
    _temp: TempDir,
    layout: StorageLayout,
    logger: Arc<StructuredLogger>,
    renderer: Arc<PngRenderer>,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let layout = StorageLayout::new(temp.path());
    let logger = Arc::new(StructuredLogger::new("s1", &layout.logs_dir("s1")).unwrap());
    Fixture {
        _temp: temp,
        layout,
        logger,
        renderer: Arc::new(PngRenderer {
            received: Mutex::new(Vec::new()),
        }),
    }
}

fn runner(f: &Fixture, llm: Arc<ScriptedLlm>) -> PhaseRunner {
    PhaseRunner::new(llm, f.renderer.clone(), RetryPolicy::default(), f.layout.clone())
}

fn described_state() -> WorkflowState {
    let mut state = WorkflowState::new("s1");
    state.user_inputs.insert(
        prompts::DESCRIPTION_INPUT.to_string(),
        json!("  Three-tier Java app on VMware  "),
    );
    state
}

fn complete(state: &mut WorkflowState, step: Step, output: &str) {
    state.record_completion(AgentInteraction::new(step, "", output));
}

#[tokio::test]
async fn test_intake_records_trimmed_description() {
    let f = fixture();
    let runner = runner(&f, ScriptedLlm::new(vec![]));

    let output = runner.run(Step::Intake, &described_state(), &f.logger).await.unwrap();
    assert_eq!(output, "Three-tier Java app on VMware");

    let err = runner
        .run(Step::Intake, &WorkflowState::new("s1"), &f.logger)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_analysis_prompt_reaches_llm() {
    let f = fixture();
    let llm = ScriptedLlm::new(vec![Ok("monolith with shared DB".into())]);
    let runner = runner(&f, llm.clone());
    let mut state = described_state();
    complete(&mut state, Step::Intake, "Three-tier Java app on VMware");

    let output = runner
        .run(Step::ArchitectureAnalysis, &state, &f.logger)
        .await
        .unwrap();

    assert_eq!(output, "monolith with shared DB");
    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts[0].0, "analysis");
    assert!(prompts[0].1.contains("Three-tier Java app on VMware"));
}

#[tokio::test]
async fn test_clarification_output_is_the_transcript() {
    let f = fixture();
    let runner = runner(&f, ScriptedLlm::new(vec![]));
    let mut state = described_state();

    let output = runner.run(Step::Clarification, &state, &f.logger).await.unwrap();
    assert_eq!(output, "No clarifications were needed.");

    let mut qa = crate::state::QaSession::default();
    qa.exchanges.push(crate::state::QaExchange {
        question: "Peak load?".into(),
        answer: Some("2k rps".into()),
        synthesis: Some("Needs autoscaling".into()),
    });
    state.qa_session = Some(qa);
    let output = runner.run(Step::Clarification, &state, &f.logger).await.unwrap();
    assert_eq!(output, "Q: Peak load?\nA: 2k rps\nSummary: Needs autoscaling");
}

#[tokio::test]
async fn test_next_question_stops_on_marker() {
    let f = fixture();
    let llm = ScriptedLlm::new(vec![
        Ok("What is the peak load?".into()),
        Ok(prompts::NO_MORE_QUESTIONS.into()),
    ]);
    let runner = runner(&f, llm);
    let state = described_state();

    let first = runner.next_question(&state, &f.logger).await.unwrap();
    assert_eq!(first.as_deref(), Some("What is the peak load?"));
    assert!(runner.next_question(&state, &f.logger).await.unwrap().is_none());
}

#[tokio::test]
async fn test_diagram_step_renders_generated_code_into_run_dir() {
    let f = fixture();
    let llm = ScriptedLlm::new(vec![Ok("```python\nwith Diagram(\"x\"):\n    pass\n```".into())]);
    let runner = runner(&f, llm);

    let output = runner
        .run(Step::DiagramGeneration, &described_state(), &f.logger)
        .await
        .unwrap();

    let received = f.renderer.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "with Diagram(\"x\"):\n    pass");
    let session_root = std::fs::canonicalize(f.layout.diagrams_dir("s1")).unwrap();
    assert!(received[0].1.starts_with(&session_root));
    assert!(output.contains("target.png"));
}

#[tokio::test(start_paused = true)]
async fn test_diagram_code_failure_is_degraded() {
    let f = fixture();
    let llm = ScriptedLlm::new(vec![Err(ServiceError::Credentials("expired token".into()))]);
    let runner = runner(&f, llm);

    let err = runner
        .run(Step::DiagramGeneration, &described_state(), &f.logger)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Degraded);
    assert!(f.renderer.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_export_writes_report_with_latest_diagrams() {
    let f = fixture();
    let runner = runner(&f, ScriptedLlm::new(vec![Ok("print('x')".into())]));
    let mut state = described_state();
    for step in [Step::Intake, Step::ArchitectureAnalysis, Step::Clarification, Step::TargetDesign] {
        complete(&mut state, step, "done");
    }
    let diagram_output = runner
        .run(Step::DiagramGeneration, &state, &f.logger)
        .await
        .unwrap();
    complete(&mut state, Step::DiagramGeneration, &diagram_output);
    complete(&mut state, Step::CostAnalysis, "cheap");
    complete(&mut state, Step::Roadmap, "- Lift and shift first");

    let output = runner.run(Step::Export, &state, &f.logger).await.unwrap();

    let path = f.layout.exports_dir().join("s1-report.html");
    assert!(output.contains("s1-report.html"));
    let html = std::fs::read_to_string(path).unwrap();
    assert!(html.contains("data:image/png;base64,"));
    assert!(html.contains("Lift and shift first"));
}

#[tokio::test]
async fn test_export_with_unknown_format_falls_back_to_json() {
    let f = fixture();
    let config = AppConfig {
        report: ReportConfig {
            format: "pdf".to_string(),
            ..ReportConfig::default()
        },
        ..AppConfig::default()
    };
    let runner = PhaseRunner::from_config(
        &config,
        ScriptedLlm::new(vec![]),
        f.renderer.clone(),
        f.layout.clone(),
    )
    .unwrap();
    let mut state = described_state();
    complete(&mut state, Step::Intake, "Three-tier Java app");

    let err = runner.run(Step::Export, &state, &f.logger).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Permanent);
    let fallback = f.layout.exports_dir().join("s1-data.json");
    assert!(err.detail.contains("s1-data.json"));
    let value: serde_json::Value =
        serde_json::from_slice(&std::fs::read(fallback).unwrap()).unwrap();
    assert_eq!(value["state"]["step_outputs"]["intake"]["output"], "Three-tier Java app");
}

#[test]
fn test_inputs_follow_the_previous_work() {
    let f = fixture();
    let runner = runner(&f, ScriptedLlm::new(vec![]));
    let mut state = described_state();
    complete(&mut state, Step::Intake, "x");
    complete(&mut state, Step::ArchitectureAnalysis, "analysis");

    assert_eq!(
        runner.input_for(Step::Intake, &state),
        "  Three-tier Java app on VMware  "
    );
    assert_eq!(runner.input_for(Step::TargetDesign, &state), "analysis");
    assert_eq!(runner.input_for(Step::Export, &state), "html");
}
