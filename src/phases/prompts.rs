//! Prompt construction for the LLM-backed steps.

use crate::state::{Step, WorkflowState};

/// Marker the analyst answers with when it has nothing left to ask.
pub const NO_MORE_QUESTIONS: &str = "NO_FURTHER_QUESTIONS";

const ANALYST_PREAMBLE: &str = r#"You are a senior cloud solutions architect helping a customer plan a migration.
Be concrete and concise. Use short paragraphs and bullet lists where they help.
Do not ask the user questions unless you are explicitly asked to."#;

/// Name of the user input holding the free-text description.
pub const DESCRIPTION_INPUT: &str = "description";

fn description(state: &WorkflowState) -> String {
    state
        .input_text(DESCRIPTION_INPUT)
        .unwrap_or_else(|| state.output_of(Step::Intake).to_string())
}

/// Completed outputs of `steps`, each under its section heading.
fn context(state: &WorkflowState, steps: &[Step]) -> String {
    steps
        .iter()
        .filter(|s| state.is_completed(**s))
        .map(|s| (s, state.output_of(*s).trim()))
        .filter(|(_, output)| !output.is_empty())
        .map(|(s, output)| format!("## {}\n{}", s.section_title(), output))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build(task: &str, state: &WorkflowState, steps: &[Step]) -> String {
    let mut prompt = format!(
        "{}\n\n# Current environment\n{}\n",
        ANALYST_PREAMBLE,
        description(state).trim()
    );
    let context = context(state, steps);
    if !context.is_empty() {
        prompt.push_str(&format!("\n# Work so far\n{}\n", context));
    }
    prompt.push_str(&format!("\n# Task\n{}", task));
    prompt
}

pub fn architecture_analysis(state: &WorkflowState) -> String {
    build(
        r#"Analyse the current architecture described above.
Identify the main components, their dependencies, data stores, and integration points.
Call out risks, bottlenecks and anything that will complicate a migration."#,
        state,
        &[],
    )
}

pub fn clarifying_question(state: &WorkflowState) -> String {
    let mut task = String::from(
        r#"Ask ONE clarifying question that would most improve the target architecture design.
Reply with the question only."#,
    );
    if let Some(qa) = &state.qa_session {
        let transcript = qa.transcript();
        if !transcript.is_empty() {
            task.push_str(&format!(
                "\n\nQuestions already answered:\n{}\n\nDo not repeat them.",
                transcript
            ));
        }
    }
    task.push_str(&format!(
        "\nIf you have enough information, reply with exactly {}.",
        NO_MORE_QUESTIONS
    ));
    build(&task, state, &[Step::ArchitectureAnalysis])
}

pub fn answer_synthesis(state: &WorkflowState, question: &str, answer: &str) -> String {
    build(
        &format!(
            "Summarise in one or two sentences what this answer tells us for the design.\n\nQuestion: {}\nAnswer: {}",
            question, answer
        ),
        state,
        &[Step::ArchitectureAnalysis],
    )
}

pub fn target_design(state: &WorkflowState) -> String {
    build(
        r#"Design the target cloud architecture.
List the services you would use for each component, how they connect,
and how the design addresses the risks identified in the analysis."#,
        state,
        &[Step::ArchitectureAnalysis, Step::Clarification],
    )
}

pub fn diagram_code(state: &WorkflowState) -> String {
    build(
        r#"Write Python code using the `diagrams` package that draws the target architecture.
Use `with Diagram("Target Architecture", show=False):` and only standard node classes.
Reply with the code only, without markdown fences or explanation."#,
        state,
        &[Step::TargetDesign],
    )
}

pub fn cost_analysis(state: &WorkflowState) -> String {
    build(
        r#"Estimate the monthly running cost of the target architecture.
Break the estimate down per service, state your assumptions,
and suggest where the customer could save money."#,
        state,
        &[Step::TargetDesign, Step::Clarification],
    )
}

pub fn roadmap(state: &WorkflowState) -> String {
    build(
        r#"Produce a phased migration roadmap from the current to the target architecture.
End with a bullet list of the key recommendations, one per line starting with "- "."#,
        state,
        &[Step::ArchitectureAnalysis, Step::TargetDesign, Step::CostAnalysis],
    )
}

/// Drops a surrounding markdown code fence if the model added one anyway.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => rest.get(newline + 1..).unwrap_or(""),
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
