//! Integration tests for the grading agent
//!
//! These drive the full conversation loop against a scripted judge and a
//! mock executor, covering termination, ordering, session lifecycle and the
//! fatal-error paths. Tests that need a live Gemini key and Jupyter server
//! are marked #[ignore].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cellgrader::agent::{
    AgentConfig, AgentError, AgentProgress, CellExecutor, GradeAgent, JudgeModel,
};
use cellgrader::gemini::{FunctionCall, ModelError, ModelReply, Turn, RUN_NOTEBOOK_CELL};
use cellgrader::jupyter::JupyterError;
use cellgrader::notebook::Notebook;

// ---------- scripted judge ----------

#[derive(Default)]
struct JudgeInner {
    replies: Mutex<VecDeque<ModelReply>>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Turn>>>,
}

/// Judge that replays a fixed script of replies and records every history
/// snapshot it was sent.
#[derive(Clone, Default)]
struct ScriptedJudge {
    inner: Arc<JudgeInner>,
}

impl ScriptedJudge {
    fn with_replies(replies: Vec<ModelReply>) -> Self {
        let judge = Self::default();
        *judge.inner.replies.lock().unwrap() = replies.into();
        judge
    }

    fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn history_at_call(&self, call: usize) -> Vec<Turn> {
        self.inner.histories.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl JudgeModel for ScriptedJudge {
    async fn generate(
        &self,
        history: &[Turn],
        _system_instruction: &str,
    ) -> Result<ModelReply, ModelError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.histories.lock().unwrap().push(history.to_vec());
        self.inner
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ModelError::EmptyCandidates)
    }
}

// ---------- mock executor ----------

#[derive(Default)]
struct ExecInner {
    sessions_created: AtomicUsize,
    shutdowns: AtomicUsize,
    executions: Mutex<Vec<(String, Vec<String>)>>,
}

/// Executor that records session lifecycle and echoes the code it ran.
#[derive(Clone, Default)]
struct MockExecutor {
    inner: Arc<ExecInner>,
    fail_create: bool,
}

impl MockExecutor {
    fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    fn sessions_created(&self) -> usize {
        self.inner.sessions_created.load(Ordering::SeqCst)
    }

    fn shutdowns(&self) -> usize {
        self.inner.shutdowns.load(Ordering::SeqCst)
    }

    fn executions(&self) -> Vec<(String, Vec<String>)> {
        self.inner.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl CellExecutor for MockExecutor {
    async fn create_session(&mut self) -> Result<(), JupyterError> {
        if self.fail_create {
            return Err(JupyterError::Protocol("backend refused".to_string()));
        }
        self.inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_cell(
        &mut self,
        code: &str,
        inputs: &[String],
    ) -> Result<String, JupyterError> {
        self.inner
            .executions
            .lock()
            .unwrap()
            .push((code.to_string(), inputs.to_vec()));
        Ok(format!("ran:{}", code))
    }

    async fn shutdown_session(&mut self) {
        self.inner.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------- helpers ----------

fn notebook(cells: &[(&str, &str)]) -> Notebook {
    let cells: Vec<serde_json::Value> = cells
        .iter()
        .map(|(cell_type, source)| {
            serde_json::json!({ "cell_type": cell_type, "source": source })
        })
        .collect();
    Notebook::from_json(&serde_json::json!({ "cells": cells }).to_string()).unwrap()
}

fn run_cell(index: i64) -> FunctionCall {
    FunctionCall {
        name: RUN_NOTEBOOK_CELL.to_string(),
        args: serde_json::json!({ "cell_index": index }),
    }
}

fn run_cell_with_inputs(index: i64, inputs: &[&str]) -> FunctionCall {
    FunctionCall {
        name: RUN_NOTEBOOK_CELL.to_string(),
        args: serde_json::json!({ "cell_index": index, "input_value": inputs }),
    }
}

fn reply(text: Option<&str>, tool_calls: Vec<FunctionCall>) -> ModelReply {
    ModelReply {
        text: text.map(String::from),
        tool_calls,
    }
}

fn agent(
    judge: &ScriptedJudge,
    executor: &MockExecutor,
) -> GradeAgent<ScriptedJudge, MockExecutor> {
    GradeAgent::new(judge.clone(), executor.clone(), AgentConfig::default())
}

// ---------- tests ----------

/// Tool calls on rounds 1-2, none on round 3: the loop terminates after
/// exactly three model invocations.
#[tokio::test]
async fn test_terminates_when_model_stops_requesting_tools() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell(0)]),
        reply(None, vec![run_cell(0)]),
        reply(Some("{\"Q1\": {}}"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "print(1)")]);
    let outcome = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    assert_eq!(judge.calls(), 3);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.tool_calls_made, 2);
    assert_eq!(outcome.commentary, vec!["{\"Q1\": {}}".to_string()]);
}

/// Two tool calls in one round produce one function turn holding both
/// results in call order.
#[tokio::test]
async fn test_tool_results_preserve_call_order() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell(0), run_cell(2)]),
        reply(Some("done"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[
        ("code", "first = 1"),
        ("markdown", "text between"),
        ("code", "second = 2"),
    ]);
    agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    // The second model call sees: user, model (two calls), function (two results).
    let history = judge.history_at_call(1);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[1].role, "model");
    assert_eq!(history[2].role, "function");

    let results = &history[2].parts;
    assert_eq!(results.len(), 2);
    let first = results[0].function_response.as_ref().unwrap();
    let second = results[1].function_response.as_ref().unwrap();
    assert_eq!(first.response["result"], "ran:first = 1");
    assert_eq!(second.response["result"], "ran:second = 2");
}

/// Commentary keeps every piece of model text in round order.
#[tokio::test]
async fn test_commentary_collected_across_rounds() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(Some("checking cell 0"), vec![run_cell(0)]),
        reply(Some("{\"Q1\": {}}"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    let outcome = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    assert_eq!(
        outcome.commentary,
        vec!["checking cell 0".to_string(), "{\"Q1\": {}}".to_string()]
    );
    assert_eq!(outcome.commentary_text(), "checking cell 0\n{\"Q1\": {}}");
}

/// The session opens lazily before the first execution and is reused by
/// every later round; one shutdown at the end.
#[tokio::test]
async fn test_session_created_once_and_reused() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell(0)]),
        reply(None, vec![run_cell(0)]),
        reply(Some("done"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    assert_eq!(executor.sessions_created(), 1);
    assert_eq!(executor.executions().len(), 2);
    assert_eq!(executor.shutdowns(), 1);
}

/// No session is opened when the model never asks for an execution.
#[tokio::test]
async fn test_no_session_without_tool_calls() {
    let judge = ScriptedJudge::with_replies(vec![reply(Some("{}"), vec![])]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    assert_eq!(executor.sessions_created(), 0);
    // Shutdown is still attempted and is a safe no-op.
    assert_eq!(executor.shutdowns(), 1);
}

/// Input values pass through to the executor unchanged.
#[tokio::test]
async fn test_input_values_reach_the_executor() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell_with_inputs(0, &["Alice", "42"])]),
        reply(Some("done"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "name = input()")]);
    agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    let executions = executor.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].1, vec!["Alice".to_string(), "42".to_string()]);
}

/// An out-of-range cell index is job-fatal, and the session is still shut
/// down on the way out.
#[tokio::test]
async fn test_out_of_range_cell_is_fatal() {
    let judge = ScriptedJudge::with_replies(vec![reply(None, vec![run_cell(5)])]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1"), ("code", "y = 2")]);
    let err = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::InvalidCellReference { .. }));
    assert!(executor.executions().is_empty());
    assert_eq!(executor.shutdowns(), 1);
}

/// Referencing a markdown cell is just as fatal as an out-of-range index.
#[tokio::test]
async fn test_markdown_cell_is_fatal() {
    let judge = ScriptedJudge::with_replies(vec![reply(None, vec![run_cell(0)])]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("markdown", "# not code")]);
    let err = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::InvalidCellReference { .. }));
    assert!(executor.executions().is_empty());
}

/// Session creation failing before the first tool call aborts the job.
#[tokio::test]
async fn test_session_init_failure_is_fatal() {
    let judge = ScriptedJudge::with_replies(vec![reply(None, vec![run_cell(0)])]);
    let executor = MockExecutor::failing_create();

    let nb = notebook(&[("code", "x = 1")]);
    let err = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::SessionInit(_)));
    assert!(executor.executions().is_empty());
    assert_eq!(executor.shutdowns(), 1);
}

/// A model that never stops requesting tools hits the round cap.
#[tokio::test]
async fn test_round_cap_bounds_the_loop() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell(0)]),
        reply(None, vec![run_cell(0)]),
        reply(None, vec![run_cell(0)]),
        reply(None, vec![run_cell(0)]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    let mut grader = GradeAgent::new(
        judge.clone(),
        executor.clone(),
        AgentConfig {
            max_rounds: 3,
            system_prompt: None,
        },
    );
    let err = grader.run(&nb, "rubric", |_| {}).await.unwrap_err();

    assert!(matches!(err, AgentError::RoundLimit(3)));
    assert_eq!(judge.calls(), 3);
    assert_eq!(executor.shutdowns(), 1);
}

/// A transport failure from the model layer is job-fatal.
#[tokio::test]
async fn test_model_transport_failure_is_fatal() {
    // Empty script: the first generate call fails.
    let judge = ScriptedJudge::default();
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    let err = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ModelTransport(_)));
    assert_eq!(executor.shutdowns(), 1);
}

/// Calls to a tool that was never declared are skipped, not answered: no
/// function turn is appended for a round where nothing executed.
#[tokio::test]
async fn test_unknown_tool_calls_are_skipped() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(
            None,
            vec![FunctionCall {
                name: "delete_notebook".to_string(),
                args: serde_json::json!({}),
            }],
        ),
        reply(Some("done"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("code", "x = 1")]);
    let outcome = agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.tool_calls_made, 0);
    assert!(executor.executions().is_empty());

    // Second model call sees user + model only - no function turn.
    let history = judge.history_at_call(1);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, "model");
}

/// Progress events fire per execution, with the full untruncated output.
#[tokio::test]
async fn test_progress_events_per_execution() {
    let judge = ScriptedJudge::with_replies(vec![
        reply(None, vec![run_cell(0)]),
        reply(Some("done"), vec![]),
    ]);
    let executor = MockExecutor::default();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let nb = notebook(&[("code", "print('hi')")]);
    agent(&judge, &executor)
        .run(&nb, "rubric", move |progress| {
            sink.lock().unwrap().push(progress);
        })
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], AgentProgress::ExecutingCell(0)));
    match &events[1] {
        AgentProgress::CellOutput(output) => assert_eq!(output, "ran:print('hi')"),
        other => panic!("expected cell output, got {:?}", other),
    }
}

/// The opening turn is the rendered notebook as a single user turn.
#[tokio::test]
async fn test_history_seeded_with_rendered_notebook() {
    let judge = ScriptedJudge::with_replies(vec![reply(Some("{}"), vec![])]);
    let executor = MockExecutor::default();

    let nb = notebook(&[("markdown", "Question 1"), ("code", "print(1)")]);
    agent(&judge, &executor)
        .run(&nb, "rubric", |_| {})
        .await
        .unwrap();

    let history = judge.history_at_call(0);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, "user");
    let seed = history[0].parts[0].text.as_deref().unwrap();
    assert!(seed.starts_with("CELL 0 [markdown]:\nQuestion 1\n"));
    assert!(seed.contains("CELL 1 [code]:\nprint(1)\n"));
}

// Integration tests that require external services

/// End-to-end grade of a real submission (requires Gemini key + Jupyter)
#[tokio::test]
#[ignore = "Requires GEMINI_API_KEY and a local Jupyter server"]
async fn test_live_grading_end_to_end() {
    // This test would:
    // 1. Build GeminiClient/JupyterExecutor from Config::from_env()
    // 2. Grade a small fixture notebook against a one-question rubric
    // 3. Assert the judgement parses and scores stay in [0, 10]
}
