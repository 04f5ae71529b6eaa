//! Grading agent - main orchestration loop for LLM-judged notebook grading
//!
//! The GradeAgent manages the interaction between the judging model and the
//! kernel session: it seeds the conversation with the rendered notebook,
//! lets the model request cell executions through the `run_notebook_cell`
//! tool, feeds the aggregated results back, and collects every piece of
//! free text the model produces for the grade parser.

use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gemini::{FunctionCall, ModelError, Part, Turn, GRADER_SYSTEM_PROMPT, RUN_NOTEBOOK_CELL};
use crate::jupyter::JupyterError;
use crate::metrics::{AGENT_ROUNDS, CELL_EXECUTION_TIME, GRADING_JOBS, LLM_CALL_TIME, TOOL_CALLS};
use crate::notebook::Notebook;

use super::{CellExecutor, JudgeModel};

/// Configuration for the grading agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of rounds (model calls) before the job is aborted.
    /// Bounds runaway tool-call loops; exceeding it is terminal, handled
    /// like a model transport failure.
    pub max_rounds: usize,
    /// Custom system prompt template (uses the built-in grader prompt if None)
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 16,
            system_prompt: None,
        }
    }
}

/// Progress surfaced while a job runs. Display truncation is the consumer's
/// concern; `CellOutput` always carries the full text.
#[derive(Debug, Clone)]
pub enum AgentProgress {
    ExecutingCell(usize),
    CellOutput(String),
}

/// Result of a completed grading conversation
#[derive(Debug, Clone)]
pub struct GradeOutcome {
    /// Every piece of free text the model produced, in round order.
    /// Sole input to judgement parsing.
    pub commentary: Vec<String>,
    /// Number of rounds (model calls) made
    pub rounds: usize,
    /// Number of cell executions performed
    pub tool_calls_made: usize,
    /// Unique trace ID for this job
    pub trace_id: String,
}

impl GradeOutcome {
    /// The commentary newline-joined, as a single text.
    pub fn commentary_text(&self) -> String {
        self.commentary.join("\n")
    }
}

/// Error type for agent operations. All variants are job-fatal; kernel-side
/// runtime errors never surface here, they are ordinary result text.
#[derive(Debug)]
pub enum AgentError {
    /// The execution backend was unreachable or refused the session
    SessionInit(JupyterError),
    /// A tool call named a nonexistent or non-code cell
    InvalidCellReference { detail: String },
    /// The judging-model call failed
    ModelTransport(ModelError),
    /// The kernel channel failed mid-execution
    Execution(JupyterError),
    /// The round cap was exceeded without the model finishing
    RoundLimit(usize),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::SessionInit(e) => {
                write!(f, "Could not initialize Jupyter session: {}", e)
            }
            AgentError::InvalidCellReference { detail } => {
                write!(f, "Invalid cell reference: {}", detail)
            }
            AgentError::ModelTransport(e) => write!(f, "Judging model call failed: {}", e),
            AgentError::Execution(e) => write!(f, "Cell execution failed: {}", e),
            AgentError::RoundLimit(max) => {
                write!(f, "Model did not finish within {} rounds", max)
            }
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ModelError> for AgentError {
    fn from(e: ModelError) -> Self {
        AgentError::ModelTransport(e)
    }
}

/// Grading agent orchestrating the judging model and the kernel session
pub struct GradeAgent<M, E> {
    model: M,
    executor: E,
    config: AgentConfig,
}

impl<M: JudgeModel, E: CellExecutor> GradeAgent<M, E> {
    /// Create a new grading agent
    ///
    /// # Arguments
    /// * `model` - Judging model for conversation rounds
    /// * `executor` - Execution adapter owning the kernel session
    /// * `config` - Agent configuration
    pub fn new(model: M, executor: E, config: AgentConfig) -> Self {
        Self {
            model,
            executor,
            config,
        }
    }

    /// Run the grading conversation for one notebook.
    ///
    /// # Arguments
    /// * `notebook` - The parsed submission
    /// * `rubric` - Rubric/question text appended to the system instruction
    /// * `on_progress` - Callback for per-execution progress events
    ///
    /// # Returns
    /// GradeOutcome with the collected commentary; its text is what the
    /// grade parser consumes.
    pub async fn run(
        &mut self,
        notebook: &Notebook,
        rubric: &str,
        mut on_progress: impl FnMut(AgentProgress) + Send,
    ) -> Result<GradeOutcome, AgentError> {
        let trace_id = Uuid::now_v7().to_string();

        let root_span = info_span!(
            "grading_job",
            trace_id = %trace_id,
            cells = notebook.cell_count(),
        );

        async {
            info!(trace_id = %trace_id, cells = notebook.cell_count(), "Starting grading job");

            let result = self
                .drive(notebook, rubric, &trace_id, &mut on_progress)
                .await;

            // The session is owed a shutdown on every path out of the loop.
            self.executor.shutdown_session().await;

            match &result {
                Ok(outcome) => {
                    GRADING_JOBS.with_label_values(&["success"]).inc();
                    AGENT_ROUNDS.observe(outcome.rounds as f64);
                    info!(
                        trace_id = %trace_id,
                        rounds = outcome.rounds,
                        tool_calls = outcome.tool_calls_made,
                        "Grading conversation completed"
                    );
                }
                Err(AgentError::RoundLimit(max)) => {
                    GRADING_JOBS.with_label_values(&["round_limit"]).inc();
                    warn!(trace_id = %trace_id, max_rounds = max, "Round cap exceeded");
                }
                Err(e) => {
                    GRADING_JOBS.with_label_values(&["error"]).inc();
                    warn!(trace_id = %trace_id, error = %e, "Grading job failed");
                }
            }

            result
        }
        .instrument(root_span)
        .await
    }

    async fn drive(
        &mut self,
        notebook: &Notebook,
        rubric: &str,
        trace_id: &str,
        on_progress: &mut (impl FnMut(AgentProgress) + Send),
    ) -> Result<GradeOutcome, AgentError> {
        let template = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(GRADER_SYSTEM_PROMPT);
        let system_instruction = format!(
            "{}\nHere are the questions you will be grading the notebooks on:\n{}",
            template, rubric
        );

        // The rendered notebook is the opening user turn; everything after
        // is appended in exact exchange order, never reordered or merged.
        let mut history = vec![Turn::user(notebook.render_prompt())];
        let mut commentary: Vec<String> = Vec::new();
        let mut rounds = 0;
        let mut tool_calls_made = 0;
        let mut session_open = false;

        loop {
            rounds += 1;
            if rounds > self.config.max_rounds {
                return Err(AgentError::RoundLimit(self.config.max_rounds));
            }

            let call_start = Instant::now();
            let reply = self.model.generate(&history, &system_instruction).await?;
            LLM_CALL_TIME.observe(call_start.elapsed().as_secs_f64());

            if let Some(text) = &reply.text {
                commentary.push(text.clone());
            }
            history.push(reply.to_model_turn());

            if reply.tool_calls.is_empty() {
                // Model stopped requesting executions: the conversation is done.
                return Ok(GradeOutcome {
                    commentary,
                    rounds,
                    tool_calls_made,
                    trace_id: trace_id.to_string(),
                });
            }

            // One session per job, opened before the first execution and
            // reused by every later tool call.
            if !session_open {
                self.executor
                    .create_session()
                    .await
                    .map_err(AgentError::SessionInit)?;
                session_open = true;
            }

            let mut responses: Vec<Part> = Vec::new();
            for call in &reply.tool_calls {
                if call.name != RUN_NOTEBOOK_CELL {
                    warn!(trace_id = %trace_id, tool = %call.name, "Ignoring call to undeclared tool");
                    continue;
                }

                tool_calls_made += 1;
                TOOL_CALLS.inc();

                let index = cell_index(call).ok_or_else(|| AgentError::InvalidCellReference {
                    detail: format!("cell_index {} is not a valid index", call.args["cell_index"]),
                })?;
                let cell =
                    notebook
                        .cell(index)
                        .ok_or_else(|| AgentError::InvalidCellReference {
                            detail: format!(
                                "cell {} out of range (notebook has {} cells)",
                                index,
                                notebook.cell_count()
                            ),
                        })?;
                if !cell.is_code() {
                    return Err(AgentError::InvalidCellReference {
                        detail: format!("cell {} is not a code cell", index),
                    });
                }

                on_progress(AgentProgress::ExecutingCell(index));
                info!(trace_id = %trace_id, cell = index, "Executing cell");

                let inputs = input_values(call);
                let exec_start = Instant::now();
                let output = self
                    .executor
                    .execute_cell(&cell.source.text(), &inputs)
                    .await
                    .map_err(AgentError::Execution)?;
                CELL_EXECUTION_TIME.observe(exec_start.elapsed().as_secs_f64());

                on_progress(AgentProgress::CellOutput(output.clone()));

                responses.push(Part::response(RUN_NOTEBOOK_CELL, output));
            }

            // One function turn per round, results in call order - appended
            // only if something actually executed.
            if !responses.is_empty() {
                history.push(Turn::function(responses));
            }
        }
    }
}

/// Extract the 0-based cell index from a tool call's arguments.
///
/// Gemini serializes NUMBER arguments as integers or floats depending on the
/// model; both are accepted as long as the value is a non-negative whole
/// number.
fn cell_index(call: &FunctionCall) -> Option<usize> {
    let value = &call.args["cell_index"];
    if let Some(n) = value.as_u64() {
        return Some(n as usize);
    }
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as usize)
}

/// Extract the queued interactive-input answers, empty when omitted.
fn input_values(call: &FunctionCall) -> Vec<String> {
    call.args["input_value"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
