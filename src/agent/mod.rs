//! Agent module for LLM-driven notebook grading
//!
//! This module provides the agent loop that orchestrates:
//! - the Gemini judging model with tool calling (`generateContent`)
//! - one live Jupyter kernel session per job
//! - cell execution with interactive-input interception
//!
//! # Architecture
//!
//! ```text
//! Notebook + Rubric → GradeAgent → Gemini generateContent (with tool)
//!                        ↓
//!                 Tool Call: run_notebook_cell
//!                        ↓
//!                 JupyterExecutor (create session once, lazily)
//!                        ↓
//!                 KernelSession.execute_codeblock → aggregated output
//!                        ↓
//!                 Feed result back to Gemini → Loop or Done
//!                        ↓
//!                 Commentary → grading::grade_commentary
//! ```

use async_trait::async_trait;

use crate::gemini::{run_notebook_cell_tool, GeminiClient, ModelError, ModelReply, Turn};
use crate::jupyter::JupyterError;

pub mod grader;

pub use grader::{AgentConfig, AgentError, AgentProgress, GradeAgent, GradeOutcome};

/// The judging-model seam: one conversation round in, text and tool calls out.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    async fn generate(
        &self,
        history: &[Turn],
        system_instruction: &str,
    ) -> Result<ModelReply, ModelError>;
}

#[async_trait]
impl JudgeModel for GeminiClient {
    async fn generate(
        &self,
        history: &[Turn],
        system_instruction: &str,
    ) -> Result<ModelReply, ModelError> {
        GeminiClient::generate(
            self,
            history,
            system_instruction,
            &[run_notebook_cell_tool()],
        )
        .await
    }
}

/// The execution seam: a per-job session lifecycle around single-cell runs.
///
/// `create_session` is called at most once per job, lazily before the first
/// tool call; `shutdown_session` is best-effort and safe when nothing is
/// active.
#[async_trait]
pub trait CellExecutor: Send {
    async fn create_session(&mut self) -> Result<(), JupyterError>;

    /// Run one code unit. `inputs` answer the cell's interactive prompts
    /// strictly in array order, empty strings once exhausted. Interpreter
    /// runtime errors are NOT an `Err`; they come back as result text.
    async fn execute_cell(&mut self, code: &str, inputs: &[String])
        -> Result<String, JupyterError>;

    async fn shutdown_session(&mut self);
}
