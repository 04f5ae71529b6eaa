//! Gemini judging-model integration module
//!
//! This module provides the conversation/tool-call types of the
//! `generateContent` wire format and the REST client the agent loop
//! drives one round at a time.

pub mod client;
pub mod tool_use;

pub use client::{GeminiClient, ModelError, ModelReply};
pub use tool_use::{
    run_notebook_cell_tool, FunctionCall, FunctionDeclaration, FunctionResponse, Part, Turn,
    GRADER_SYSTEM_PROMPT, RUN_NOTEBOOK_CELL,
};
