//! Jupyter kernel wire messages
//!
//! The kernel channels WebSocket multiplexes the shell, iopub and stdin
//! channels over one connection; every frame is a JSON object with a header,
//! a parent header linking it to the request that caused it, and a typed
//! content payload. Incoming traffic is folded into the closed `KernelEvent`
//! union so every message kind the grader cares about is handled
//! exhaustively and everything else is logged instead of silently dropped.

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Protocol version sent in outgoing headers.
const PROTOCOL_VERSION: &str = "5.3";

/// Build an outgoing message header.
fn header(msg_id: &str, msg_type: &str, session: &str) -> Value {
    json!({
        "msg_id": msg_id,
        "msg_type": msg_type,
        "session": session,
        "username": "cellgrader",
        "version": PROTOCOL_VERSION,
        "date": "",
    })
}

/// An `execute_request` frame for the shell channel.
///
/// `allow_stdin` is set so the kernel forwards `input()` prompts instead of
/// raising `StdinNotImplementedError`.
pub fn execute_request(msg_id: &str, session: &str, code: &str) -> Value {
    json!({
        "header": header(msg_id, "execute_request", session),
        "parent_header": {},
        "metadata": {},
        "content": {
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": true,
            "stop_on_error": false,
        },
        "channel": "shell",
        "buffers": [],
    })
}

/// An `input_reply` frame answering an `input_request`.
///
/// The kernel blocks until this arrives, so a reply is sent for every
/// request, empty-valued if need be.
pub fn input_reply(session: &str, parent_header: &Value, value: &str) -> Value {
    json!({
        "header": header(&Uuid::new_v4().to_string(), "input_reply", session),
        "parent_header": parent_header,
        "metadata": {},
        "content": { "value": value },
        "channel": "stdin",
        "buffers": [],
    })
}

/// A decoded incoming frame, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    #[serde(default)]
    pub channel: String,
    pub header: Value,
    #[serde(default)]
    pub parent_header: Value,
    #[serde(default)]
    pub content: Value,
}

impl Incoming {
    pub fn msg_type(&self) -> &str {
        self.header["msg_type"].as_str().unwrap_or("")
    }

    /// `msg_id` of the request this frame belongs to, if any.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header["msg_id"].as_str()
    }

    /// Classify into the closed event union.
    pub fn event(&self) -> KernelEvent {
        match self.msg_type() {
            "stream" => KernelEvent::Stream {
                text: self.content["text"].as_str().unwrap_or("").to_string(),
            },
            "execute_result" => KernelEvent::ExecuteResult {
                text: self.content["data"]["text/plain"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            },
            "error" => KernelEvent::Error {
                ename: self.content["ename"].as_str().unwrap_or("").to_string(),
                evalue: self.content["evalue"].as_str().unwrap_or("").to_string(),
            },
            "input_request" => KernelEvent::InputRequest {
                prompt: self.content["prompt"].as_str().unwrap_or("").to_string(),
            },
            "status" => KernelEvent::Status {
                execution_state: self.content["execution_state"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            },
            "execute_reply" => KernelEvent::ExecuteReply,
            other => KernelEvent::Unknown {
                msg_type: other.to_string(),
            },
        }
    }
}

/// Everything one execution can emit, as a closed tagged union.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelEvent {
    /// stdout/stderr text from the kernel
    Stream { text: String },
    /// Plain-text representation of the cell's final expression value
    ExecuteResult { text: String },
    /// A runtime error raised by the executed code
    Error { ename: String, evalue: String },
    /// The kernel is blocked waiting on `input()`
    InputRequest { prompt: String },
    /// Kernel execution-state transition (busy/idle)
    Status { execution_state: String },
    /// The shell-channel reply closing the request
    ExecuteReply,
    /// Anything this version of the protocol does not model
    Unknown { msg_type: String },
}

/// Accumulates the text result of one execution.
///
/// Output events append verbatim, in arrival order, with no separators;
/// runtime errors render as `"<ErrorName>: <ErrorMessage>"` and are result
/// text like any other output. No truncation happens here; display
/// trimming belongs to the reporting layer.
#[derive(Debug, Default)]
pub struct OutputAggregator {
    out: String,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &KernelEvent) {
        match event {
            KernelEvent::Stream { text } => self.out.push_str(text),
            KernelEvent::ExecuteResult { text } => self.out.push_str(text),
            KernelEvent::Error { ename, evalue } => {
                self.out.push_str(&format!("{}: {}", ename, evalue));
            }
            // Control-flow events carry no output.
            KernelEvent::InputRequest { .. }
            | KernelEvent::Status { .. }
            | KernelEvent::ExecuteReply
            | KernelEvent::Unknown { .. } => {}
        }
    }

    pub fn into_text(self) -> String {
        self.out
    }
}
