//! Jupyter session lifecycle and code execution
//!
//! One `KernelSession` is a live, stateful Python kernel reached through the
//! Jupyter Server REST API plus its kernel-channels WebSocket. A grading job
//! opens at most one session, lazily, before its first cell execution, and
//! every later execution reuses it: state built up by earlier cells stays
//! visible to later ones, the way it is in the student's own notebook run.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{execute_request, input_reply, Incoming, KernelEvent, OutputAggregator};
use crate::agent::CellExecutor;

/// Scratch path the grading session is registered under on the server.
const SESSION_PATH: &str = "autograder-scratchpad.ipynb";

/// Kernel spec used for student submissions.
const KERNEL_NAME: &str = "python3";

/// Error type for Jupyter session operations
#[derive(Debug)]
pub enum JupyterError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Socket(tokio_tungstenite::tungstenite::Error),
    Parse(serde_json::Error),
    Protocol(String),
}

impl std::fmt::Display for JupyterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JupyterError::Http(e) => write!(f, "HTTP error: {}", e),
            JupyterError::Api { status, body } => {
                write!(f, "Jupyter API returned HTTP {}: {}", status, body)
            }
            JupyterError::Socket(e) => write!(f, "Kernel socket error: {}", e),
            JupyterError::Parse(e) => write!(f, "Message parse error: {}", e),
            JupyterError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for JupyterError {}

impl From<reqwest::Error> for JupyterError {
    fn from(e: reqwest::Error) -> Self {
        JupyterError::Http(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for JupyterError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        JupyterError::Socket(e)
    }
}

impl From<serde_json::Error> for JupyterError {
    fn from(e: serde_json::Error) -> Self {
        JupyterError::Parse(e)
    }
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
    kernel: KernelInfo,
}

#[derive(Debug, Deserialize)]
struct KernelInfo {
    id: String,
}

/// Connection settings for a Jupyter server
#[derive(Clone)]
pub struct JupyterClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl JupyterClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - Server base URL (e.g., "http://127.0.0.1:8888")
    /// * `token` - Server token; empty for token-less local servers
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            req
        } else {
            req.header("Authorization", format!("token {}", self.token))
        }
    }

    /// Start a new session bound to one kernel and connect its channels socket.
    pub async fn create_session(&self) -> Result<KernelSession, JupyterError> {
        debug!(base_url = %self.base_url, "Starting Jupyter session");

        let response = self
            .authorize(self.client.post(format!("{}/api/sessions", self.base_url)))
            .json(&serde_json::json!({
                "path": SESSION_PATH,
                "type": "notebook",
                "kernel": { "name": KERNEL_NAME },
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(JupyterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let info: SessionInfo = serde_json::from_str(&body)?;

        // Each client connection identifies itself to the kernel with its own
        // session id, distinct from the server-side session resource id.
        let client_session = Uuid::new_v4().to_string();
        let mut channels_url = format!(
            "{}/api/kernels/{}/channels?session_id={}",
            websocket_base(&self.base_url),
            info.kernel.id,
            client_session
        );
        if !self.token.is_empty() {
            channels_url.push_str(&format!("&token={}", self.token));
        }

        let (socket, _) = connect_async(channels_url.as_str()).await?;

        debug!(session_id = %info.id, kernel_id = %info.kernel.id, "Jupyter session started");

        Ok(KernelSession {
            http: self.client.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            session_id: info.id,
            client_session,
            socket,
        })
    }
}

/// Map the REST base URL onto the WebSocket scheme.
fn websocket_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base_url)
    }
}

/// One live kernel, exclusively owned by a single grading job.
pub struct KernelSession {
    http: reqwest::Client,
    base_url: String,
    token: String,
    session_id: String,
    client_session: String,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl KernelSession {
    /// Execute one code unit and return its aggregated text output.
    ///
    /// The call resolves only once the kernel signals the execution is fully
    /// complete (shell reply received and the kernel back to idle for this
    /// request). Every `input_request` raised during the execution is
    /// answered with `prompt_resolver(prompt)` so the kernel is never left
    /// hanging. The returned text is never truncated here.
    pub async fn execute_codeblock<F>(
        &mut self,
        code: &str,
        mut prompt_resolver: F,
    ) -> Result<String, JupyterError>
    where
        F: FnMut(&str) -> String,
    {
        let msg_id = Uuid::new_v4().to_string();
        let request = execute_request(&msg_id, &self.client_session, code);
        self.socket
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        let mut aggregator = OutputAggregator::new();
        let mut reply_seen = false;
        let mut idle_seen = false;

        while !(reply_seen && idle_seen) {
            let frame = self
                .socket
                .next()
                .await
                .ok_or_else(|| JupyterError::Protocol("kernel socket closed".to_string()))??;

            let raw = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(JupyterError::Protocol(
                        "kernel closed the channel mid-execution".to_string(),
                    ));
                }
                // Pings are answered by the websocket layer; nothing else
                // carries kernel messages on this connection.
                _ => continue,
            };

            let incoming: Incoming = serde_json::from_str(&raw)?;

            // Only frames caused by our request matter; the kernel also
            // broadcasts unrelated status traffic on iopub.
            if incoming.parent_msg_id() != Some(msg_id.as_str()) {
                continue;
            }

            match incoming.event() {
                event @ (KernelEvent::Stream { .. }
                | KernelEvent::ExecuteResult { .. }
                | KernelEvent::Error { .. }) => aggregator.push(&event),
                KernelEvent::InputRequest { prompt } => {
                    let value = prompt_resolver(&prompt);
                    let reply = input_reply(&self.client_session, &incoming.header, &value);
                    self.socket
                        .send(Message::Text(serde_json::to_string(&reply)?))
                        .await?;
                }
                KernelEvent::Status { execution_state } => {
                    if execution_state == "idle" {
                        idle_seen = true;
                    }
                }
                KernelEvent::ExecuteReply => reply_seen = true,
                KernelEvent::Unknown { msg_type } => {
                    debug!(msg_type = %msg_type, "Ignoring unmodeled kernel event");
                }
            }
        }

        Ok(aggregator.into_text())
    }

    /// Best-effort release of the session. Failures are logged, never escalated.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "Kernel socket close failed");
        }

        let mut request = self.http.delete(format!(
            "{}/api/sessions/{}",
            self.base_url, self.session_id
        ));
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("token {}", self.token));
        }

        match request.send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Jupyter session delete refused");
            }
            Ok(_) => debug!(session_id = %self.session_id, "Jupyter session shut down"),
            Err(e) => warn!(error = %e, "Jupyter session delete failed"),
        }
    }
}

/// Hands out a tool call's queued input values strictly in array order, then
/// empty strings once exhausted.
#[derive(Debug)]
pub struct InputQueue {
    values: Vec<String>,
    next: usize,
}

impl InputQueue {
    pub fn new(values: &[String]) -> Self {
        Self {
            values: values.to_vec(),
            next: 0,
        }
    }

    /// The next unused value, or `""` when the queue is exhausted.
    pub fn next_value(&mut self) -> String {
        let value = self.values.get(self.next).cloned().unwrap_or_default();
        self.next += 1;
        value
    }
}

/// The per-job execution adapter: owns the session lifecycle
/// `uncreated → active → shutdown` around `KernelSession`.
pub struct JupyterExecutor {
    client: JupyterClient,
    session: Option<KernelSession>,
}

impl JupyterExecutor {
    pub fn new(client: JupyterClient) -> Self {
        Self {
            client,
            session: None,
        }
    }
}

#[async_trait::async_trait]
impl CellExecutor for JupyterExecutor {
    async fn create_session(&mut self) -> Result<(), JupyterError> {
        if self.session.is_some() {
            // Creating twice per job is a caller logic error; the live
            // session is kept rather than torn down under the caller.
            warn!("create_session called with a session already active");
            return Ok(());
        }
        self.session = Some(self.client.create_session().await?);
        Ok(())
    }

    async fn execute_cell(&mut self, code: &str, inputs: &[String]) -> Result<String, JupyterError> {
        let session = self.session.as_mut().ok_or_else(|| {
            JupyterError::Protocol("session not initialized; call create_session first".to_string())
        })?;

        let mut queue = InputQueue::new(inputs);
        session
            .execute_codeblock(code, |_prompt| queue.next_value())
            .await
    }

    async fn shutdown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_queue_order_then_empty() {
        let mut queue = InputQueue::new(&["Alice".to_string()]);
        assert_eq!(queue.next_value(), "Alice");
        assert_eq!(queue.next_value(), "");
        assert_eq!(queue.next_value(), "");
    }

    #[test]
    fn test_input_queue_empty_from_start() {
        let mut queue = InputQueue::new(&[]);
        assert_eq!(queue.next_value(), "");
    }

    #[test]
    fn test_websocket_base_schemes() {
        assert_eq!(websocket_base("http://127.0.0.1:8888"), "ws://127.0.0.1:8888");
        assert_eq!(websocket_base("https://hub.example"), "wss://hub.example");
        assert_eq!(websocket_base("127.0.0.1:8888"), "ws://127.0.0.1:8888");
    }
}
