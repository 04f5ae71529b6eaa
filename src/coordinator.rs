//! Job coordinator - one grading job, one observer, at a time
//!
//! Owns the only shared mutable state in the process: the busy flag and the
//! observer channel, both mutated exclusively through the coordinator's own
//! methods. At most one grading job is ever in flight; a submission arriving
//! while busy is refused with an error notice. At most one observer is ever
//! registered; a second connection attempt is told about the conflict and
//! dropped. A job whose observer disconnects mid-run still completes - its
//! notifications are simply dropped, not buffered.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::agent::{AgentConfig, AgentError, AgentProgress, GradeAgent};
use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::grading::{self, GradeRecord, JudgementParseError};
use crate::jupyter::{JupyterClient, JupyterExecutor};
use crate::metrics::JOBS_IN_FLIGHT;
use crate::notebook::Notebook;

/// A typed notice pushed to the observer. The `header` field is the
/// discriminator the observer page switches on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "header", rename_all = "snake_case")]
pub enum Notice {
    /// Informational progress line for the live log
    GradeInfo { message: String },
    /// Terminal job-done signal; the client queue advances on this
    Grade { filename: String },
    /// The structured grade result, `message` holding the JSON array
    FinalGrade { filename: String, message: String },
    /// A job-fatal failure, reported once
    Error { message: String },
    /// Sent to a second observer before it is disconnected
    TabConflict,
}

/// One notebook+rubric pair to grade, validated before it gets here.
#[derive(Debug, Clone)]
pub struct GradingJob {
    pub filename: String,
    pub notebook: Notebook,
    pub rubric: String,
}

/// Error type for one grading job
#[derive(Debug)]
pub enum JobError {
    Agent(AgentError),
    Judgement(JudgementParseError),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Agent(e) => write!(f, "{}", e),
            JobError::Judgement(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for JobError {}

impl From<AgentError> for JobError {
    fn from(e: AgentError) -> Self {
        JobError::Agent(e)
    }
}

impl From<JudgementParseError> for JobError {
    fn from(e: JudgementParseError) -> Self {
        JobError::Judgement(e)
    }
}

#[derive(Default)]
struct CoordinatorState {
    busy: bool,
    observer: Option<UnboundedSender<Notice>>,
}

/// The single serialization point for grading jobs and observer traffic
pub struct JobCoordinator {
    config: Config,
    state: Mutex<CoordinatorState>,
}

impl JobCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Register the observing client. Refused while another observer is
    /// still connected; a sender whose receiver is gone counts as
    /// disconnected and is replaced.
    pub async fn register_observer(&self) -> Result<UnboundedReceiver<Notice>, Notice> {
        let mut state = self.state.lock().await;

        if let Some(existing) = &state.observer {
            if !existing.is_closed() {
                info!("Second observer refused");
                return Err(Notice::TabConflict);
            }
        }

        let (tx, rx) = unbounded_channel();
        state.observer = Some(tx);
        info!("Observer registered");
        Ok(rx)
    }

    /// Whether a grading job is currently in flight.
    pub async fn busy(&self) -> bool {
        self.state.lock().await.busy
    }

    /// Send a notice to the observer, if one is connected. Notices to a
    /// disconnected observer are dropped, never buffered or retried.
    async fn notify(&self, notice: Notice) {
        let state = self.state.lock().await;
        if let Some(observer) = &state.observer {
            let _ = observer.send(notice);
        }
    }

    /// Claim the busy flag. Returns false if a job is already in flight.
    async fn begin_job(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.busy {
            return false;
        }
        state.busy = true;
        JOBS_IN_FLIGHT.set(1.0);
        true
    }

    async fn finish_job(&self) {
        let mut state = self.state.lock().await;
        state.busy = false;
        JOBS_IN_FLIGHT.set(0.0);
    }

    /// Accept a job for grading. Returns false (after notifying the
    /// observer) when refused because a job is already running.
    pub async fn submit(self: Arc<Self>, job: GradingJob) -> bool {
        if !self.begin_job().await {
            warn!(filename = %job.filename, "Submission refused while a job is in flight");
            self.notify(Notice::Error {
                message: format!(
                    "A grading job is already in progress; {} was refused",
                    job.filename
                ),
            })
            .await;
            return false;
        }

        tokio::spawn(async move {
            self.run_job(job).await;
        });
        true
    }

    /// Run one job to completion and report it. Every exit path releases the
    /// busy flag and emits the terminal `grade` notice so one bad submission
    /// can never wedge the queue.
    async fn run_job(&self, job: GradingJob) {
        let filename = job.filename.clone();
        info!(filename = %filename, "Grading job started");

        match self.grade(job).await {
            Ok(records) => {
                let message =
                    serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string());
                self.notify(Notice::FinalGrade {
                    filename: filename.clone(),
                    message,
                })
                .await;
                info!(filename = %filename, questions = records.len(), "Grading job finished");
            }
            Err(e) => {
                warn!(filename = %filename, error = %e, "Grading job failed");
                self.notify(Notice::Error {
                    message: e.to_string(),
                })
                .await;
            }
        }

        self.notify(Notice::Grade { filename }).await;
        self.finish_job().await;
    }

    async fn grade(&self, job: GradingJob) -> Result<Vec<GradeRecord>, JobError> {
        let model = GeminiClient::new(
            self.config.gemini_base_url.clone(),
            self.config.gemini_api_key.clone(),
            self.config.gemini_model.clone(),
        );
        let executor = JupyterExecutor::new(JupyterClient::new(
            self.config.jupyter_base_url.clone(),
            self.config.jupyter_token.clone(),
        ));
        let mut agent = GradeAgent::new(
            model,
            executor,
            AgentConfig {
                max_rounds: self.config.max_rounds,
                system_prompt: None,
            },
        );

        // Progress goes to whoever observes at job start; the adapter never
        // truncates, so the display budget is applied here and only here.
        let observer = self.state.lock().await.observer.clone();
        let preview_chars = self.config.output_preview_chars;
        let on_progress = move |progress: AgentProgress| {
            let Some(observer) = &observer else { return };
            let message = match progress {
                AgentProgress::ExecutingCell(index) => format!("Executing cell {}", index),
                AgentProgress::CellOutput(output) => {
                    format!("Output: {}", truncate_chars(&output, preview_chars))
                }
            };
            let _ = observer.send(Notice::GradeInfo { message });
        };

        let outcome = agent.run(&job.notebook, &job.rubric, on_progress).await?;
        let records = grading::grade_commentary(&outcome.commentary)?;
        Ok(records)
    }
}

/// First `max_chars` characters of `s`, boundary-safe.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> JobCoordinator {
        JobCoordinator::new(Config::default())
    }

    #[tokio::test]
    async fn test_single_observer_invariant() {
        let coordinator = coordinator();

        let first = coordinator.register_observer().await;
        assert!(first.is_ok());

        // The first observer is still connected: the second is refused with
        // a tab-conflict notice and the first keeps receiving.
        match coordinator.register_observer().await {
            Err(Notice::TabConflict) => {}
            other => panic!("expected tab conflict, got {:?}", other.map(|_| ())),
        }

        coordinator
            .notify(Notice::GradeInfo {
                message: "still here".to_string(),
            })
            .await;
        let mut rx = first.unwrap();
        match rx.recv().await {
            Some(Notice::GradeInfo { message }) => assert_eq!(message, "still here"),
            other => panic!("expected grade_info, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnected_observer_is_replaced() {
        let coordinator = coordinator();

        let first = coordinator.register_observer().await.unwrap();
        drop(first);

        assert!(coordinator.register_observer().await.is_ok());
    }

    #[tokio::test]
    async fn test_busy_flag_is_strictly_exclusive() {
        let coordinator = coordinator();

        assert!(coordinator.begin_job().await);
        assert!(coordinator.busy().await);
        assert!(!coordinator.begin_job().await);

        coordinator.finish_job().await;
        assert!(!coordinator.busy().await);
        assert!(coordinator.begin_job().await);
    }

    #[tokio::test]
    async fn test_notify_without_observer_is_dropped() {
        let coordinator = coordinator();
        // No observer registered: nothing to deliver to, nothing buffered.
        coordinator
            .notify(Notice::GradeInfo {
                message: "into the void".to_string(),
            })
            .await;
    }

    #[test]
    fn test_notice_wire_format() {
        let info = serde_json::to_value(Notice::GradeInfo {
            message: "Executing cell 2".to_string(),
        })
        .unwrap();
        assert_eq!(info["header"], "grade_info");
        assert_eq!(info["message"], "Executing cell 2");

        let done = serde_json::to_value(Notice::Grade {
            filename: "a.ipynb".to_string(),
        })
        .unwrap();
        assert_eq!(done["header"], "grade");
        assert_eq!(done["filename"], "a.ipynb");

        let conflict = serde_json::to_value(Notice::TabConflict).unwrap();
        assert_eq!(conflict["header"], "tab_conflict");

        let final_grade = serde_json::to_value(Notice::FinalGrade {
            filename: "a.ipynb".to_string(),
            message: "[]".to_string(),
        })
        .unwrap();
        assert_eq!(final_grade["header"], "final_grade");
        assert_eq!(final_grade["message"], "[]");
    }

    #[test]
    fn test_truncate_chars_is_boundary_safe() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
