//! Prometheus metrics for observability
//!
//! Global registry of the grader's operational metrics, exposed in text
//! format at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};

lazy_static! {
    /// Grading jobs by outcome ("success", "round_limit", "error")
    pub static ref GRADING_JOBS: CounterVec = register_counter_vec!(
        "cellgrader_jobs_total",
        "Grading jobs completed, by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Whether a grading job is currently in flight (0 or 1)
    pub static ref JOBS_IN_FLIGHT: Gauge = register_gauge!(
        "cellgrader_jobs_in_flight",
        "Grading jobs currently running"
    )
    .unwrap();

    /// Rounds (model calls) per completed grading conversation
    pub static ref AGENT_ROUNDS: Histogram = register_histogram!(
        "cellgrader_agent_rounds",
        "Model rounds per grading conversation",
        vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0]
    )
    .unwrap();

    /// Total cell executions requested by the judging model
    pub static ref TOOL_CALLS: Counter = register_counter!(
        "cellgrader_tool_calls_total",
        "Cell executions requested by the judging model"
    )
    .unwrap();

    /// Judging-model call latency in seconds
    pub static ref LLM_CALL_TIME: Histogram = register_histogram!(
        "cellgrader_llm_call_seconds",
        "Judging model call duration in seconds",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    /// Single-cell execution latency in seconds
    pub static ref CELL_EXECUTION_TIME: Histogram = register_histogram!(
        "cellgrader_cell_execution_seconds",
        "Cell execution duration in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    )
    .unwrap();
}

/// Render every registered metric in Prometheus text format.
pub fn gather() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Metrics encoding failed");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
