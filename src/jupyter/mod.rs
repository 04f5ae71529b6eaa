//! Jupyter execution adapter module
//!
//! Abstracts "run this code text inside a live, stateful interpreter,
//! supplying any requested interactive input, and return one aggregated
//! text result" over the Jupyter Server REST API and its kernel-channels
//! WebSocket.

pub mod messages;
pub mod session;

pub use messages::{Incoming, KernelEvent, OutputAggregator};
pub use session::{InputQueue, JupyterClient, JupyterError, JupyterExecutor, KernelSession};
