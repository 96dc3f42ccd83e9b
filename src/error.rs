//! Error types for the process runner.

use thiserror::Error;

/// Runner error type.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A process is already registered under the name and the operator
    /// declined to kill it.
    #[error("cannot run two `{name}` processes at once")]
    ConcurrencyConflict { name: String },

    /// No process is attached to the sink.
    #[error("no process is running in sink `{sink}`")]
    NotRunning { sink: String },

    /// The host failed to deliver a signal.
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// The request carried a blank command.
    #[error("command must not be empty")]
    EmptyCommand,
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
