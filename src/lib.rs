//! Runs external build and test commands one at a time per name, streaming
//! their colored output into sinks and remembering how the last run ended.

pub mod ansi;
pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod host;
pub mod logging;
pub mod project;
pub mod report;
pub mod runner;
pub mod sink;
pub mod status;
pub mod ui;
pub mod widgets;

// Re-export main types for convenience
pub use app::{App, UiEvent};
pub use error::{RunnerError, RunnerResult};
pub use events::{Phase, ProcessEvent, RunnerEvent, Termination};
pub use hooks::{AlwaysConfirm, ChannelConfirm, Confirm, NeverConfirm, RunHooks};
pub use host::{CommandSpec, ProcessControl, ProcessHost, SpawnedProcess, TokioProcessHost};
pub use project::{MarkerResolver, NoProject, ProjectResolver};
pub use report::FailureReport;
pub use runner::{append_output, ProcessRunner, RunHandle, RunRequest};
pub use sink::{OutputSink, SharedSink, SinkRegistry};
pub use status::StatusRegistry;
