use std::fmt;

/// Notifications a process host emits for one process.
///
/// Every `Output` precedes the single `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Bytes written to stdout or stderr, in arrival order
    Output(Vec<u8>),

    /// The process is gone
    Terminated(Termination),
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// The process never started; the spawn error is carried as text
    SpawnFailed(String),
}

impl Termination {
    /// Terminal status string. Success is tested by the `"finished"` prefix.
    pub fn describe(&self) -> String {
        match self {
            Termination::Exited(0) => "finished".to_string(),
            Termination::Exited(code) => format!("exited abnormally with code {}", code),
            Termination::Signaled(signal) => format!("signal {}", signal_name(*signal)),
            Termination::SpawnFailed(reason) => format!("failed to start: {}", reason),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Termination::Exited(0) => Phase::Finished,
            Termination::Exited(_) | Termination::SpawnFailed(_) => Phase::Failed,
            Termination::Signaled(_) => Phase::Signaled,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }
}

impl From<std::process::ExitStatus> for Termination {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }

        Termination::Exited(-1)
    }
}

fn signal_name(signal: i32) -> String {
    match signal {
        1 => "hangup".to_string(),
        2 => "interrupt".to_string(),
        3 => "quit".to_string(),
        9 => "killed".to_string(),
        15 => "terminated".to_string(),
        other => other.to_string(),
    }
}

/// Lifecycle phase of a logical process name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Running,
    Finished,
    Failed,
    Signaled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Finished => "finished",
            Phase::Failed => "failed",
            Phase::Signaled => "signaled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label shown on a sink: `<name>:<phase>`
pub fn status_label(name: &str, phase: Phase) -> String {
    format!("{}:{}", name, phase)
}

/// Notifications the runner publishes for whoever draws the sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Started { name: String, sink_id: String },
    OutputAppended { sink_id: String },
    Finished { name: String, sink_id: String, status: String },
}
