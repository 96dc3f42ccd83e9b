//! Process host
//!
//! Spawns external commands and turns their output and exit into
//! [`ProcessEvent`]s on a per-process channel. The runner only sees the
//! [`ProcessHost`] and [`ProcessControl`] traits, so tests and embedders can
//! supply their own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::events::{ProcessEvent, Termination};

const READ_CHUNK: usize = 4096;

/// What to spawn and where
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub working_dir: PathBuf,
    /// Whether killing the process while it runs needs operator confirmation
    pub confirm_on_exit: bool,
}

/// Control surface of a spawned process
pub trait ProcessControl: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to stop (SIGINT)
    fn interrupt(&self) -> RunnerResult<()>;

    /// Kill the process without waiting for it to cooperate
    fn force_terminate(&self) -> RunnerResult<()>;

    fn is_running(&self) -> bool;

    fn requires_exit_confirmation(&self) -> bool;
}

/// A spawned process: its control plus the stream of its events
pub struct SpawnedProcess {
    pub control: Arc<dyn ProcessControl>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Spawns processes. Spawn errors are not returned; they arrive as a
/// `Terminated(SpawnFailed)` event.
pub trait ProcessHost: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> SpawnedProcess;
}

/// Runs commands through the shell with `tokio::process`
#[derive(Debug, Clone)]
pub struct TokioProcessHost {
    shell: String,
    env: HashMap<String, String>,
}

impl Default for TokioProcessHost {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl TokioProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let mut env = config.env.clone();
        env.insert("TERM".to_string(), config.term.clone());

        Self {
            shell: config.shell.clone(),
            env,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);

        #[cfg(unix)]
        {
            cmd.arg("-c").arg(command);
            // Own process group so signals reach the whole pipeline
            cmd.process_group(0);
        }

        #[cfg(not(unix))]
        cmd.arg("/C").arg(command);

        cmd
    }
}

impl ProcessHost for TokioProcessHost {
    fn spawn(&self, spec: &CommandSpec) -> SpawnedProcess {
        let (tx, events) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();

        let mut cmd = self.shell_command(&spec.command);
        cmd.current_dir(&spec.working_dir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let pid = match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                running.store(true, Ordering::SeqCst);
                info!(command = %spec.command, ?pid, dir = %spec.working_dir.display(), "spawned process");

                let stdout_task = tokio::spawn(pump(child.stdout.take(), tx.clone()));
                let stderr_task = tokio::spawn(pump(child.stderr.take(), tx.clone()));

                let running = running.clone();
                let kill = kill.clone();
                tokio::spawn(async move {
                    let status = tokio::select! {
                        status = child.wait() => status,
                        _ = kill.cancelled() => {
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    };

                    // Drain the pipes so every Output precedes Terminated
                    let _ = futures::future::join(stdout_task, stderr_task).await;
                    running.store(false, Ordering::SeqCst);

                    let termination = match status {
                        Ok(status) => Termination::from(status),
                        Err(err) => {
                            warn!("Error waiting for process {:?}: {}", pid, err);
                            Termination::Exited(-1)
                        }
                    };
                    debug!(?pid, ?termination, "process terminated");
                    let _ = tx.send(ProcessEvent::Terminated(termination));
                });

                pid
            }
            Err(err) => {
                warn!(command = %spec.command, "failed to spawn process: {}", err);
                let _ = tx.send(ProcessEvent::Terminated(Termination::SpawnFailed(
                    err.to_string(),
                )));
                None
            }
        };

        SpawnedProcess {
            control: Arc::new(TokioProcessControl {
                pid,
                running,
                kill,
                confirm_on_exit: spec.confirm_on_exit,
            }),
            events,
        }
    }
}

async fn pump<R>(reader: Option<R>, tx: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(ProcessEvent::Output(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!("Error reading process output: {}", err);
                break;
            }
        }
    }
}

struct TokioProcessControl {
    pid: Option<u32>,
    running: Arc<AtomicBool>,
    kill: CancellationToken,
    confirm_on_exit: bool,
}

impl ProcessControl for TokioProcessControl {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn interrupt(&self) -> RunnerResult<()> {
        match self.pid {
            Some(pid) if self.is_running() => interrupt_group(pid),
            _ => Ok(()),
        }
    }

    fn force_terminate(&self) -> RunnerResult<()> {
        if !self.is_running() {
            return Ok(());
        }

        // Reach children the shell forked; the child itself is killed below
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }

        self.kill.cancel();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn requires_exit_confirmation(&self) -> bool {
        self.confirm_on_exit
    }
}

#[cfg(unix)]
fn interrupt_group(pid: u32) -> RunnerResult<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGINT)
}

#[cfg(not(unix))]
fn interrupt_group(pid: u32) -> RunnerResult<()> {
    Err(RunnerError::Signal {
        pid,
        reason: "interrupt is not supported on this platform".to_string(),
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> RunnerResult<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), signal).map_err(|err| RunnerError::Signal {
        pid,
        reason: err.to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(command: &str) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            working_dir: std::env::temp_dir(),
            confirm_on_exit: true,
        }
    }

    async fn collect(mut events: mpsc::UnboundedReceiver<ProcessEvent>) -> (Vec<u8>, Termination) {
        let mut output = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(bytes) => output.extend(bytes),
                ProcessEvent::Terminated(termination) => return (output, termination),
            }
        }
        panic!("channel closed without a termination event");
    }

    #[tokio::test]
    async fn test_output_then_exit_code() {
        let host = TokioProcessHost::new();
        let process = host.spawn(&spec("printf hello; exit 3"));

        let (output, termination) = collect(process.events).await;
        assert_eq!(output, b"hello");
        assert_eq!(termination, Termination::Exited(3));
        assert!(!process.control.is_running());
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let host = TokioProcessHost::new();
        let process = host.spawn(&spec("printf oops >&2"));

        let (output, termination) = collect(process.events).await;
        assert_eq!(output, b"oops");
        assert!(termination.success());
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let host = TokioProcessHost::new().with_env("ALCHEMIST_TEST_VAR", "42");
        let process = host.spawn(&spec("printf \"$ALCHEMIST_TEST_VAR $TERM\""));

        let (output, _) = collect(process.events).await;
        assert_eq!(output, b"42 xterm-256color");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_termination() {
        let config = RunnerConfig {
            shell: "/nonexistent/alchemist-shell".to_string(),
            ..RunnerConfig::default()
        };
        let host = TokioProcessHost::from_config(&config);
        let process = host.spawn(&spec("true"));

        let (output, termination) = collect(process.events).await;
        assert!(output.is_empty());
        assert!(matches!(termination, Termination::SpawnFailed(_)));
        assert!(process.control.pid().is_none());
        assert!(!process.control.is_running());
    }

    #[tokio::test]
    async fn test_interrupt_stops_process() {
        let host = TokioProcessHost::new();
        let process = host.spawn(&spec("sleep 30"));

        assert!(process.control.is_running());
        process.control.interrupt().unwrap();

        let (_, termination) = collect(process.events).await;
        assert_eq!(termination.phase(), crate::events::Phase::Signaled);
    }

    #[tokio::test]
    async fn test_force_terminate() {
        let host = TokioProcessHost::new();
        let process = host.spawn(&spec("trap '' INT; sleep 30"));

        process.control.force_terminate().unwrap();

        let (_, termination) = collect(process.events).await;
        assert!(!termination.success());
        assert!(!process.control.is_running());
    }
}
