//! # Process Runner
//!
//! Runs external commands under a logical name, one at a time per name,
//! streaming their output into a sink.
//!
//! ## Lifecycle
//!
//! `Idle -> Starting -> Running -> {Finished | Failed | Signaled} -> Idle`
//!
//! A `run` under a name that already has a process first resolves the
//! conflict: a stopped process, or one that does not ask for confirmation, is
//! terminated silently; otherwise the operator is asked and a "no" aborts the
//! new run with [`RunnerError::ConcurrencyConflict`].
//!
//! ## Handlers
//!
//! Each process gets a task consuming its [`ProcessEvent`]s. Output is
//! appended to the sink and the whole sink is re-rendered. The termination
//! event runs the invocation's hooks, records the status and relabels the
//! sink. A run that was replaced by a later one leaves the sink alone but
//! still records its status and calls `on_exit`. A run whose sink was
//! destroyed drops its notifications.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{Preset, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::events::{status_label, Phase, ProcessEvent, RunnerEvent, Termination};
use crate::hooks::{Confirm, RunHooks};
use crate::host::{CommandSpec, ProcessControl, ProcessHost, TokioProcessHost};
use crate::project::{self, MarkerResolver, ProjectResolver};
use crate::sink::{self, OutputSink, SharedSink, SinkRegistry};
use crate::status::StatusRegistry;

/// Everything needed to start one run
#[derive(Clone)]
pub struct RunRequest {
    pub command: String,
    /// Logical process name; at most one process runs per name
    pub name: String,
    pub sink_id: String,
    /// Mode activated on the sink
    pub mode: Option<String>,
    pub hooks: Option<Arc<dyn RunHooks>>,
    /// Caller's directory, defaults to the current directory
    pub cwd: Option<PathBuf>,
    /// Defaults to the runner's setting
    pub confirm_on_exit: Option<bool>,
}

impl RunRequest {
    pub fn new(
        command: impl Into<String>,
        name: impl Into<String>,
        sink_id: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            name: name.into(),
            sink_id: sink_id.into(),
            mode: None,
            hooks: None,
            cwd: None,
            confirm_on_exit: None,
        }
    }

    /// Request for a configured preset; the preset name is the process name
    pub fn from_preset(name: &str, preset: &Preset) -> Self {
        Self::new(&preset.command, name, &preset.sink).with_mode(&preset.mode)
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn confirm_on_exit(mut self, confirm: bool) -> Self {
        self.confirm_on_exit = Some(confirm);
        self
    }
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("command", &self.command)
            .field("name", &self.name)
            .field("sink_id", &self.sink_id)
            .field("mode", &self.mode)
            .field("hooks", &self.hooks.is_some())
            .field("cwd", &self.cwd)
            .field("confirm_on_exit", &self.confirm_on_exit)
            .finish()
    }
}

/// How a run ended, as seen through its handle
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pending,
    Completed(String),
    /// Sink destroyed, or the host went away
    Discarded,
}

/// Handle to a started run
#[derive(Clone)]
pub struct RunHandle {
    run_id: u64,
    name: String,
    sink: SharedSink,
    control: Arc<dyn ProcessControl>,
    outcome: watch::Receiver<Outcome>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Wait until the termination handler ran. Returns the terminal status
    /// string, or `None` when the sink was destroyed first.
    pub async fn wait(&mut self) -> Option<String> {
        let outcome = self
            .outcome
            .wait_for(|outcome| *outcome != Outcome::Pending)
            .await
            .ok()?;

        match &*outcome {
            Outcome::Completed(status) => Some(status.clone()),
            _ => None,
        }
    }
}

struct Slot {
    run_id: u64,
    sink_id: String,
    control: Arc<dyn ProcessControl>,
    superseded: Arc<AtomicBool>,
}

#[derive(Default)]
struct Slots {
    running: HashMap<String, Slot>,
    starting: HashSet<String>,
}

/// State shared between the runner and its per-process tasks
#[derive(Default)]
struct Shared {
    slots: Mutex<Slots>,
    statuses: StatusRegistry,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove the slot for `name` only if it still belongs to `run_id`
    fn release(&self, name: &str, run_id: u64) {
        let mut slots = self.slots();
        if slots.running.get(name).is_some_and(|slot| slot.run_id == run_id) {
            slots.running.remove(name);
        }
    }
}

/// Runs named external processes into sinks
pub struct ProcessRunner {
    host: Arc<dyn ProcessHost>,
    resolver: Arc<dyn ProjectResolver>,
    confirmer: Arc<dyn Confirm>,
    sinks: SinkRegistry,
    shared: Arc<Shared>,
    kill_grace: Duration,
    confirm_on_exit: bool,
    events: Option<mpsc::UnboundedSender<RunnerEvent>>,
    /// Launches under one name are serialized; different names never wait
    launch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_run_id: AtomicU64,
}

impl ProcessRunner {
    pub fn new(
        host: Arc<dyn ProcessHost>,
        resolver: Arc<dyn ProjectResolver>,
        confirmer: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            host,
            resolver,
            confirmer,
            sinks: SinkRegistry::new(),
            shared: Arc::new(Shared::default()),
            kill_grace: Duration::from_millis(1000),
            confirm_on_exit: true,
            events: None,
            launch_locks: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Runner with the shell host and marker-based project lookup
    pub fn from_config(config: &RunnerConfig, confirmer: Arc<dyn Confirm>) -> Self {
        Self::new(
            Arc::new(TokioProcessHost::from_config(config)),
            Arc::new(MarkerResolver::new(config.project_markers.clone())),
            confirmer,
        )
        .with_kill_grace(Duration::from_millis(config.kill_grace_ms))
        .with_confirm_on_exit(config.confirm_on_exit)
    }

    pub fn with_sinks(mut self, sinks: SinkRegistry) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_confirm_on_exit(mut self, confirm: bool) -> Self {
        self.confirm_on_exit = confirm;
        self
    }

    /// Publish lifecycle notifications on this channel
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunnerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    pub fn statuses(&self) -> &StatusRegistry {
        &self.shared.statuses
    }

    /// Start `request.command` under `request.name`
    pub async fn run(&self, request: RunRequest) -> RunnerResult<RunHandle> {
        if request.command.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }

        let name = request.name.clone();
        let launch_lock = self.launch_lock(&name);
        let _launch = launch_lock.lock().await;

        self.shared.slots().starting.insert(name.clone());
        let result = self.launch(request).await;
        self.shared.slots().starting.remove(&name);

        result
    }

    fn launch_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .launch_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    async fn launch(&self, request: RunRequest) -> RunnerResult<RunHandle> {
        let RunRequest {
            command,
            name,
            sink_id,
            mode,
            hooks,
            cwd,
            confirm_on_exit,
        } = request;

        let cwd = cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let working_dir = project::resolve_working_dir(self.resolver.as_ref(), &cwd);

        let sink = self.sinks.get_or_create(&sink_id);

        let existing = self.shared.slots().running.get(&name).map(|slot| {
            (
                slot.run_id,
                slot.control.clone(),
                slot.superseded.clone(),
            )
        });
        if let Some((run_id, control, superseded)) = existing {
            self.replace(&name, run_id, control, superseded).await?;
        }

        sink::lock(&sink).clear();

        let spawned = self.host.spawn(&CommandSpec {
            command: command.clone(),
            working_dir,
            confirm_on_exit: confirm_on_exit.unwrap_or(self.confirm_on_exit),
        });

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let superseded = Arc::new(AtomicBool::new(false));
        self.shared.slots().running.insert(
            name.clone(),
            Slot {
                run_id,
                sink_id: sink_id.clone(),
                control: spawned.control.clone(),
                superseded: superseded.clone(),
            },
        );

        // Labelled before the handlers start so an immediate termination
        // (spawn failure) has the last word
        {
            let mut sink = sink::lock(&sink);
            if let Some(mode) = &mode {
                sink.activate_mode(mode);
            }
            sink.show();
            sink.set_status_label(status_label(&name, Phase::Running));
        }

        let (outcome_tx, outcome) = watch::channel(Outcome::Pending);
        let context = RunContext {
            run_id,
            name: name.clone(),
            sink_id: sink_id.clone(),
            sink: sink.clone(),
            hooks,
            superseded,
            shared: self.shared.clone(),
            events: self.events.clone(),
            outcome: outcome_tx,
        };

        info!(name = %name, sink = %sink_id, command = %command, run_id, "started run");
        self.publish(RunnerEvent::Started {
            name: name.clone(),
            sink_id,
        });
        tokio::spawn(context.consume(spawned.events));

        Ok(RunHandle {
            run_id,
            name,
            sink,
            control: spawned.control,
            outcome,
        })
    }

    /// Clear the way for a new run under `name`
    async fn replace(
        &self,
        name: &str,
        run_id: u64,
        control: Arc<dyn ProcessControl>,
        superseded: Arc<AtomicBool>,
    ) -> RunnerResult<()> {
        if control.is_running() && control.requires_exit_confirmation() {
            let prompt = format!("A `{}` process already running; kill it?", name);
            if !self.confirmer.confirm(&prompt).await {
                info!(name, "kept running process, new run aborted");
                return Err(RunnerError::ConcurrencyConflict {
                    name: name.to_string(),
                });
            }
        }

        superseded.store(true, Ordering::SeqCst);
        self.shared.release(name, run_id);
        debug!(name, run_id, "replacing previous run");

        terminate(control.as_ref(), self.kill_grace).await;
        Ok(())
    }

    /// Interrupt the process attached to a sink
    pub fn interrupt_current(&self, sink_id: &str) -> RunnerResult<()> {
        let control = self
            .shared
            .slots()
            .running
            .values()
            .find(|slot| slot.sink_id == sink_id && slot.control.is_running())
            .map(|slot| slot.control.clone())
            .ok_or_else(|| RunnerError::NotRunning {
                sink: sink_id.to_string(),
            })?;

        info!(sink = sink_id, pid = ?control.pid(), "interrupting process");
        control.interrupt()
    }

    /// Whether the most recently completed run, of any name, finished cleanly
    pub fn last_run_succeeded(&self) -> bool {
        self.shared.statuses.last_succeeded()
    }

    pub fn last_status(&self) -> Option<String> {
        self.shared.statuses.last()
    }

    pub fn last_status_for(&self, name: &str) -> Option<String> {
        self.shared.statuses.for_name(name)
    }

    pub fn run_succeeded(&self, name: &str) -> bool {
        self.shared.statuses.succeeded(name)
    }

    pub fn phase(&self, name: &str) -> Phase {
        let slots = self.shared.slots();
        if slots.running.contains_key(name) {
            Phase::Running
        } else if slots.starting.contains(name) {
            Phase::Starting
        } else {
            Phase::Idle
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.shared
            .slots()
            .running
            .get(name)
            .is_some_and(|slot| slot.control.is_running())
    }

    /// Names with a registered process
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.slots().running.keys().cloned().collect();
        names.sort();
        names
    }

    /// Kill every registered process without waiting
    pub fn shutdown(&self) {
        let controls: Vec<Arc<dyn ProcessControl>> = self
            .shared
            .slots()
            .running
            .values()
            .map(|slot| slot.control.clone())
            .collect();

        for control in controls.into_iter().filter(|control| control.is_running()) {
            if let Err(err) = control.force_terminate() {
                warn!("Failed to kill process on shutdown: {}", err);
            }
        }
    }

    fn publish(&self, event: RunnerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Interrupt, wait, then kill. Failures are logged and otherwise ignored.
async fn terminate(control: &dyn ProcessControl, grace: Duration) {
    if !control.is_running() {
        return;
    }

    if let Err(err) = control.interrupt() {
        debug!("Interrupt failed during replacement: {}", err);
    }

    tokio::time::sleep(grace).await;

    if control.is_running() {
        if let Err(err) = control.force_terminate() {
            debug!("Forced termination failed during replacement: {}", err);
        }
    }
}

/// Append a chunk of process output to a sink.
///
/// The whole sink is re-rendered so escape sequences split across chunks come
/// out right. A reader trailing the output keeps trailing it.
pub fn append_output(sink: &mut OutputSink, bytes: &[u8]) {
    let following = sink.is_following();
    sink.append(bytes);
    sink.render();
    if following {
        sink.set_read_cursor(sink.write_cursor());
    }
}

/// Per-invocation state threaded from spawn to the handlers
struct RunContext {
    run_id: u64,
    name: String,
    sink_id: String,
    sink: SharedSink,
    hooks: Option<Arc<dyn RunHooks>>,
    superseded: Arc<AtomicBool>,
    shared: Arc<Shared>,
    events: Option<mpsc::UnboundedSender<RunnerEvent>>,
    outcome: watch::Sender<Outcome>,
}

impl RunContext {
    async fn consume(self, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(bytes) => self.handle_output(&bytes),
                ProcessEvent::Terminated(termination) => {
                    self.handle_termination(termination);
                    return;
                }
            }
        }

        warn!(name = %self.name, run_id = self.run_id, "process events ended without termination");
        self.shared.release(&self.name, self.run_id);
        self.outcome.send_replace(Outcome::Discarded);
    }

    fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    fn handle_output(&self, bytes: &[u8]) {
        {
            let mut sink = sink::lock(&self.sink);
            if sink.is_closed() || self.is_superseded() {
                return;
            }
            append_output(&mut sink, bytes);
        }

        self.publish(RunnerEvent::OutputAppended {
            sink_id: self.sink_id.clone(),
        });
    }

    fn handle_termination(self, termination: Termination) {
        let status = termination.describe();
        let phase = termination.phase();

        // The sink belongs to the replacing run now
        if self.is_superseded() {
            debug!(name = %self.name, run_id = self.run_id, status = %status, "replaced run ended");
            self.shared.statuses.record(&self.name, &status);
            if let Some(hooks) = &self.hooks {
                hooks.on_exit(&status);
            }
            self.outcome.send_replace(Outcome::Completed(status));
            return;
        }

        {
            let mut sink = sink::lock(&self.sink);
            if sink.is_closed() {
                drop(sink);
                debug!(name = %self.name, run_id = self.run_id, "sink gone, dropping termination");
                self.shared.release(&self.name, self.run_id);
                self.outcome.send_replace(Outcome::Discarded);
                return;
            }

            if let Some(hooks) = &self.hooks {
                hooks.on_render(&mut sink);
            }
        }

        self.shared.statuses.record(&self.name, &status);

        if let Some(hooks) = &self.hooks {
            hooks.on_exit(&status);
        }

        sink::lock(&self.sink).set_status_label(status_label(&self.name, phase));
        self.shared.release(&self.name, self.run_id);

        info!(name = %self.name, run_id = self.run_id, status = %status, "run ended");
        self.publish(RunnerEvent::Finished {
            name: self.name.clone(),
            sink_id: self.sink_id.clone(),
            status: status.clone(),
        });
        self.outcome.send_replace(Outcome::Completed(status));
    }

    fn publish(&self, event: RunnerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_accumulate() {
        let mut sink = OutputSink::new("out");
        append_output(&mut sink, b"A");
        append_output(&mut sink, b"BC");
        append_output(&mut sink, b"D");
        assert_eq!(sink.content(), "ABCD");
    }

    #[test]
    fn test_following_reader_keeps_following() {
        let mut sink = OutputSink::new("out");
        append_output(&mut sink, b"line 1\n");
        assert!(sink.is_following());

        append_output(&mut sink, b"line 2\n");
        assert_eq!(sink.read_cursor(), sink.write_cursor());
    }

    #[test]
    fn test_scrolled_reader_stays_put() {
        let mut sink = OutputSink::new("out");
        append_output(&mut sink, b"line 1\nline 2\n");
        sink.set_read_cursor(3);

        append_output(&mut sink, b"line 3\n");
        assert_eq!(sink.read_cursor(), 3);
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut sink = OutputSink::new("out");
        append_output(&mut sink, b"\x1b[3");
        assert_eq!(sink.content(), "");

        append_output(&mut sink, b"2mOK\x1b[0m");
        assert_eq!(sink.content(), "OK");
        assert_eq!(
            sink.rendered().style_at(0),
            ratatui::style::Style::default().fg(ratatui::style::Color::Green)
        );
    }

    #[test]
    fn test_rerender_is_idempotent() {
        let mut sink = OutputSink::new("out");
        append_output(&mut sink, b"\x1b[31mred\x1b[0m plain");
        let first = sink.rendered().clone();

        sink.render();
        sink.render();
        assert_eq!(sink.rendered(), &first);
    }

    #[test]
    fn test_request_builder() {
        let preset = Preset::new("mix test", "alchemist-mix-test", "elixir");
        let request = RunRequest::from_preset("mix-test", &preset)
            .in_dir("/tmp")
            .confirm_on_exit(false);

        assert_eq!(request.command, "mix test");
        assert_eq!(request.name, "mix-test");
        assert_eq!(request.sink_id, "alchemist-mix-test");
        assert_eq!(request.mode.as_deref(), Some("elixir"));
        assert_eq!(request.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(request.confirm_on_exit, Some(false));
    }
}
