use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use ratatui::{
    backend::CrosstermBackend,
    crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Color, Style},
    Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::events::RunnerEvent;
use crate::hooks::{ChannelConfirm, PromptRequest};
use crate::host::{ProcessHost, TokioProcessHost};
use crate::project::MarkerResolver;
use crate::report::FailureReport;
use crate::runner::{ProcessRunner, RunRequest};
use crate::sink;
use crate::status;
use crate::widgets::{SlotAlignment, StatusBar, StatusSlot};

/// Everything the app loop reacts to besides key presses
#[derive(Debug)]
pub enum UiEvent {
    Runner(RunnerEvent),
    /// The runner wants a yes/no answer
    Prompt(PromptRequest),
    /// `run` returned an error
    RunFailed(String),
}

/// Full-screen front end over one active sink
pub struct App {
    /// Whether the application is running
    pub running: bool,

    runner: Arc<ProcessRunner>,

    /// Request re-issued by `r`
    request: Option<RunRequest>,

    /// Failure report attached to the current request
    report: Option<Arc<FailureReport>>,

    /// Question waiting for `y`/`n`
    prompt: Option<PromptRequest>,

    /// Message to display on status bar
    pub status_message: Option<String>,

    /// Status bar with slot-based system
    pub status_bar: StatusBar,

    pub show_status_bar: bool,

    /// Keep the view at the top of new output until the operator scrolls
    hold_top: bool,
    follow_output: bool,

    /// Height of the output area at the last draw
    viewport_height: usize,

    events_tx: mpsc::UnboundedSender<UiEvent>,
    events_rx: mpsc::UnboundedReceiver<UiEvent>,
}

impl App {
    pub async fn new(config: &Config) -> Self {
        Self::with_host(config, Arc::new(TokioProcessHost::from_config(&config.runner))).await
    }

    /// App whose runner spawns through `host`
    pub async fn with_host(config: &Config, host: Arc<dyn ProcessHost>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (confirmer, mut prompts) = ChannelConfirm::new();
        let (runner_tx, mut runner_rx) = mpsc::unbounded_channel();

        let runner = ProcessRunner::new(
            host,
            Arc::new(MarkerResolver::new(config.runner.project_markers.clone())),
            Arc::new(confirmer),
        )
        .with_kill_grace(Duration::from_millis(config.runner.kill_grace_ms))
        .with_confirm_on_exit(config.runner.confirm_on_exit)
        .with_events(runner_tx);

        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = runner_rx.recv().await {
                if forward.send(UiEvent::Runner(event)).is_err() {
                    break;
                }
            }
        });

        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(prompt) = prompts.recv().await {
                // Dropping an undelivered prompt answers "no"
                if forward.send(UiEvent::Prompt(prompt)).is_err() {
                    break;
                }
            }
        });

        let mut app = Self {
            running: true,
            runner: Arc::new(runner),
            request: None,
            report: None,
            prompt: None,
            status_message: None,
            status_bar: StatusBar::new(),
            show_status_bar: config.ui.show_status_bar,
            hold_top: false,
            follow_output: config.ui.follow_output,
            viewport_height: 0,
            events_tx,
            events_rx,
        };

        app.init_status_bar();
        app
    }

    pub fn runner(&self) -> &Arc<ProcessRunner> {
        &self.runner
    }

    pub fn request(&self) -> Option<&RunRequest> {
        self.request.as_ref()
    }

    pub fn report(&self) -> Option<&Arc<FailureReport>> {
        self.report.as_ref()
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.prompt.as_ref().map(PromptRequest::message)
    }

    pub fn active_sink_id(&self) -> Option<&str> {
        self.request.as_ref().map(|request| request.sink_id.as_str())
    }

    /// Start a run in the background. Errors come back as `UiEvent::RunFailed`.
    pub fn start(&mut self, request: RunRequest) {
        let report = Arc::new(FailureReport::new());
        let run_request = if request.hooks.is_some() {
            request.clone()
        } else {
            request.clone().with_hooks(report.clone())
        };

        self.request = Some(request);
        self.report = Some(report);
        self.status_message = None;

        let runner = self.runner.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run(run_request).await {
                let _ = events.send(UiEvent::RunFailed(err.to_string()));
            }
        });
    }

    /// Run the last request again
    pub fn rerun(&mut self) {
        match self.request.clone() {
            Some(request) => self.start(request),
            None => self.set_status_message("Nothing to re-run"),
        }
    }

    /// Interrupt the process in the active sink
    pub fn interrupt(&mut self) {
        let Some(sink_id) = self.active_sink_id().map(str::to_string) else {
            return;
        };

        if let Err(err) = self.runner.interrupt_current(&sink_id) {
            self.set_status_message(err.to_string());
        }
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }

    /// Apply every queued event without blocking
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_ui_event(event);
        }
    }

    /// Wait for the next event and apply it
    pub async fn next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_ui_event(event);
                true
            }
            None => false,
        }
    }

    pub fn handle_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Runner(RunnerEvent::Started { name, sink_id }) => {
                debug!(name = %name, sink = %sink_id, "run started");
                self.hold_top = !self.follow_output && self.active_sink_id() == Some(sink_id.as_str());
            }
            UiEvent::Runner(RunnerEvent::OutputAppended { sink_id }) => {
                if self.hold_top && self.active_sink_id() == Some(sink_id.as_str()) {
                    if let Some(sink) = self.runner.sinks().get(&sink_id) {
                        sink::lock(&sink).set_read_cursor(0);
                    }
                }
            }
            UiEvent::Runner(RunnerEvent::Finished {
                name,
                sink_id,
                status,
            }) => {
                if self.active_sink_id() == Some(sink_id.as_str()) {
                    self.set_status_message(format!("{} {}", name, status));
                }
            }
            UiEvent::Prompt(prompt) => {
                // A newer question replaces an unanswered one, which counts as "no"
                if let Some(previous) = self.prompt.replace(prompt) {
                    previous.answer(false);
                }
            }
            UiEvent::RunFailed(message) => {
                warn!("Run failed: {}", message);
                self.set_status_message(message);
            }
        }
    }

    /// Answer the pending prompt, if any
    pub fn answer_prompt(&mut self, yes: bool) {
        if let Some(prompt) = self.prompt.take() {
            prompt.answer(yes);
        }
    }

    pub fn quit(&mut self) {
        self.answer_prompt(false);
        self.running = false;
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if self.prompt.is_some() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self.answer_prompt(true),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.answer_prompt(false)
                }
                KeyCode::Char('q') if ctrl => self.quit(),
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.quit(),
            KeyCode::Char('c') if ctrl => self.interrupt(),
            KeyCode::Char('r') => self.rerun(),
            KeyCode::Up | KeyCode::Char('k') => self.scroll_by(-1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_by(1),
            KeyCode::PageUp => self.scroll_by(-(self.page() as isize)),
            KeyCode::PageDown => self.scroll_by(self.page() as isize),
            KeyCode::Home | KeyCode::Char('g') => self.scroll_to_top(),
            KeyCode::End | KeyCode::Char('G') => self.follow(),
            _ => {}
        }
    }

    /// Lines visible in the output area, kept current by rendering
    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height;
    }

    fn page(&self) -> usize {
        self.viewport_height.max(1)
    }

    /// Move the view by `delta` lines. Reaching the tail resumes following.
    pub fn scroll_by(&mut self, delta: isize) {
        let Some(sink) = self.active_sink_id().and_then(|id| self.runner.sinks().get(id)) else {
            return;
        };
        self.hold_top = false;

        let page = self.page();
        let mut sink = sink::lock(&sink);
        let tail = sink.line_count().saturating_sub(page);
        let top = if sink.is_following() {
            tail
        } else {
            sink.read_line()
        };

        let target = top.saturating_add_signed(delta);
        if target >= tail {
            let end = sink.write_cursor();
            sink.set_read_cursor(end);
        } else {
            sink.set_read_line(target);
        }
    }

    pub fn scroll_to_top(&mut self) {
        if let Some(sink) = self.active_sink_id().and_then(|id| self.runner.sinks().get(id)) {
            self.hold_top = false;
            sink::lock(&sink).set_read_cursor(0);
        }
    }

    /// Jump to the newest output and keep following it
    pub fn follow(&mut self) {
        if let Some(sink) = self.active_sink_id().and_then(|id| self.runner.sinks().get(id)) {
            self.hold_top = false;
            let mut sink = sink::lock(&sink);
            let end = sink.write_cursor();
            sink.set_read_cursor(end);
        }
    }

    /// Run the application until the operator quits
    pub async fn run(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        // Target frame rate
        let frame_duration = Duration::from_millis(16);
        let mut last_frame = Instant::now();

        while self.running {
            let frame_start = Instant::now();

            self.drain_events();

            if frame_start.duration_since(last_frame) >= frame_duration {
                terminal.draw(|f| self.render(f))?;
                last_frame = frame_start;
            }

            if event::poll(Duration::from_millis(1))? {
                if let Event::Key(key) = event::read()? {
                    self.handle_key(key);
                }
            } else {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        Ok(())
    }

    /// Initialize the status bar with default slots
    pub fn init_status_bar(&mut self) {
        let label_slot = StatusSlot::new("label", "idle")
            .with_alignment(SlotAlignment::Left)
            .with_priority(100)
            .with_style(Style::default().fg(Color::Black).bg(Color::Cyan));
        self.status_bar.set_slot(label_slot);

        let message_slot = StatusSlot::new("message", "")
            .with_alignment(SlotAlignment::Left)
            .with_priority(50);
        self.status_bar.set_slot(message_slot);

        let failure_slot = StatusSlot::new("failure", "")
            .with_alignment(SlotAlignment::Right)
            .with_priority(50)
            .with_style(Style::default().fg(Color::White).bg(Color::Red));
        self.status_bar.set_slot(failure_slot);

        let status_slot = StatusSlot::new("status", "")
            .with_alignment(SlotAlignment::Right)
            .with_priority(100);
        self.status_bar.set_slot(status_slot);
    }

    /// Update status bar content from the runner
    pub fn update_status_bar(&mut self) {
        let label = self
            .active_sink_id()
            .and_then(|id| self.runner.sinks().get(id))
            .map(|sink| sink::lock(&sink).status_label().to_string())
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| "idle".to_string());
        self.status_bar.update_slot_content("label", label);

        let message = self.status_message.clone().unwrap_or_default();
        self.status_bar.update_slot_content("message", message);

        let last = self
            .request
            .as_ref()
            .and_then(|request| self.runner.last_status_for(&request.name));
        match last {
            Some(last) => {
                let style = if status::is_success(&last) {
                    Style::default().fg(Color::Black).bg(Color::Green)
                } else {
                    Style::default().fg(Color::White).bg(Color::Red)
                };
                self.status_bar.update_slot_style("status", style);
                self.status_bar.update_slot_content("status", last);
            }
            None => self.status_bar.update_slot_content("status", ""),
        }

        let failure = self
            .report
            .as_ref()
            .and_then(|report| report.first_failure())
            .map(|failure| format!("first failure {}", failure))
            .unwrap_or_default();
        self.status_bar.update_slot_content("failure", failure);
    }
}
