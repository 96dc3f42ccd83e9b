//! Integration tests for the application state and key handling
//!
//! Tests the App struct against a scripted process host

mod common;

use std::sync::Arc;
use std::time::Duration;

use alchemist::config::Config;
use alchemist::sink;
use alchemist::{App, RunRequest};
use common::{FakeHost, TIMEOUT};
use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::time::timeout;

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn ctrl(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.runner.kill_grace_ms = 20;
    config
}

fn request() -> RunRequest {
    RunRequest::new("mix test", "mix-test", "alchemist-mix-test").in_dir(std::env::temp_dir())
}

/// Apply events until `done` holds
async fn pump_until(app: &mut App, done: impl Fn(&App) -> bool) {
    timeout(TIMEOUT, async {
        while !done(app) {
            app.next_event().await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for_spawns(host: &FakeHost, count: usize) {
    timeout(TIMEOUT, async {
        while host.spawn_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_app_creation() {
    let app = App::with_host(&test_config(), FakeHost::new()).await;

    assert!(app.running);
    assert!(app.request().is_none());
    assert!(app.pending_prompt().is_none());
    assert!(app.status_message.is_none());
    assert!(app.show_status_bar);

    // Status bar is initialized with default slots
    assert!(app.status_bar.slot_count() > 0);
}

#[tokio::test]
async fn test_run_to_completion() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;
    host.process(0).output(b"1 test, 0 failures\n");
    host.process(0).exit(0);

    pump_until(&mut app, |app| app.runner().last_status().is_some()).await;
    pump_until(&mut app, |app| app.status_message.is_some()).await;

    assert_eq!(app.status_message.as_deref(), Some("mix-test finished"));
    assert!(app.runner().last_run_succeeded());
    assert_eq!(app.active_sink_id(), Some("alchemist-mix-test"));

    app.update_status_bar();
    assert_eq!(
        app.status_bar.slot("label").unwrap().content,
        "mix-test:finished"
    );
    assert_eq!(app.status_bar.slot("status").unwrap().content, "finished");
}

#[tokio::test]
async fn test_failure_location_in_status_bar() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;
    host.process(0)
        .output(b"  1) test fails (MathTest)\n     test/math_test.exs:3\n");
    host.process(0).exit(2);

    pump_until(&mut app, |app| app.status_message.is_some()).await;
    app.update_status_bar();

    assert_eq!(
        app.status_bar.slot("failure").unwrap().content,
        "first failure test/math_test.exs:3"
    );
    assert_eq!(
        app.status_bar.slot("status").unwrap().content,
        "exited abnormally with code 2"
    );
}

#[tokio::test]
async fn test_rerun_prompts_and_declines() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;

    app.handle_key(key(KeyCode::Char('r')));
    pump_until(&mut app, |app| app.pending_prompt().is_some()).await;
    assert_eq!(
        app.pending_prompt(),
        Some("A `mix-test` process already running; kill it?")
    );

    // Other keys are ignored while the question is open
    app.handle_key(key(KeyCode::Char('q')));
    assert!(app.running);

    app.handle_key(key(KeyCode::Char('n')));
    assert!(app.pending_prompt().is_none());

    pump_until(&mut app, |app| app.status_message.is_some()).await;
    assert_eq!(
        app.status_message.as_deref(),
        Some("cannot run two `mix-test` processes at once")
    );
    assert_eq!(host.spawn_count(), 1);
    assert!(app.runner().is_running("mix-test"));
}

#[tokio::test]
async fn test_rerun_prompts_and_replaces() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;

    app.handle_key(key(KeyCode::Char('r')));
    pump_until(&mut app, |app| app.pending_prompt().is_some()).await;
    app.handle_key(key(KeyCode::Char('y')));

    wait_for_spawns(&host, 2).await;
    assert_eq!(host.process(0).interrupt_count(), 1);
}

#[tokio::test]
async fn test_interrupt_key() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;
    // Wait until the runner registered the process
    pump_until(&mut app, |app| app.runner().is_running("mix-test")).await;

    app.handle_key(ctrl('c'));
    pump_until(&mut app, |app| app.status_message.is_some()).await;

    assert_eq!(
        app.status_message.as_deref(),
        Some("mix-test signal interrupt")
    );
}

#[tokio::test]
async fn test_interrupt_without_process() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.start(request());
    wait_for_spawns(&host, 1).await;
    host.process(0).exit(0);
    pump_until(&mut app, |app| app.status_message.is_some()).await;

    app.handle_key(ctrl('c'));
    assert_eq!(
        app.status_message.as_deref(),
        Some("no process is running in sink `alchemist-mix-test`")
    );
}

#[tokio::test]
async fn test_scrolling_stops_and_resumes_following() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;
    app.set_viewport_height(3);

    app.start(request());
    wait_for_spawns(&host, 1).await;
    let text: String = (1..=20).map(|i| format!("line {}\n", i)).collect();
    host.process(0).output(text.as_bytes());
    host.process(0).exit(0);
    pump_until(&mut app, |app| app.status_message.is_some()).await;

    let sink = app
        .runner()
        .sinks()
        .get("alchemist-mix-test")
        .unwrap();
    assert!(sink::lock(&sink).is_following());

    app.handle_key(key(KeyCode::Up));
    assert!(!sink::lock(&sink).is_following());
    // 21 lines, 3 visible: the tail starts at 18, one up is 17
    assert_eq!(sink::lock(&sink).read_line(), 17);

    app.handle_key(key(KeyCode::PageUp));
    assert_eq!(sink::lock(&sink).read_line(), 14);

    app.handle_key(key(KeyCode::Home));
    assert_eq!(sink::lock(&sink).read_line(), 0);

    app.handle_key(key(KeyCode::End));
    assert!(sink::lock(&sink).is_following());

    app.handle_key(key(KeyCode::PageUp));
    app.handle_key(key(KeyCode::PageDown));
    assert!(sink::lock(&sink).is_following());
}

#[tokio::test]
async fn test_quit_keys() {
    let mut app = App::with_host(&test_config(), FakeHost::new()).await;
    app.handle_key(key(KeyCode::Char('q')));
    assert!(!app.running);

    let mut app = App::with_host(&test_config(), FakeHost::new()).await;
    app.handle_key(ctrl('q'));
    assert!(!app.running);
}

#[tokio::test]
async fn test_rerun_without_request() {
    let host = FakeHost::new();
    let mut app = App::with_host(&test_config(), host.clone()).await;

    app.handle_key(key(KeyCode::Char('r')));
    assert_eq!(app.status_message.as_deref(), Some("Nothing to re-run"));
    assert_eq!(host.spawn_count(), 0);
}

#[tokio::test]
async fn test_shared_runner_handle() {
    let app = App::with_host(&test_config(), FakeHost::new()).await;
    let runner = Arc::clone(app.runner());
    assert!(runner.last_status().is_none());
    assert!(!runner.last_run_succeeded());
}
