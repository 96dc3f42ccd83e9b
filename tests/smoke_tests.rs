//! Smoke tests for overall application functionality
//!
//! These are high-level tests that verify the application works end-to-end

mod common;

use std::time::Duration;

use alchemist::config::{Config, ConfigManager};
use alchemist::{App, RunRequest};
use common::{FakeHost, TIMEOUT};
use ratatui::{backend::TestBackend, Terminal};
use tempfile::TempDir;
use tokio::time::timeout;

fn screen(terminal: &Terminal<TestBackend>) -> String {
    let buffer = terminal.backend().buffer();
    let width = buffer.area.width as usize;
    buffer
        .content
        .chunks(width)
        .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_app_smoke_test() {
    let app = App::with_host(&Config::default(), FakeHost::new()).await;

    assert!(app.running);
    assert!(app.status_bar.slot_count() > 0);
}

#[tokio::test]
async fn test_idle_screen_smoke_test() {
    let mut app = App::with_host(&Config::default(), FakeHost::new()).await;

    let mut terminal = Terminal::new(TestBackend::new(80, 10)).unwrap();
    terminal.draw(|f| app.render(f)).unwrap();

    let screen = screen(&terminal);
    assert!(screen.contains("No process started"));
    assert!(screen.contains("idle"));
}

#[tokio::test]
async fn test_preset_run_smoke_test() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::new(temp_dir.path());
    manager.load().unwrap();

    let host = FakeHost::new();
    let mut app = App::with_host(manager.get_config(), host.clone()).await;

    let preset = manager.preset("mix-test").unwrap();
    app.start(RunRequest::from_preset("mix-test", preset).in_dir(temp_dir.path()));

    timeout(TIMEOUT, async {
        while host.spawn_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(host.process(0).spec.command, "mix test");

    host.process(0).output(b"\x1b[32m3 tests, 0 failures\x1b[0m\n");
    host.process(0).exit(0);

    timeout(TIMEOUT, async {
        while app.status_message.is_none() {
            app.next_event().await;
        }
    })
    .await
    .unwrap();

    let mut terminal = Terminal::new(TestBackend::new(80, 10)).unwrap();
    terminal.draw(|f| app.render(f)).unwrap();

    let screen = screen(&terminal);
    assert!(screen.contains("alchemist-mix-test"));
    assert!(screen.contains("3 tests, 0 failures"));
    assert!(screen.contains("mix-test:finished"));
}

#[tokio::test]
async fn test_prompt_is_drawn_smoke_test() {
    let host = FakeHost::new();
    let mut app = App::with_host(&Config::default(), host.clone()).await;

    let request = RunRequest::new("iex -S mix", "iex", "alchemist-iex").in_dir(std::env::temp_dir());
    app.start(request);
    timeout(TIMEOUT, async {
        while host.spawn_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    app.rerun();
    timeout(TIMEOUT, async {
        while app.pending_prompt().is_none() {
            app.next_event().await;
        }
    })
    .await
    .unwrap();

    let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
    terminal.draw(|f| app.render(f)).unwrap();
    assert!(screen(&terminal).contains("A `iex` process already running; kill it?"));

    app.answer_prompt(false);
}
