//! Test failure report
//!
//! A [`RunHooks`] implementation for test runs. When the run ends it collects
//! the failing test locations ExUnit printed, so a caller that sees the run
//! did not succeed can jump to the first one.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

use regex::Regex;

use crate::hooks::RunHooks;
use crate::sink::OutputSink;
use crate::status;

/// `file:line` of a failing test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLocation {
    pub file: PathBuf,
    pub line: u32,
}

impl std::fmt::Display for FailureLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

fn location_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s+(\S+_test\.exs):(\d+)\s*$").expect("valid failure location pattern")
    })
}

/// Failing test locations in order of appearance, without duplicates
pub fn parse_failures(output: &str) -> Vec<FailureLocation> {
    let mut failures: Vec<FailureLocation> = Vec::new();

    for caps in location_pattern().captures_iter(output) {
        let Ok(line) = caps[2].parse::<u32>() else {
            continue;
        };
        let location = FailureLocation {
            file: PathBuf::from(&caps[1]),
            line,
        };
        if !failures.contains(&location) {
            failures.push(location);
        }
    }

    failures
}

#[derive(Debug, Default)]
struct ReportState {
    failures: Vec<FailureLocation>,
    status: Option<String>,
}

#[derive(Debug, Default)]
pub struct FailureReport {
    state: Mutex<ReportState>,
    summary: bool,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a colored one-line summary to the output when tests failed
    pub fn with_summary(mut self, summary: bool) -> Self {
        self.summary = summary;
        self
    }

    fn state(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn failures(&self) -> Vec<FailureLocation> {
        self.state().failures.clone()
    }

    pub fn first_failure(&self) -> Option<FailureLocation> {
        self.state().failures.first().cloned()
    }

    pub fn status(&self) -> Option<String> {
        self.state().status.clone()
    }

    pub fn succeeded(&self) -> bool {
        self.state().status.as_deref().is_some_and(status::is_success)
    }
}

impl RunHooks for FailureReport {
    fn on_render(&self, sink: &mut OutputSink) {
        let failures = parse_failures(sink.content());

        if self.summary {
            if let Some(first) = failures.first() {
                let summary = format!(
                    "\n\x1b[31m{} failing test location(s), first at {}\x1b[0m\n",
                    failures.len(),
                    first
                );
                let following = sink.is_following();
                sink.append(summary.as_bytes());
                sink.render();
                if following {
                    sink.set_read_cursor(sink.write_cursor());
                }
            }
        }

        self.state().failures = failures;
    }

    fn on_exit(&self, status: &str) {
        self.state().status = Some(status.to_string());
    }
}
