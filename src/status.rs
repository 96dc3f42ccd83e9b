//! Terminal status of completed runs.
//!
//! Keeps the status string of the most recent completion across all names,
//! and the last one for each name so callers running several processes at
//! once can ask about their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const SUCCESS_PREFIX: &str = "finished";

/// Whether a terminal status string reports success
pub fn is_success(status: &str) -> bool {
    status.starts_with(SUCCESS_PREFIX)
}

#[derive(Debug, Default)]
struct Statuses {
    last: Option<String>,
    by_name: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<Mutex<Statuses>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn statuses(&self) -> MutexGuard<'_, Statuses> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the status for `name` and the global last status
    pub fn record(&self, name: &str, status: &str) {
        let mut statuses = self.statuses();
        statuses.last = Some(status.to_string());
        statuses.by_name.insert(name.to_string(), status.to_string());
    }

    pub fn last(&self) -> Option<String> {
        self.statuses().last.clone()
    }

    pub fn for_name(&self, name: &str) -> Option<String> {
        self.statuses().by_name.get(name).cloned()
    }

    pub fn last_succeeded(&self) -> bool {
        self.statuses().last.as_deref().is_some_and(is_success)
    }

    pub fn succeeded(&self, name: &str) -> bool {
        self.statuses()
            .by_name
            .get(name)
            .is_some_and(|status| is_success(status))
    }
}
