//! # Output Sinks
//!
//! A sink is the buffer a process's output is streamed into.
//!
//! ## What it does
//!
//! - Keeps the raw bytes a process wrote and their rendered form
//! - Tracks the write cursor (end of output) and the operator's read cursor
//! - Carries a status label, an active mode and a visibility flag for the host
//!
//! Sinks are shared between the runner's per-process task and whatever draws
//! them, so the registry hands out `Arc<Mutex<OutputSink>>`. Every critical
//! section is short and never awaits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ratatui::text::Line;

use crate::ansi::{self, RenderedText};

pub type SharedSink = Arc<Mutex<OutputSink>>;

/// Lock a shared sink, recovering the data if a previous holder panicked
pub fn lock(sink: &SharedSink) -> MutexGuard<'_, OutputSink> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct OutputSink {
    id: String,
    raw: Vec<u8>,
    rendered: RenderedText,
    read_cursor: usize,
    status_label: String,
    mode: Option<String>,
    visible: bool,
    closed: bool,
}

impl OutputSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw: Vec::new(),
            rendered: RenderedText::default(),
            read_cursor: 0,
            status_label: String::new(),
            mode: None,
            visible: false,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Discard all content and reset both cursors
    pub fn clear(&mut self) {
        self.raw.clear();
        self.rendered = RenderedText::default();
        self.read_cursor = 0;
    }

    /// Append bytes at the write cursor. Call [`render`](Self::render)
    /// afterwards to refresh the displayed text.
    pub fn append(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
    }

    /// Re-render escape sequences over the whole content
    pub fn render(&mut self) {
        self.rendered = ansi::render(&self.raw);
        self.read_cursor = self.clamp_offset(self.read_cursor);
    }

    /// Bytes exactly as the process wrote them
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Displayed text, escape sequences removed
    pub fn content(&self) -> &str {
        &self.rendered.text
    }

    pub fn rendered(&self) -> &RenderedText {
        &self.rendered
    }

    pub fn lines(&self) -> Vec<Line<'static>> {
        self.rendered.lines()
    }

    pub fn line_count(&self) -> usize {
        self.rendered.text.split('\n').count()
    }

    /// Offset just past the last displayed byte
    pub fn write_cursor(&self) -> usize {
        self.rendered.text.len()
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Offsets past the end or inside a multibyte character snap back
    pub fn set_read_cursor(&mut self, offset: usize) {
        self.read_cursor = self.clamp_offset(offset);
    }

    fn clamp_offset(&self, offset: usize) -> usize {
        let text = &self.rendered.text;
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    /// Whether the reader is trailing the output live
    pub fn is_following(&self) -> bool {
        self.read_cursor == self.write_cursor()
    }

    /// Line index the read cursor sits on
    pub fn read_line(&self) -> usize {
        self.rendered.text.as_bytes()[..self.read_cursor]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
    }

    /// Move the read cursor to the start of a line
    pub fn set_read_line(&mut self, line: usize) {
        if line == 0 {
            self.read_cursor = 0;
            return;
        }

        self.read_cursor = self
            .rendered
            .text
            .match_indices('\n')
            .nth(line - 1)
            .map(|(i, _)| i + 1)
            .unwrap_or_else(|| self.write_cursor());
    }

    pub fn status_label(&self) -> &str {
        &self.status_label
    }

    pub fn set_status_label(&mut self, label: impl Into<String>) {
        self.status_label = label.into();
    }

    pub fn activate_mode(&mut self, mode: impl Into<String>) {
        self.mode = Some(mode.into());
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Make the sink visible to the operator
    pub fn show(&mut self) {
        self.visible = true;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Create-or-get access to sinks by id
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: Arc<Mutex<HashMap<String, SharedSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sinks(&self) -> MutexGuard<'_, HashMap<String, SharedSink>> {
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_or_create(&self, id: &str) -> SharedSink {
        self.sinks()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OutputSink::new(id))))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<SharedSink> {
        self.sinks().get(id).cloned()
    }

    /// Close and forget a sink. Holders of the old handle see it closed; the
    /// next `get_or_create` builds a fresh one.
    pub fn destroy(&self, id: &str) -> bool {
        match self.sinks().remove(id) {
            Some(sink) => {
                lock(&sink).close();
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sinks().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sinks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks().is_empty()
    }
}
