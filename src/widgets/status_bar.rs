use ratatui::{
    buffer::Buffer as TuiBuffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};
use std::collections::HashMap;

/// Which end of the bar a slot sticks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAlignment {
    Left,
    Right,
}

/// A single piece of the status bar
#[derive(Debug, Clone)]
pub struct StatusSlot {
    pub id: String,
    pub content: String,
    pub alignment: SlotAlignment,
    pub priority: u8, // Higher priority = closer to the edge
    pub style: Style,
    pub visible: bool,
}

impl StatusSlot {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            alignment: SlotAlignment::Left,
            priority: 50,
            style: Style::default().fg(Color::White).bg(Color::DarkGray),
            visible: true,
        }
    }

    pub fn with_alignment(mut self, alignment: SlotAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }
}

/// One-line bar showing the sink label, the last status and similar facts
#[derive(Debug, Clone)]
pub struct StatusBar {
    slots: HashMap<String, StatusSlot>,
    background_style: Style,
    separator: String,
}

impl Default for StatusBar {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBar {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            background_style: Style::default().bg(Color::DarkGray).fg(Color::White),
            separator: " | ".to_string(),
        }
    }

    /// Add or replace a slot
    pub fn set_slot(&mut self, slot: StatusSlot) {
        self.slots.insert(slot.id.clone(), slot);
    }

    pub fn remove_slot(&mut self, id: &str) {
        self.slots.remove(id);
    }

    pub fn slot(&self, id: &str) -> Option<&StatusSlot> {
        self.slots.get(id)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn hide_slot(&mut self, id: &str) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.visible = false;
        }
    }

    pub fn show_slot(&mut self, id: &str) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.visible = true;
        }
    }

    pub fn update_slot_content(&mut self, id: &str, content: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.content = content.into();
        }
    }

    /// Restyle a slot, e.g. red once a run failed
    pub fn update_slot_style(&mut self, id: &str, style: Style) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.style = style;
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Visible, non-empty slots of one side, highest priority first
    fn side(&self, alignment: SlotAlignment) -> Vec<&StatusSlot> {
        let mut slots: Vec<&StatusSlot> = self
            .slots
            .values()
            .filter(|slot| slot.visible && slot.alignment == alignment && !slot.content.is_empty())
            .collect();
        slots.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        slots
    }

    fn spans<'a>(&'a self, slots: &[&'a StatusSlot]) -> Vec<Span<'a>> {
        let mut spans = Vec::new();
        for (i, slot) in slots.iter().enumerate() {
            if i > 0 && !self.separator.is_empty() {
                spans.push(Span::styled(self.separator.as_str(), self.background_style));
            }
            spans.push(Span::styled(format!(" {} ", slot.content), slot.style));
        }
        spans
    }

    /// Plain text of the bar, left side then right side
    pub fn text(&self) -> String {
        let left = self.side(SlotAlignment::Left);
        let mut right = self.side(SlotAlignment::Right);
        right.reverse();
        self.spans(&left)
            .into_iter()
            .chain(self.spans(&right))
            .map(|span| span.content.into_owned())
            .collect()
    }
}

fn width(spans: &[Span]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

impl Widget for StatusBar {
    fn render(self, area: Rect, buf: &mut TuiBuffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }

        let left_slots = self.side(SlotAlignment::Left);
        let mut right_slots = self.side(SlotAlignment::Right);
        right_slots.reverse();

        let mut spans = self.spans(&left_slots);
        let right = self.spans(&right_slots);

        // Right side only when it fits next to the left side
        let available = area.width as usize;
        let used = width(&spans) + width(&right);
        if used <= available {
            spans.push(Span::styled(
                " ".repeat(available - used),
                self.background_style,
            ));
            spans.extend(right);
        }

        Paragraph::new(Line::from(spans))
            .style(self.background_style)
            .render(area, buf);
    }
}
