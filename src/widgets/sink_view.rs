use ratatui::{
    buffer::Buffer as TuiBuffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

use crate::sink::OutputSink;

/// Scrolling view over a sink's rendered output.
///
/// The top line comes from the sink's read cursor; a reader at the write
/// cursor sees the tail of the output as it grows.
pub struct SinkView<'a> {
    sink: &'a OutputSink,
    border: bool,
}

impl<'a> SinkView<'a> {
    pub fn new(sink: &'a OutputSink) -> Self {
        Self { sink, border: true }
    }

    pub fn border(mut self, border: bool) -> Self {
        self.border = border;
        self
    }

    /// First line shown in a viewport `height` lines tall
    pub fn top_line(&self, height: usize) -> usize {
        let total = self.sink.line_count();
        if self.sink.is_following() {
            total.saturating_sub(height)
        } else {
            self.sink.read_line().min(total.saturating_sub(1))
        }
    }

    fn title(&self) -> Line<'static> {
        let mut spans = vec![Span::styled(
            format!(" {} ", self.sink.id()),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )];
        if !self.sink.status_label().is_empty() {
            spans.push(Span::raw(format!("[{}] ", self.sink.status_label())));
        }
        if !self.sink.is_following() {
            spans.push(Span::styled(
                "(scrolled) ",
                Style::default().fg(Color::Yellow),
            ));
        }
        Line::from(spans)
    }
}

impl Widget for SinkView<'_> {
    fn render(self, area: Rect, buf: &mut TuiBuffer) {
        let inner_area = if self.border {
            let block = Block::default()
                .title(self.title())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray));
            let inner = block.inner(area);
            block.render(area, buf);
            inner
        } else {
            area
        };

        if inner_area.height == 0 {
            return;
        }

        let height = inner_area.height as usize;
        let top = self.top_line(height);
        let lines: Vec<Line<'static>> = self
            .sink
            .lines()
            .into_iter()
            .skip(top)
            .take(height)
            .collect();

        Paragraph::new(lines).render(inner_area, buf);
    }
}
