use crate::sink;
use crate::widgets::{ConfirmPrompt, SinkView};
use crate::App;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

impl App {
    /// Main render function for the application UI
    pub fn render(&mut self, f: &mut Frame) {
        let status_height = if self.show_status_bar { 1 } else { 0 };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),                // Output area
                Constraint::Length(status_height), // Status line
            ])
            .split(f.area());

        self.render_output(f, chunks[0]);

        if self.show_status_bar {
            self.update_status_bar();
            f.render_widget(self.status_bar.clone(), chunks[1]);
        }

        if let Some(message) = self.pending_prompt() {
            f.render_widget(ConfirmPrompt::new(message), f.area());
        }
    }

    /// Render the active sink, or a hint when nothing ran yet
    fn render_output(&mut self, f: &mut Frame, area: Rect) {
        // Inside the border
        self.set_viewport_height(area.height.saturating_sub(2) as usize);

        let sink = self
            .active_sink_id()
            .and_then(|id| self.runner().sinks().get(id));

        match sink {
            Some(sink) => {
                let sink = sink::lock(&sink);
                f.render_widget(SinkView::new(&sink), area);
            }
            None => {
                let hint = Paragraph::new("No process started. Press r to run, q to quit.")
                    .style(Style::default().fg(Color::DarkGray))
                    .block(Block::default().borders(Borders::ALL).title(" alchemist "));
                f.render_widget(hint, area);
            }
        }
    }
}
