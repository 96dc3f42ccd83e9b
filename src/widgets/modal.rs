use ratatui::{
    buffer::Buffer as TuiBuffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Widget, Wrap},
};

/// Centered dialog box drawn over the output
pub struct Modal<'a> {
    title: &'a str,
    content: Vec<Line<'a>>,
    width: u16,
    height: u16,
}

impl<'a> Modal<'a> {
    pub fn new(title: &'a str) -> Self {
        Self {
            title,
            content: Vec::new(),
            width: 60,
            height: 7,
        }
    }

    pub fn content(mut self, content: Vec<Line<'a>>) -> Self {
        self.content = content;
        self
    }

    pub fn width(mut self, width: u16) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u16) -> Self {
        self.height = height;
        self
    }

    /// Calculate the centered area for the modal
    pub fn centered_rect(&self, area: Rect) -> Rect {
        let width = self.width.min(area.width);
        let height = self.height.min(area.height);

        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length((area.height - height) / 2),
                Constraint::Length(height),
                Constraint::Min(0),
            ])
            .split(area);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length((area.width - width) / 2),
                Constraint::Length(width),
                Constraint::Min(0),
            ])
            .split(popup_layout[1])[1]
    }
}

impl Widget for Modal<'_> {
    fn render(self, area: Rect, buf: &mut TuiBuffer) {
        let modal_area = self.centered_rect(area);

        Clear.render(modal_area, buf);

        let title_style = Style::default()
            .fg(Color::White)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD);

        let block = Block::default()
            .title(Span::styled(format!(" {} ", self.title), title_style))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
            .style(Style::default().bg(Color::Black));

        let inner_area = block.inner(modal_area);
        block.render(modal_area, buf);

        Paragraph::new(self.content)
            .style(Style::default().fg(Color::White))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(inner_area, buf);
    }
}

/// Yes/no question shown while the runner waits for an answer
pub struct ConfirmPrompt<'a> {
    message: &'a str,
}

impl<'a> ConfirmPrompt<'a> {
    pub fn new(message: &'a str) -> Self {
        Self { message }
    }
}

impl Widget for ConfirmPrompt<'_> {
    fn render(self, area: Rect, buf: &mut TuiBuffer) {
        let key = Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD);

        let content = vec![
            Line::from(""),
            Line::from(self.message),
            Line::from(""),
            Line::from(vec![
                Span::styled("[y]", key),
                Span::raw(" yes   "),
                Span::styled("[n]", key),
                Span::raw(" no"),
            ]),
        ];

        Modal::new("Confirm")
            .content(content)
            .width(64)
            .height(7)
            .render(area, buf);
    }
}
