//! # ANSI Color Rendering
//!
//! Turns the raw bytes a process wrote into displayable text plus style runs.
//!
//! ## What it does
//!
//! - Interprets SGR sequences (`ESC [ ... m`): attributes, 16 colors,
//!   256-color and truecolor forms
//! - Drops every other CSI and OSC sequence
//! - Holds back an unfinished escape or UTF-8 sequence at the end of the
//!   input, so a later render over more bytes completes it
//!
//! Rendering is a pure function of the bytes. Sinks keep the raw bytes and
//! re-render the whole content after each chunk, so output split anywhere
//! (even inside an escape sequence) ends up rendered correctly.

use std::ops::Range;

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// A styled byte range of [`RenderedText::text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub range: Range<usize>,
    pub style: Style,
}

/// Escape-free text and the styles that apply to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedText {
    pub text: String,
    /// Sorted, non-overlapping. Unstyled text has no run.
    pub runs: Vec<StyledRun>,
}

impl RenderedText {
    /// Style applied at a byte offset of the text
    pub fn style_at(&self, offset: usize) -> Style {
        self.runs
            .iter()
            .find(|run| run.range.contains(&offset))
            .map(|run| run.style)
            .unwrap_or_default()
    }

    /// Split into ratatui lines, one per `\n`-separated segment
    pub fn lines(&self) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        let mut start = 0;

        for segment in self.text.split('\n') {
            let end = start + segment.len();
            lines.push(self.line_between(start, end));
            start = end + 1;
        }

        lines
    }

    fn line_between(&self, start: usize, end: usize) -> Line<'static> {
        let mut spans = Vec::new();
        let mut pos = start;

        let first = self.runs.partition_point(|run| run.range.end <= start);
        for run in self.runs[first..]
            .iter()
            .take_while(|run| run.range.start < end)
        {
            let run_start = run.range.start.max(start);
            let run_end = run.range.end.min(end);

            if run_start > pos {
                spans.push(Span::raw(self.text[pos..run_start].to_string()));
            }
            spans.push(Span::styled(
                self.text[run_start..run_end].to_string(),
                run.style,
            ));
            pos = run_end;
        }

        if pos < end {
            spans.push(Span::raw(self.text[pos..end].to_string()));
        }

        Line::from(spans)
    }
}

/// Render raw process output
pub fn render(raw: &[u8]) -> RenderedText {
    let mut renderer = Renderer::default();
    let mut text_start = 0;
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != ESC {
            i += 1;
            continue;
        }

        renderer.push_bytes(&raw[text_start..i], false);

        match scan_escape(&raw[i..]) {
            Escape::Incomplete => return renderer.finish(),
            Escape::Sgr { params, len } => {
                renderer.state.apply(&params);
                i += len;
            }
            Escape::Other { len } => i += len,
        }
        text_start = i;
    }

    renderer.push_bytes(&raw[text_start..], true);
    renderer.finish()
}

/// Remove all escape sequences and return only the text
pub fn strip(raw: &[u8]) -> String {
    render(raw).text
}

#[derive(Debug, PartialEq)]
enum Escape {
    /// Needs more bytes
    Incomplete,
    Sgr { params: Vec<u16>, len: usize },
    Other { len: usize },
}

/// `bytes[0]` must be ESC
fn scan_escape(bytes: &[u8]) -> Escape {
    let Some(&kind) = bytes.get(1) else {
        return Escape::Incomplete;
    };

    match kind {
        b'[' => scan_csi(bytes),
        // OSC, DCS, SOS, PM and APC carry a string up to a terminator
        b']' | b'P' | b'X' | b'^' | b'_' => scan_string(bytes),
        0x20..=0x2f => {
            if bytes.len() < 3 {
                Escape::Incomplete
            } else {
                Escape::Other { len: 3 }
            }
        }
        _ => Escape::Other { len: 2 },
    }
}

fn scan_csi(bytes: &[u8]) -> Escape {
    let mut j = 2;
    let mut intermediate = false;

    while j < bytes.len() && (0x20..=0x3f).contains(&bytes[j]) {
        if bytes[j] < 0x30 {
            intermediate = true;
        }
        j += 1;
    }

    match bytes.get(j) {
        None => Escape::Incomplete,
        Some(b'm') if !intermediate => Escape::Sgr {
            params: parse_params(&bytes[2..j]),
            len: j + 1,
        },
        Some(0x40..=0x7e) => Escape::Other { len: j + 1 },
        // Malformed: drop the introducer, keep the offending byte as text
        Some(_) => Escape::Other { len: j },
    }
}

fn scan_string(bytes: &[u8]) -> Escape {
    let mut j = 2;
    while j < bytes.len() {
        match bytes[j] {
            BEL => return Escape::Other { len: j + 1 },
            ESC => {
                return match bytes.get(j + 1) {
                    None => Escape::Incomplete,
                    Some(b'\\') => Escape::Other { len: j + 2 },
                    // Unterminated string interrupted by a new sequence
                    Some(_) => Escape::Other { len: j },
                };
            }
            _ => j += 1,
        }
    }
    Escape::Incomplete
}

fn parse_params(bytes: &[u8]) -> Vec<u16> {
    if bytes.is_empty() {
        return Vec::new();
    }

    bytes
        .split(|b| *b == b';' || *b == b':')
        .map(|param| {
            std::str::from_utf8(param)
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0)
        })
        .collect()
}

/// Current graphic rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Color>,
    modifiers: Modifier,
}

impl Default for SgrState {
    fn default() -> Self {
        Self {
            fg: None,
            bg: None,
            modifiers: Modifier::empty(),
        }
    }
}

impl SgrState {
    fn style(&self) -> Style {
        let mut style = Style::default().add_modifier(self.modifiers);
        if let Some(fg) = self.fg {
            style = style.fg(fg);
        }
        if let Some(bg) = self.bg {
            style = style.bg(bg);
        }
        style
    }

    fn apply(&mut self, params: &[u16]) {
        if params.is_empty() {
            *self = Self::default();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => *self = Self::default(),
                1 => self.modifiers.insert(Modifier::BOLD),
                2 => self.modifiers.insert(Modifier::DIM),
                3 => self.modifiers.insert(Modifier::ITALIC),
                4 => self.modifiers.insert(Modifier::UNDERLINED),
                5 => self.modifiers.insert(Modifier::SLOW_BLINK),
                6 => self.modifiers.insert(Modifier::RAPID_BLINK),
                7 => self.modifiers.insert(Modifier::REVERSED),
                8 => self.modifiers.insert(Modifier::HIDDEN),
                9 => self.modifiers.insert(Modifier::CROSSED_OUT),
                21 | 22 => self.modifiers.remove(Modifier::BOLD | Modifier::DIM),
                23 => self.modifiers.remove(Modifier::ITALIC),
                24 => self.modifiers.remove(Modifier::UNDERLINED),
                25 => self
                    .modifiers
                    .remove(Modifier::SLOW_BLINK | Modifier::RAPID_BLINK),
                27 => self.modifiers.remove(Modifier::REVERSED),
                28 => self.modifiers.remove(Modifier::HIDDEN),
                29 => self.modifiers.remove(Modifier::CROSSED_OUT),
                n @ 30..=37 => self.fg = Some(base_color(n - 30)),
                38 => {
                    let (color, used) = extended_color(&params[i + 1..]);
                    if color.is_some() {
                        self.fg = color;
                    }
                    i += used;
                }
                39 => self.fg = None,
                n @ 40..=47 => self.bg = Some(base_color(n - 40)),
                48 => {
                    let (color, used) = extended_color(&params[i + 1..]);
                    if color.is_some() {
                        self.bg = color;
                    }
                    i += used;
                }
                49 => self.bg = None,
                n @ 90..=97 => self.fg = Some(bright_color(n - 90)),
                n @ 100..=107 => self.bg = Some(bright_color(n - 100)),
                _ => {}
            }
            i += 1;
        }
    }
}

fn base_color(index: u16) -> Color {
    match index {
        0 => Color::Black,
        1 => Color::Red,
        2 => Color::Green,
        3 => Color::Yellow,
        4 => Color::Blue,
        5 => Color::Magenta,
        6 => Color::Cyan,
        _ => Color::Gray,
    }
}

fn bright_color(index: u16) -> Color {
    match index {
        0 => Color::DarkGray,
        1 => Color::LightRed,
        2 => Color::LightGreen,
        3 => Color::LightYellow,
        4 => Color::LightBlue,
        5 => Color::LightMagenta,
        6 => Color::LightCyan,
        _ => Color::White,
    }
}

/// Parse the arguments following 38/48. Returns the color and how many
/// parameters were consumed.
fn extended_color(params: &[u16]) -> (Option<Color>, usize) {
    let channel = |v: u16| v.min(255) as u8;

    match params {
        [5, n, ..] => (Some(Color::Indexed(channel(*n))), 2),
        [2, r, g, b, ..] => (Some(Color::Rgb(channel(*r), channel(*g), channel(*b))), 4),
        _ => (None, params.len()),
    }
}

#[derive(Default)]
struct Renderer {
    out: RenderedText,
    state: SgrState,
}

impl Renderer {
    fn push_bytes(&mut self, mut bytes: &[u8], at_end: bool) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.push_str(text, at_end);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    self.push_str(std::str::from_utf8(valid).unwrap_or_default(), false);
                    match err.error_len() {
                        Some(len) => {
                            self.push_str("\u{FFFD}", false);
                            bytes = &rest[len..];
                        }
                        // Truncated sequence: wait for the rest unless more
                        // text already follows it
                        None => {
                            if !at_end {
                                self.push_str("\u{FFFD}", false);
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    fn push_str(&mut self, text: &str, at_end: bool) {
        let mut text = text.replace("\r\n", "\n");
        if at_end && text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }

        let start = self.out.text.len();
        self.out.text.push_str(&text);
        let end = self.out.text.len();

        let style = self.state.style();
        if style == Style::default() {
            return;
        }

        match self.out.runs.last_mut() {
            Some(last) if last.range.end == start && last.style == style => {
                last.range.end = end;
            }
            _ => self.out.runs.push(StyledRun {
                range: start..end,
                style,
            }),
        }
    }

    fn finish(self) -> RenderedText {
        self.out
    }
}
