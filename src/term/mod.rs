//! In-process terminal emulation.
//!
//! [`TerminalEmulator`] wraps a vt100 state machine: raw PTY bytes go in
//! via [`TerminalEmulator::feed`], styled frames come out via
//! [`TerminalEmulator::render`]. It also owns the scrollback position and
//! the banner lines fnug injects around command runs. The emulator does
//! no I/O itself.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Default (and maximum) scrollback retention in lines.
pub const DEFAULT_SCROLLBACK: usize = 5000;

/// Background used where the child left the default color.
pub const DEFAULT_BG: Color = Color::Rgb(0x1e, 0x1e, 0x1e);

/// Orange used for the `❱ ` prompt marker in banners.
const PROMPT_SGR: &str = "\x1b[38;2;207;106;76m";

pub struct TerminalEmulator {
    parser: vt100::Parser,
    rows: u16,
    cols: u16,
    scrollback_len: usize,
}

impl TerminalEmulator {
    pub fn new(rows: u16, cols: u16, scrollback: Option<usize>) -> Self {
        let scrollback_len = scrollback
            .unwrap_or(DEFAULT_SCROLLBACK)
            .min(DEFAULT_SCROLLBACK);
        Self {
            parser: vt100::Parser::new(rows, cols, scrollback_len),
            rows,
            cols,
            scrollback_len,
        }
    }

    /// Parse a chunk of raw PTY output. Escape sequences may be split
    /// across chunks; the parser carries its state over.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Write a pre-styled banner line (ANSI bytes) followed by a newline.
    pub fn echo(&mut self, banner: &[u8]) {
        self.parser.process(banner);
        self.parser.process(b"\r\n");
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.rows = rows;
        self.cols = cols;
        self.parser.set_size(rows, cols);
    }

    /// Reset to a blank screen and drop all scrollback.
    pub fn clear(&mut self) {
        self.parser = vt100::Parser::new(self.rows, self.cols, self.scrollback_len);
    }

    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.parser.screen()
    }

    /// How many history lines are currently shown above the live screen.
    pub fn scroll_position(&self) -> usize {
        self.parser.screen().scrollback()
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let current = self.parser.screen().scrollback();
        self.parser
            .set_scrollback(current.saturating_add(lines).min(self.scrollback_len));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let current = self.parser.screen().scrollback();
        self.parser.set_scrollback(current.saturating_sub(lines));
    }

    pub fn page_up(&mut self) {
        self.scroll_up(self.rows as usize);
    }

    pub fn page_down(&mut self) {
        self.scroll_down(self.rows as usize);
    }

    /// Jump to the oldest retained line. The parser clamps the position
    /// to the history actually present.
    pub fn scroll_to_top(&mut self) {
        self.parser.set_scrollback(self.scrollback_len);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.parser.set_scrollback(0);
    }

    /// The visible rows as styled lines, with the cursor cell inverted.
    pub fn render(&self) -> Vec<Line<'static>> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let cursor = screen.cursor_position();
        let at_bottom = screen.scrollback() == 0;

        let mut lines = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut spans: Vec<Span<'static>> = Vec::new();
            let mut run = String::new();
            let mut run_style = Style::default();

            for col in 0..cols {
                let mut style = screen
                    .cell(row, col)
                    .map(cell_style)
                    .unwrap_or_else(|| Style::default().bg(DEFAULT_BG));
                if at_bottom && cursor == (row, col) {
                    style = style.add_modifier(Modifier::REVERSED);
                }

                let contents = screen
                    .cell(row, col)
                    .map(vt100::Cell::contents)
                    .unwrap_or_default();
                let glyph = if contents.is_empty() {
                    " ".to_string()
                } else {
                    contents
                };

                if style == run_style {
                    run.push_str(&glyph);
                } else {
                    if !run.is_empty() {
                        spans.push(Span::styled(std::mem::take(&mut run), run_style));
                    }
                    run_style = style;
                    run.push_str(&glyph);
                }
            }
            if !run.is_empty() {
                spans.push(Span::styled(run, run_style));
            }
            lines.push(Line::from(spans));
        }
        lines
    }

    /// Plain-text view of the visible rows, trailing spaces trimmed.
    pub fn text(&self) -> Vec<String> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        (0..rows)
            .map(|row| {
                let mut line = String::new();
                for col in 0..cols {
                    let contents = screen
                        .cell(row, col)
                        .map(vt100::Cell::contents)
                        .unwrap_or_default();
                    if contents.is_empty() {
                        line.push(' ');
                    } else {
                        line.push_str(&contents);
                    }
                }
                line.trim_end().to_string()
            })
            .collect()
    }
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default();

    style = style.fg(match cell.fgcolor() {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(i) => Color::Indexed(i),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    });
    style = style.bg(match cell.bgcolor() {
        vt100::Color::Default => DEFAULT_BG,
        vt100::Color::Idx(i) => Color::Indexed(i),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    });

    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }

    style
}

// -- Banners ----------------------------------------------------------------

/// `❱ <command>` echoed before the child starts.
pub fn start_message(cmd: &str) -> Vec<u8> {
    format!("{PROMPT_SGR}\u{276f} \x1b[0m{cmd}").into_bytes()
}

/// Green check banner echoed after a zero exit.
pub fn success_message() -> Vec<u8> {
    format!("\r\n{PROMPT_SGR}\u{276f} \x1b[0mSuccess \x1b[32m\u{2714}\x1b[0m").into_bytes()
}

/// Red cross banner echoed after a non-zero exit.
pub fn failure_message(code: i32) -> Vec<u8> {
    format!(
        "\r\n{PROMPT_SGR}\u{276f} \x1b[0mCommand failed \x1b[31m\u{2718}\x1b[0m \
         \x1b[38;2;128;128;128m(exit code {code})\x1b[0m"
    )
    .into_bytes()
}

/// Banner echoed when the user stops a running command.
pub fn stopped_message() -> Vec<u8> {
    format!("\r\n{PROMPT_SGR}\u{276f} \x1b[0mStopped \x1b[31m\u{2718}\x1b[0m").into_bytes()
}

/// Banner echoed when the child could not be spawned at all.
pub fn spawn_error_message(error: &str) -> Vec<u8> {
    format!("\r\n{PROMPT_SGR}\u{276f} \x1b[0mFailed to start \x1b[31m\u{2718}\x1b[0m {error}")
        .into_bytes()
}
