//! Ratatui widget for an emulator frame.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::widgets::Widget;

use crate::term::TerminalEmulator;

/// Renders the emulator's visible rows (scrolled back if applicable) into
/// the buffer. The emulator already styles cells and inverts the cursor.
pub(crate) struct TerminalView<'a> {
    emulator: &'a TerminalEmulator,
}

impl<'a> TerminalView<'a> {
    pub fn new(emulator: &'a TerminalEmulator) -> Self {
        Self { emulator }
    }
}

impl Widget for TerminalView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for (row, line) in self
            .emulator
            .render()
            .iter()
            .take(area.height as usize)
            .enumerate()
        {
            buf.set_line(area.x, area.y + row as u16, line, area.width);
        }
    }
}
