//! Frame layout and rendering: command tree, terminal pane, footer.

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::tree::{NodeId, Status};

use super::app::{App, Focus};
use super::widget::TerminalView;

/// Accent used for borders and the prompt marker.
const ACCENT: Color = Color::Rgb(0xcf, 0x6a, 0x4c);
const DIM: Color = Color::Rgb(0x80, 0x80, 0x80);

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PaneLayout {
    pub tree: Rect,
    pub terminal: Rect,
    pub footer: Rect,
}

pub(crate) fn compute_layout(area: Rect) -> PaneLayout {
    let [main, footer] =
        Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(area);
    let tree_width = (area.width / 3).clamp(24, 48).min(area.width);
    let [tree, terminal] =
        Layout::horizontal([Constraint::Length(tree_width), Constraint::Min(10)]).areas(main);
    PaneLayout {
        tree,
        terminal,
        footer,
    }
}

/// The PTY dimensions implied by a full-screen size (terminal pane minus
/// its borders).
pub(crate) fn terminal_pane_size(cols: u16, rows: u16) -> (u16, u16) {
    let layout = compute_layout(Rect::new(0, 0, cols, rows));
    (
        layout.terminal.height.saturating_sub(2).max(1),
        layout.terminal.width.saturating_sub(2).max(1),
    )
}

pub(crate) fn draw(frame: &mut Frame, app: &mut App) {
    let layout = compute_layout(frame.area());
    app.layout = layout;

    draw_tree(frame, app, layout.tree);
    draw_terminal(frame, app, layout.terminal);
    draw_footer(frame, layout.footer);
}

fn draw_tree(frame: &mut Frame, app: &mut App, area: Rect) {
    let border_style = if app.focus == Focus::Tree {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(DIM)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title("commands");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = app.coordinator.tree.visible_rows();
    let height = inner.height as usize;

    if app.cursor < app.tree_scroll {
        app.tree_scroll = app.cursor;
    } else if height > 0 && app.cursor >= app.tree_scroll + height {
        app.tree_scroll = app.cursor + 1 - height;
    }

    let lines: Vec<Line> = rows
        .iter()
        .enumerate()
        .skip(app.tree_scroll)
        .take(height)
        .map(|(row_index, &(node, depth))| tree_row(app, node, depth, row_index == app.cursor))
        .collect();

    frame.render_widget(Paragraph::new(lines), inner);
}

fn tree_row(app: &App, index: NodeId, depth: usize, is_cursor: bool) -> Line<'static> {
    let tree = &app.coordinator.tree;
    let node = tree.node(index);
    let state = tree.state(index);

    let base = if is_cursor && app.focus == Focus::Tree {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };

    let mut spans: Vec<Span<'static>> = vec![Span::styled("  ".repeat(depth), base)];

    if node.is_command() {
        let marker = if state.selected { "\u{25cf} " } else { "\u{25cb} " };
        spans.push(Span::styled(marker, base.fg(ACCENT)));
        spans.push(Span::styled(node.name.clone(), base));
        match state.status {
            Status::Success => spans.push(Span::styled(" \u{2714}", base.fg(Color::Green))),
            Status::Failure => spans.push(Span::styled(" \u{2718}", base.fg(Color::Red))),
            Status::Running => spans.push(Span::styled(" \u{1f551}", base.fg(Color::Yellow))),
            Status::Pending => {}
        }
    } else {
        let caret = if state.expanded { "\u{25bc} " } else { "\u{25b6} " };
        spans.push(Span::styled(caret, base.fg(DIM)));
        spans.push(Span::styled(node.name.clone(), base));

        let sum = tree.group_sum(index);
        if sum.success + sum.running + sum.failure > 0 {
            spans.push(Span::styled(" [", base.fg(DIM)));
            let mut first = true;
            for (count, color) in [
                (sum.success, Color::Green),
                (sum.running, Color::Yellow),
                (sum.failure, Color::Red),
            ] {
                if count == 0 {
                    continue;
                }
                if !first {
                    spans.push(Span::styled("|", base.fg(DIM)));
                }
                spans.push(Span::styled(count.to_string(), base.fg(color)));
                first = false;
            }
            spans.push(Span::styled("]", base.fg(DIM)));
        }
        spans.push(Span::styled(
            format!(" ({}/{})", sum.selected, sum.total),
            base.fg(DIM),
        ));
    }

    Line::from(spans)
}

fn draw_terminal(frame: &mut Frame, app: &App, area: Rect) {
    let border_style = if app.focus == Focus::Terminal {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(DIM)
    };

    let title = app
        .coordinator
        .focused()
        .and_then(|id| app.coordinator.tree.command_by_id(id))
        .map_or_else(|| "output".to_string(), |c| c.name.clone());

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let emulator = app
        .coordinator
        .focused()
        .and_then(|id| app.coordinator.emulator(id));
    if let Some(emulator) = emulator {
        frame.render_widget(TerminalView::new(emulator), inner);
    } else {
        frame.render_widget(
            Paragraph::new("run a command to see its output").style(Style::default().fg(DIM)),
            inner,
        );
    }
}

fn draw_footer(frame: &mut Frame, area: Rect) {
    let hints = [
        ("r", "run"),
        ("enter", "run selected"),
        ("space", "select"),
        ("g", "git select"),
        ("s", "stop"),
        ("c", "clear"),
        ("tab", "focus terminal"),
        ("q", "quit"),
    ];
    let mut spans = Vec::with_capacity(hints.len() * 3);
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {key} "), Style::default().fg(ACCENT)));
        spans.push(Span::styled(label, Style::default().fg(DIM)));
        spans.push(Span::raw(" "));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_pane_excludes_borders() {
        let (rows, cols) = terminal_pane_size(120, 40);
        assert_eq!(rows, 37);
        // 120/3 = 40 wide tree, terminal 80 minus two border columns.
        assert_eq!(cols, 78);
    }

    #[test]
    fn layout_never_underflows_on_tiny_screens() {
        let (rows, cols) = terminal_pane_size(10, 3);
        assert!(rows >= 1);
        assert!(cols >= 1);
    }
}
