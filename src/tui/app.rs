//! TUI state and event handling: cursor, focus, key/mouse dispatch.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};
use ratatui::DefaultTerminal;
use ratatui::layout::Rect;

use crate::auto::WatchTargets;
use crate::config::Config;
use crate::coordinator::{Coordinator, Intent};
use crate::tree::NodeId;
use crate::watch::{self, Change, WatchHandle};

use super::ui;

/// Poll interval; also the redraw cadence while children produce output.
const TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Focus {
    Tree,
    Terminal,
}

pub(crate) struct App {
    pub coordinator: Coordinator,
    watch_targets: WatchTargets,
    watch_rx: Option<mpsc::Receiver<Vec<Change>>>,
    _watch_handle: Option<WatchHandle>,
    pub cursor: usize,
    pub focus: Focus,
    pub tree_scroll: usize,
    pub layout: ui::PaneLayout,
}

impl App {
    pub fn new(config: &Config, root_dir: PathBuf) -> Self {
        let coordinator = Coordinator::new(config, root_dir.clone());
        let watch_targets = WatchTargets::from_tree(&coordinator.tree, &root_dir);

        let (watch_rx, watch_handle) = if watch_targets.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel();
            match watch::watch(&watch_targets.paths(), tx) {
                Ok(handle) => (Some(rx), Some(handle)),
                Err(e) => {
                    tracing::warn!("filesystem watching disabled: {e}");
                    (None, None)
                }
            }
        };

        App {
            coordinator,
            watch_targets,
            watch_rx,
            _watch_handle: watch_handle,
            cursor: 0,
            focus: Focus::Tree,
            tree_scroll: 0,
            layout: ui::PaneLayout::default(),
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let size = terminal.size()?;
        self.apply_resize(size.width, size.height);
        self.coordinator.startup_auto_select();
        self.sync_focus();

        loop {
            self.tick();
            if self.coordinator.should_quit() {
                break;
            }
            terminal.draw(|frame| ui::draw(frame, self))?;

            if event::poll(TICK)? {
                match event::read()? {
                    Event::Key(key) if key.kind != KeyEventKind::Release => self.on_key(key),
                    Event::Mouse(mouse) => self.on_mouse(mouse),
                    Event::Resize(cols, rows) => self.apply_resize(cols, rows),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Per-frame work: drain child output and watcher batches.
    fn tick(&mut self) {
        self.coordinator.pump();

        if let Some(rx) = &self.watch_rx {
            let batches: Vec<Vec<Change>> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
            for batch in batches {
                for id in self.watch_targets.match_batch(&batch) {
                    self.coordinator.tree.set_selected(&id, true);
                }
            }
        }
    }

    fn apply_resize(&mut self, cols: u16, rows: u16) {
        let (rows, cols) = ui::terminal_pane_size(cols, rows);
        self.coordinator.handle_intent(Intent::Resize { rows, cols });
    }

    fn cursor_node(&self) -> Option<NodeId> {
        self.coordinator
            .tree
            .visible_rows()
            .get(self.cursor)
            .map(|&(index, _)| index)
    }

    fn cursor_command_id(&self) -> Option<String> {
        let index = self.cursor_node()?;
        let node = self.coordinator.tree.node(index);
        node.is_command().then(|| node.id.clone())
    }

    fn clamp_cursor(&mut self) {
        let len = self.coordinator.tree.visible_rows().len();
        if len == 0 {
            self.cursor = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
    }

    /// Keep the displayed terminal in step with the cursor.
    fn sync_focus(&mut self) {
        if let Some(id) = self.cursor_command_id() {
            self.coordinator.set_focused(Some(id));
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.focus == Focus::Terminal {
            self.on_terminal_key(key);
            return;
        }

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.coordinator.handle_intent(Intent::Quit);
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.coordinator.handle_intent(Intent::Quit),
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
                self.sync_focus();
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.cursor += 1;
                self.clamp_cursor();
                self.sync_focus();
            }
            KeyCode::Right | KeyCode::Char('l') => {
                if let Some(index) = self.cursor_node() {
                    if let Some(id) = self.cursor_command_id() {
                        self.coordinator.tree.set_selected(&id, true);
                    } else {
                        self.coordinator.tree.expand(index);
                    }
                }
            }
            KeyCode::Left | KeyCode::Char('h') => {
                if let Some(index) = self.cursor_node() {
                    if let Some(id) = self.cursor_command_id() {
                        self.coordinator.tree.set_selected(&id, false);
                    } else {
                        self.coordinator.tree.collapse(index);
                        self.clamp_cursor();
                    }
                }
            }
            KeyCode::Char(' ') => {
                if let Some(index) = self.cursor_node() {
                    self.coordinator.tree.toggle(index);
                }
            }
            KeyCode::Char('g') => self.coordinator.handle_intent(Intent::AutoSelectGit),
            KeyCode::Char('r') => {
                if let Some(id) = self.cursor_command_id() {
                    self.coordinator.handle_intent(Intent::RunOne(id));
                }
            }
            KeyCode::Char('s') => {
                if let Some(id) = self.cursor_command_id() {
                    self.coordinator.handle_intent(Intent::Stop(id));
                }
            }
            KeyCode::Char('c') => {
                if let Some(id) = self.cursor_command_id() {
                    self.coordinator.handle_intent(Intent::Clear(id));
                }
            }
            KeyCode::Enter => {
                let ids = self.coordinator.tree.selected_runnable_ids();
                if !ids.is_empty() {
                    self.coordinator.handle_intent(Intent::RunMany(ids));
                }
            }
            KeyCode::Tab => {
                if let Some(id) = self.coordinator.focused() {
                    if self.coordinator.emulator(id).is_some() {
                        self.focus = Focus::Terminal;
                    }
                }
            }
            _ => {}
        }
    }

    fn on_terminal_key(&mut self, key: KeyEvent) {
        let Some(id) = self.coordinator.focused().map(str::to_string) else {
            self.focus = Focus::Tree;
            return;
        };

        match key.code {
            KeyCode::Tab => self.focus = Focus::Tree,
            KeyCode::PageUp => {
                if let Some(handle) = self.coordinator.handle_mut(&id) {
                    handle.emulator.page_up();
                }
            }
            KeyCode::PageDown => {
                if let Some(handle) = self.coordinator.handle_mut(&id) {
                    handle.emulator.page_down();
                }
            }
            _ => {
                let Some(handle) = self.coordinator.handle_mut(&id) else {
                    return;
                };
                if !handle.interactive {
                    return;
                }
                let application_cursor = handle.emulator.screen().application_cursor();
                if let Some(bytes) = encode_key(key, application_cursor) {
                    let _ = handle.write(&bytes);
                }
            }
        }
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        let position = (mouse.column, mouse.row);
        let in_terminal = contains(self.layout.terminal, position);
        let in_tree = contains(self.layout.tree, position);

        match mouse.kind {
            MouseEventKind::ScrollUp => {
                if in_terminal {
                    if let Some(id) = self.coordinator.focused().map(str::to_string) {
                        if let Some(handle) = self.coordinator.handle_mut(&id) {
                            handle.emulator.scroll_up(3);
                        }
                    }
                } else if in_tree {
                    self.cursor = self.cursor.saturating_sub(1);
                    self.sync_focus();
                }
            }
            MouseEventKind::ScrollDown => {
                if in_terminal {
                    if let Some(id) = self.coordinator.focused().map(str::to_string) {
                        if let Some(handle) = self.coordinator.handle_mut(&id) {
                            handle.emulator.scroll_down(3);
                        }
                    }
                } else if in_tree {
                    self.cursor += 1;
                    self.clamp_cursor();
                    self.sync_focus();
                }
            }
            MouseEventKind::Down(MouseButton::Left) => {
                if in_tree {
                    self.focus = Focus::Tree;
                    // Rows start below the pane border.
                    if mouse.row > self.layout.tree.y {
                        let row = (mouse.row - self.layout.tree.y - 1) as usize;
                        let target = self.tree_scroll + row;
                        if target < self.coordinator.tree.visible_rows().len() {
                            self.cursor = target;
                            self.sync_focus();
                        }
                    }
                } else if in_terminal {
                    self.focus = Focus::Terminal;
                    if let Some(id) = self.coordinator.focused().map(str::to_string) {
                        // 1-based cell coordinates inside the bordered pane.
                        let x = mouse.column.saturating_sub(self.layout.terminal.x);
                        let y = mouse.row.saturating_sub(self.layout.terminal.y);
                        if x == 0 || y == 0 {
                            return;
                        }
                        if let Some(handle) = self.coordinator.handle_mut(&id) {
                            if handle.interactive {
                                handle.click(x, y);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn contains(area: Rect, (x, y): (u16, u16)) -> bool {
    x >= area.x && x < area.x + area.width && y >= area.y && y < area.y + area.height
}

/// Encode a key for the child, honouring the emulator's cursor-key mode.
fn encode_key(key: KeyEvent, application_cursor: bool) -> Option<Vec<u8>> {
    let seq = |s: &str| Some(s.as_bytes().to_vec());

    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                if c.is_ascii_alphabetic() {
                    Some(vec![(c.to_ascii_lowercase() as u8) - b'a' + 1])
                } else {
                    None
                }
            } else {
                Some(c.to_string().into_bytes())
            }
        }
        KeyCode::Enter => seq("\r"),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => seq(if application_cursor { "\x1bOA" } else { "\x1b[A" }),
        KeyCode::Down => seq(if application_cursor { "\x1bOB" } else { "\x1b[B" }),
        KeyCode::Right => seq(if application_cursor { "\x1bOC" } else { "\x1b[C" }),
        KeyCode::Left => seq(if application_cursor { "\x1bOD" } else { "\x1b[D" }),
        KeyCode::Home => seq(if application_cursor { "\x1bOH" } else { "\x1b[H" }),
        KeyCode::End => seq("\x1b[F"),
        KeyCode::Delete => seq("\x1b[3~"),
        KeyCode::BackTab => seq("\x1b[Z"),
        KeyCode::F(n) => match n {
            1 => seq("\x1bOP"),
            2 => seq("\x1bOQ"),
            3 => seq("\x1bOR"),
            4 => seq("\x1bOS"),
            5 => seq("\x1b[15~"),
            6 => seq("\x1b[17~"),
            7 => seq("\x1b[18~"),
            8 => seq("\x1b[19~"),
            9 => seq("\x1b[20~"),
            10 => seq("\x1b[21~"),
            11 => seq("\x1b[23~"),
            12 => seq("\x1b[24~"),
            _ => None,
        },
        _ => None,
    }
}
