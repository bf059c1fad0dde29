//! Terminal UI built on ratatui.
//!
//! A tree of commands on the left, the focused command's embedded
//! terminal on the right. The UI owns no state of its own beyond cursor
//! and focus; everything else lives in the [`crate::coordinator`].

mod app;
mod ui;
mod widget;

use std::io::stdout;
use std::path::PathBuf;

use anyhow::Result;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;

use crate::config::Config;

pub fn run(config: &Config, root_dir: PathBuf) -> Result<()> {
    let mut terminal = ratatui::init();
    execute!(stdout(), EnableMouseCapture)?;
    let mut app = app::App::new(config, root_dir);
    let result = app.run(&mut terminal);
    let _ = execute!(stdout(), DisableMouseCapture);
    ratatui::restore();
    result
}
