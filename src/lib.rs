//! Fnug: a terminal UI that runs a configured tree of lint/test commands
//! in PTY-backed subprocesses, selecting them by git changes, filesystem
//! watches, or by hand.

pub mod auto;
pub mod check;
pub mod config;
pub mod coordinator;
pub mod exec;
pub mod git;
pub mod logging;
pub mod term;
pub mod tree;
pub mod tui;
pub mod watch;
