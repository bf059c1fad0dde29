//! Process supervision: one PTY-backed shell child per running command.
//!
//! [`spawn`] opens a PTY pair, echoes the start banner into the command's
//! emulator, and launches `/bin/sh -c <cmd>` in a new session with the
//! slave as stdin/stdout/stderr. Two threads serve the child: a reader
//! draining the master into a channel, and a waiter that reaps the child
//! and publishes a generation-tagged exit event. All emulator mutation
//! happens on the coordinator thread via [`CommandProcess::pump_output`].

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

use crate::term::{self, TerminalEmulator};

/// PTY reads are chunked at this size; each chunk returns to the channel
/// so a chatty child cannot starve the UI.
const READ_CHUNK: usize = 64 * 1024;

/// How long a cancelled child gets to react to SIGTERM before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
#[error("failed to start {cmd:?}: {message}")]
pub struct SpawnError {
    pub cmd: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecEvent {
    pub command_id: String,
    pub generation: u64,
    pub kind: ExecEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEventKind {
    Started,
    Exited(i32),
}

/// Everything to start one command run.
pub struct SpawnSpec<'a> {
    pub command_id: &'a str,
    pub generation: u64,
    pub cmd: &'a str,
    pub cwd: Option<&'a Path>,
    pub env: &'a BTreeMap<String, String>,
    pub interactive: bool,
    pub rows: u16,
    pub cols: u16,
    pub scrollback: Option<usize>,
}

struct PtyIo {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    output_rx: mpsc::Receiver<Vec<u8>>,
    child_pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

/// Runtime bundle for one in-flight command execution: PTY ends, child,
/// and the emulator its output feeds.
pub struct CommandProcess {
    pub command_id: String,
    pub generation: u64,
    pub emulator: TerminalEmulator,
    pub interactive: bool,
    cancelled: bool,
    io: Option<PtyIo>,
}

pub fn spawn(
    spec: &SpawnSpec<'_>,
    events: &mpsc::Sender<ExecEvent>,
) -> Result<CommandProcess, SpawnError> {
    let mut emulator = TerminalEmulator::new(spec.rows, spec.cols, spec.scrollback);
    emulator.echo(&term::start_message(spec.cmd));

    let fail = |message: String| SpawnError {
        cmd: spec.cmd.to_string(),
        message,
    };

    let pty_system = portable_pty::native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| fail(format!("failed to open PTY: {e}")))?;

    let mut builder = if cfg!(windows) {
        let mut b = CommandBuilder::new("cmd.exe");
        b.arg("/c");
        b
    } else {
        let mut b = CommandBuilder::new("/bin/sh");
        b.arg("-c");
        b
    };
    builder.arg(spec.cmd);
    if let Some(cwd) = spec.cwd {
        builder.cwd(cwd);
    }
    builder.env("TERM", "xterm-256color");
    for (key, value) in spec.env {
        builder.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(builder)
        .map_err(|e| fail(e.to_string()))?;
    drop(pair.slave);

    let child_pid = child.process_id();

    let _ = events.send(ExecEvent {
        command_id: spec.command_id.to_string(),
        generation: spec.generation,
        kind: ExecEventKind::Started,
    });

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| fail(format!("failed to get PTY writer: {e}")))?;
    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| fail(format!("failed to clone PTY reader: {e}")))?;

    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if output_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let exited = Arc::new(AtomicBool::new(false));
    let waiter_exited = Arc::clone(&exited);
    let waiter_events = events.clone();
    let waiter_id = spec.command_id.to_string();
    let generation = spec.generation;
    thread::spawn(move || {
        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => -1,
        };
        waiter_exited.store(true, Ordering::SeqCst);
        let _ = waiter_events.send(ExecEvent {
            command_id: waiter_id,
            generation,
            kind: ExecEventKind::Exited(code),
        });
    });

    Ok(CommandProcess {
        command_id: spec.command_id.to_string(),
        generation: spec.generation,
        emulator,
        interactive: spec.interactive,
        cancelled: false,
        io: Some(PtyIo {
            master: pair.master,
            writer,
            output_rx,
            child_pid,
            exited,
        }),
    })
}

impl CommandProcess {
    /// Handle for a command whose child never started: banner only, no I/O.
    pub fn from_spawn_error(spec: &SpawnSpec<'_>, error: &SpawnError) -> Self {
        let mut emulator = TerminalEmulator::new(spec.rows, spec.cols, spec.scrollback);
        emulator.echo(&term::start_message(spec.cmd));
        emulator.echo(&term::spawn_error_message(&error.message));
        CommandProcess {
            command_id: spec.command_id.to_string(),
            generation: spec.generation,
            emulator,
            interactive: spec.interactive,
            cancelled: false,
            io: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.io
            .as_ref()
            .is_some_and(|io| !io.exited.load(Ordering::SeqCst))
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Feed everything the reader thread has queued into the emulator.
    /// Returns true if any bytes arrived.
    pub fn pump_output(&mut self) -> bool {
        let Some(io) = self.io.as_mut() else {
            return false;
        };
        let mut fed = false;
        loop {
            match io.output_rx.try_recv() {
                Ok(bytes) => {
                    self.emulator.feed(&bytes);
                    fed = true;
                }
                Err(mpsc::TryRecvError::Empty | mpsc::TryRecvError::Disconnected) => break,
            }
        }
        fed
    }

    /// After exit: block briefly until the reader thread has drained the
    /// PTY, so completion banners land after the child's final output.
    pub fn drain_remaining(&mut self, timeout: Duration) {
        let Some(io) = self.io.as_mut() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match io.output_rx.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => self.emulator.feed(&bytes),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }
    }

    /// Forward keyboard bytes to the child.
    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(io) = self.io.as_mut() {
            io.writer.write_all(bytes)?;
            io.writer.flush()?;
        }
        Ok(())
    }

    /// Forward a mouse press+release at 1-based cell coordinates using
    /// SGR encoding.
    pub fn click(&mut self, x: u16, y: u16) {
        let _ = self.write(format!("\x1b[<0;{x};{y}M\x1b[<0;{x};{y}m").as_bytes());
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        if let Some(io) = self.io.as_ref() {
            let _ = io.master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
        self.emulator.resize(rows, cols);
    }

    /// Stop the child: SIGTERM to its process group now, SIGKILL from a
    /// detached thread if it is still alive after the grace window. Both
    /// PTY ends are released immediately; the waiter thread still reaps
    /// the child so no zombie is left behind.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        let Some(io) = self.io.take() else {
            return;
        };

        if !io.exited.load(Ordering::SeqCst) {
            #[cfg(unix)]
            if let Some(pid) = io.child_pid {
                let pgid = -(pid as i32);
                // SAFETY: kill() with a negative pid signals the child's
                // process group; the child was started in its own session.
                unsafe {
                    libc::kill(pgid, libc::SIGTERM);
                }
                let exited = Arc::clone(&io.exited);
                thread::spawn(move || {
                    let deadline = Instant::now() + KILL_GRACE;
                    while Instant::now() < deadline {
                        if exited.load(Ordering::SeqCst) {
                            return;
                        }
                        thread::sleep(Duration::from_millis(50));
                    }
                    // SAFETY: same process-group signal as above.
                    unsafe {
                        libc::kill(pgid, libc::SIGKILL);
                    }
                });
            }
        }

        drop(io);
    }

    /// Drop the PTY ends once the exit event has been handled.
    pub fn release_io(&mut self) {
        self.io = None;
    }
}

impl Drop for CommandProcess {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(id: &'a str, cmd: &'a str, env: &'a BTreeMap<String, String>) -> SpawnSpec<'a> {
        SpawnSpec {
            command_id: id,
            generation: 1,
            cmd,
            cwd: None,
            env,
            interactive: false,
            rows: 24,
            cols: 80,
            scrollback: None,
        }
    }

    fn wait_exit(events: &mpsc::Receiver<ExecEvent>, timeout: Duration) -> ExecEvent {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = events.recv_timeout(remaining).expect("no exit event");
            if matches!(event.kind, ExecEventKind::Exited(_)) {
                return event;
            }
        }
    }

    #[test]
    fn echo_command_succeeds_with_output() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let mut process = spawn(&spec("ok", "echo hi", &env), &tx).unwrap();

        let event = wait_exit(&rx, Duration::from_secs(5));
        assert_eq!(event.kind, ExecEventKind::Exited(0));
        assert_eq!(event.command_id, "ok");

        process.drain_remaining(Duration::from_secs(1));
        let text = process.emulator.text().join("\n");
        assert!(text.contains("\u{276f} echo hi"), "banner missing: {text}");
        assert!(text.contains("hi"));
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let _process = spawn(&spec("bad", "exit 7", &env), &tx).unwrap();

        let event = wait_exit(&rx, Duration::from_secs(5));
        assert_eq!(event.kind, ExecEventKind::Exited(7));
    }

    #[test]
    fn started_event_precedes_exit() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let _process = spawn(&spec("fast", "true", &env), &tx).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.kind, ExecEventKind::Started);
    }

    #[test]
    fn cancel_kills_a_long_running_child() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let mut process = spawn(&spec("sleep", "sleep 60", &env), &tx).unwrap();
        assert!(process.is_running());

        let started = Instant::now();
        process.cancel();
        wait_exit(&rx, Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!process.is_running());
        assert!(process.was_cancelled());
    }

    #[test]
    fn cancel_after_natural_exit_is_a_noop() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let mut process = spawn(&spec("done", "true", &env), &tx).unwrap();
        wait_exit(&rx, Duration::from_secs(5));

        process.cancel();
        assert!(!process.is_running());
    }

    #[test]
    fn write_reaches_the_child() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let mut process = spawn(&spec("cat", "cat", &env), &tx).unwrap();

        process.write(b"hello\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            process.pump_output();
            if process.emulator.text().join("\n").contains("hello") {
                break;
            }
            assert!(Instant::now() < deadline, "never saw echoed input");
            thread::sleep(Duration::from_millis(20));
        }

        process.cancel();
        wait_exit(&rx, Duration::from_secs(3));
    }

    #[test]
    fn child_env_includes_config_vars() {
        let (tx, rx) = mpsc::channel();
        let mut env = BTreeMap::new();
        env.insert("FNUG_TEST_VAR".to_string(), "marker-value".to_string());
        let mut process = spawn(&spec("env", "echo $FNUG_TEST_VAR", &env), &tx).unwrap();

        wait_exit(&rx, Duration::from_secs(5));
        process.drain_remaining(Duration::from_secs(1));
        assert!(
            process
                .emulator
                .text()
                .join("\n")
                .contains("marker-value")
        );
    }

    #[test]
    fn resize_while_running_does_not_lose_output() {
        let (tx, rx) = mpsc::channel();
        let env = BTreeMap::new();
        let mut process = spawn(&spec("resize", "echo before; sleep 1; echo after", &env), &tx)
            .unwrap();

        thread::sleep(Duration::from_millis(300));
        process.pump_output();
        process.resize(30, 100);

        wait_exit(&rx, Duration::from_secs(5));
        process.drain_remaining(Duration::from_secs(1));
        let text = process.emulator.text().join("\n");
        assert!(text.contains("before"));
        assert!(text.contains("after"));
        assert_eq!(process.emulator.size(), (30, 100));
    }

    #[test]
    fn spawn_error_handle_carries_banner() {
        let env = BTreeMap::new();
        let spec = spec("broken", "whatever", &env);
        let error = SpawnError {
            cmd: "whatever".to_string(),
            message: "no such directory".to_string(),
        };
        let process = CommandProcess::from_spawn_error(&spec, &error);
        assert!(!process.is_running());
        let text = process.emulator.text().join("\n");
        assert!(text.contains("Failed to start"));
        assert!(text.contains("no such directory"));
    }
}
