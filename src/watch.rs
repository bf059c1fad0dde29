//! Debounced filesystem watcher.
//!
//! Wraps a `notify` recommended watcher in a background thread that
//! coalesces raw events into batches: one send per debounce tick, each
//! change carrying the path and the latest kind observed for it. The
//! thread polls its channel at the step interval so the stop flag is
//! honoured promptly even when the watched tree is quiet.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};

/// Minimum time a batch accumulates before it is emitted.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(5000);

/// How often the coalescing thread wakes to check the window and stop flag.
pub const POLL_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Owns the watcher thread; stopping (or dropping) joins it.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Recursively watch `paths`, sending coalesced batches to `batches`.
///
/// Paths that fail to attach are logged and skipped; watching continues
/// with the rest.
pub fn watch(
    paths: &[PathBuf],
    batches: mpsc::Sender<Vec<Change>>,
) -> Result<WatchHandle, notify::Error> {
    watch_with(paths, batches, DEBOUNCE_WINDOW, POLL_STEP)
}

pub fn watch_with(
    paths: &[PathBuf],
    batches: mpsc::Sender<Vec<Change>>,
    window: Duration,
    step: Duration,
) -> Result<WatchHandle, notify::Error> {
    let (raw_tx, raw_rx) = mpsc::channel::<Result<Event, notify::Error>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })?;

    for path in paths {
        if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
            tracing::warn!("failed to watch {}: {e}", path.display());
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let thread = thread::spawn(move || {
        // Moved in so the backend stays alive for the thread's lifetime.
        let _watcher = watcher;
        let mut pending: Vec<Change> = Vec::new();
        let mut window_start: Option<Instant> = None;

        loop {
            if thread_stop.load(Ordering::Relaxed) {
                break;
            }

            match raw_rx.recv_timeout(step) {
                Ok(Ok(event)) => {
                    if let Some(kind) = map_kind(event.kind) {
                        for path in event.paths {
                            coalesce(&mut pending, path, kind);
                        }
                        if !pending.is_empty() {
                            window_start.get_or_insert_with(Instant::now);
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("watch backend error: {e}");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if let Some(start) = window_start {
                if start.elapsed() >= window && !pending.is_empty() {
                    if batches.send(std::mem::take(&mut pending)).is_err() {
                        break;
                    }
                    window_start = None;
                }
            }
        }
    });

    Ok(WatchHandle {
        stop,
        thread: Some(thread),
    })
}

fn map_kind(kind: EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// One record per path within a batch; the latest kind wins.
fn coalesce(pending: &mut Vec<Change>, path: PathBuf, kind: ChangeKind) {
    if let Some(existing) = pending.iter_mut().find(|c| c.path == path) {
        existing.kind = kind;
    } else {
        pending.push(Change { path, kind });
    }
}
