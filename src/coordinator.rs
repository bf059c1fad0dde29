//! Application coordinator: the single mutation path for tree state and
//! process handles.
//!
//! The UI (or check mode) turns user actions into [`Intent`]s and calls
//! [`Coordinator::pump`] on every tick. The pump drains child output into
//! the owning emulators and maps supervisor exit events onto tree status
//! transitions, so everything that mutates shared state happens on this
//! thread.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use crate::auto;
use crate::config::Config;
use crate::exec::{self, CommandProcess, ExecEvent, ExecEventKind, SpawnSpec};
use crate::git::GitCache;
use crate::term::{self, TerminalEmulator};
use crate::tree::{CommandTree, Status};

/// How long the coordinator waits for a finished command's reader thread
/// to drain before echoing the completion banner.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RunOne(String),
    RunMany(Vec<String>),
    Stop(String),
    Clear(String),
    ToggleSelect(String),
    AutoSelectGit,
    Resize { rows: u16, cols: u16 },
    Quit,
}

/// A requested command whose dependencies have not all succeeded yet.
struct PendingRun {
    id: String,
    waiting_on: HashSet<String>,
}

pub struct Coordinator {
    pub tree: CommandTree,
    root_dir: PathBuf,
    handles: HashMap<String, CommandProcess>,
    events_tx: mpsc::Sender<ExecEvent>,
    events_rx: mpsc::Receiver<ExecEvent>,
    generations: HashMap<String, u64>,
    next_generation: u64,
    pending: Vec<PendingRun>,
    git_cache: GitCache,
    rows: u16,
    cols: u16,
    focused: Option<String>,
    quit: bool,
}

impl Coordinator {
    pub fn new(config: &Config, root_dir: PathBuf) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Coordinator {
            tree: CommandTree::from_config(config),
            root_dir,
            handles: HashMap::new(),
            events_tx,
            events_rx,
            generations: HashMap::new(),
            next_generation: 1,
            pending: Vec::new(),
            git_cache: GitCache::new(),
            rows: 24,
            cols: 80,
            focused: None,
            quit: false,
        }
    }

    pub fn root_dir(&self) -> &PathBuf {
        &self.root_dir
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn set_focused(&mut self, id: Option<String>) {
        self.focused = id;
    }

    /// Read-only emulator access for rendering.
    pub fn emulator(&self, id: &str) -> Option<&TerminalEmulator> {
        self.handles.get(id).map(|h| &h.emulator)
    }

    /// Mutable handle access for input forwarding and scrolling.
    pub fn handle_mut(&mut self, id: &str) -> Option<&mut CommandProcess> {
        self.handles.get_mut(id)
    }

    pub fn live_handle_count(&self) -> usize {
        self.handles.values().filter(|h| h.is_running()).count()
    }

    /// Select `always` and changed git commands; used once at startup.
    pub fn startup_auto_select(&mut self) {
        auto::select_startup(&mut self.tree, &mut self.git_cache, &self.root_dir);
    }

    pub fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::RunOne(id) => {
                self.pending.retain(|p| p.id != id);
                self.start(&id);
            }
            Intent::RunMany(ids) => self.run_many(ids),
            Intent::Stop(id) => self.stop(&id),
            Intent::Clear(id) => self.clear(&id),
            Intent::ToggleSelect(id) => self.tree.toggle_by_id(&id),
            Intent::AutoSelectGit => {
                auto::select_git(&mut self.tree, &mut self.git_cache, &self.root_dir);
            }
            Intent::Resize { rows, cols } => {
                self.rows = rows;
                self.cols = cols;
                for handle in self.handles.values_mut() {
                    handle.resize(rows, cols);
                }
            }
            Intent::Quit => self.shutdown(),
        }
    }

    /// Drain child output and supervisor events. Returns true when
    /// anything changed (the UI uses this to redraw lazily).
    pub fn pump(&mut self) -> bool {
        let mut activity = false;
        for handle in self.handles.values_mut() {
            activity |= handle.pump_output();
        }
        while let Ok(event) = self.events_rx.try_recv() {
            activity = true;
            self.handle_event(&event);
        }
        activity
    }

    fn start(&mut self, id: &str) {
        let Some(command) = self.tree.command_by_id(id).cloned() else {
            tracing::warn!("ignoring run intent for unknown command {id}");
            return;
        };

        if let Some(mut old) = self.handles.remove(id) {
            old.cancel();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.generations.insert(id.to_string(), generation);

        let cwd = match &command.cwd {
            Some(cwd) => self.root_dir.join(cwd),
            None => self.root_dir.clone(),
        };
        let spec = SpawnSpec {
            command_id: id,
            generation,
            cmd: &command.cmd,
            cwd: Some(&cwd),
            env: &command.env,
            interactive: command.interactive,
            rows: self.rows,
            cols: self.cols,
            scrollback: command.scrollback,
        };

        match exec::spawn(&spec, &self.events_tx) {
            Ok(process) => {
                self.handles.insert(id.to_string(), process);
                self.tree.set_status(id, Status::Running);
            }
            Err(e) => {
                tracing::error!("{e}");
                self.handles
                    .insert(id.to_string(), CommandProcess::from_spawn_error(&spec, &e));
                self.tree.set_status(id, Status::Failure);
                self.strand_dependents(id);
            }
        }
    }

    /// Run a set of commands in parallel, honouring dependency edges:
    /// `always` dependencies join the set, commands with in-set
    /// dependencies wait for them to succeed, everything else starts now.
    fn run_many(&mut self, ids: Vec<String>) {
        let mut set: Vec<String> = Vec::new();
        let mut queue = ids;
        while let Some(id) = queue.pop() {
            if set.contains(&id) {
                continue;
            }
            let Some(command) = self.tree.command_by_id(&id) else {
                continue;
            };
            for dep in &command.resolved_depends {
                if dep.always && !self.once_satisfied(dep.once, &dep.id) {
                    queue.push(dep.id.clone());
                }
            }
            set.push(id);
        }

        let members: HashSet<String> = set.iter().cloned().collect();
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for id in &set {
            let Some(command) = self.tree.command_by_id(id) else {
                continue;
            };
            let waiting_on: HashSet<String> = command
                .resolved_depends
                .iter()
                .filter(|dep| members.contains(&dep.id) && !self.once_satisfied(dep.once, &dep.id))
                .map(|dep| dep.id.clone())
                .collect();
            if waiting_on.is_empty() {
                ready.push(id.clone());
            } else {
                pending.push(PendingRun {
                    id: id.clone(),
                    waiting_on,
                });
            }
        }

        self.pending.retain(|p| !members.contains(&p.id));
        self.pending.extend(pending);
        for id in ready {
            self.start(&id);
        }
    }

    fn once_satisfied(&self, once: bool, id: &str) -> bool {
        once && self.tree.status(id) == Some(Status::Success)
    }

    fn stop(&mut self, id: &str) {
        if self.tree.status(id) != Some(Status::Running) {
            return;
        }
        if let Some(handle) = self.handles.get_mut(id) {
            handle.pump_output();
            handle.cancel();
            handle.emulator.echo(&term::stopped_message());
        }
        self.tree.set_status(id, Status::Failure);
        self.strand_dependents(id);
    }

    fn clear(&mut self, id: &str) {
        if self.tree.status(id) == Some(Status::Running) {
            return;
        }
        if let Some(handle) = self.handles.get_mut(id) {
            handle.emulator.clear();
            self.tree.set_status(id, Status::Pending);
        }
    }

    fn handle_event(&mut self, event: &ExecEvent) {
        // A replaced or restarted handle may still deliver events from its
        // old generation; those must not touch the current run.
        if self.generations.get(&event.command_id) != Some(&event.generation) {
            return;
        }

        match event.kind {
            ExecEventKind::Started => {}
            ExecEventKind::Exited(code) => {
                let Some(handle) = self.handles.get_mut(&event.command_id) else {
                    return;
                };
                handle.drain_remaining(DRAIN_TIMEOUT);
                let cancelled = handle.was_cancelled();
                handle.release_io();
                if cancelled {
                    // Stop already set the status and echoed its banner.
                    return;
                }

                if code == 0 {
                    handle.emulator.echo(&term::success_message());
                    self.tree.set_status(&event.command_id, Status::Success);
                    self.release_dependents(&event.command_id);
                } else {
                    handle.emulator.echo(&term::failure_message(code));
                    self.tree.set_status(&event.command_id, Status::Failure);
                    self.strand_dependents(&event.command_id);
                }
            }
        }
    }

    fn release_dependents(&mut self, id: &str) {
        for pending in &mut self.pending {
            pending.waiting_on.remove(id);
        }
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|p| p.waiting_on.is_empty())
            .map(|p| p.id.clone())
            .collect();
        self.pending.retain(|p| !p.waiting_on.is_empty());
        for id in ready {
            self.start(&id);
        }
    }

    fn strand_dependents(&mut self, id: &str) {
        let stranded: Vec<String> = self
            .pending
            .iter()
            .filter(|p| p.waiting_on.contains(id))
            .map(|p| p.id.clone())
            .collect();
        if !stranded.is_empty() {
            tracing::warn!("dependency {id} did not succeed; not starting {stranded:?}");
            self.pending.retain(|p| !p.waiting_on.contains(id));
        }
    }

    fn shutdown(&mut self) {
        self.pending.clear();
        for (_, mut handle) in self.handles.drain() {
            handle.cancel();
        }
        self.quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn coordinator_from(yaml: &str) -> (tempfile::TempDir, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.finalize().unwrap();
        let coordinator = Coordinator::new(&config, dir.path().to_path_buf());
        (dir, coordinator)
    }

    fn pump_until(
        coordinator: &mut Coordinator,
        timeout: Duration,
        mut done: impl FnMut(&Coordinator) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            coordinator.pump();
            if done(coordinator) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn run_one_success_path() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: ok
    id: ok
    cmd: echo hi
"#,
        );
        coordinator.tree.set_selected("ok", true);
        coordinator.handle_intent(Intent::RunOne("ok".to_string()));
        assert_eq!(coordinator.tree.status("ok"), Some(Status::Running));

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("ok") == Some(Status::Success)
        }));

        assert!(!coordinator.tree.is_selected("ok"));
        let text = coordinator.emulator("ok").unwrap().text().join("\n");
        assert!(text.contains("\u{276f} echo hi"));
        assert!(text.contains("hi"));
        assert!(text.contains("Success"));
    }

    #[test]
    fn run_one_failure_path() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: bad
    id: bad
    cmd: exit 7
"#,
        );
        coordinator.handle_intent(Intent::RunOne("bad".to_string()));
        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("bad") == Some(Status::Failure)
        }));

        let text = coordinator.emulator("bad").unwrap().text().join("\n");
        assert!(text.contains("(exit code 7)"), "bad banner: {text}");
    }

    #[test]
    fn stop_kills_the_child_and_marks_failure() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: sleep
    id: sleep
    cmd: sleep 60
"#,
        );
        coordinator.handle_intent(Intent::RunOne("sleep".to_string()));
        thread::sleep(Duration::from_millis(200));
        coordinator.pump();

        let stopped_at = Instant::now();
        coordinator.handle_intent(Intent::Stop("sleep".to_string()));
        assert_eq!(coordinator.tree.status("sleep"), Some(Status::Failure));

        assert!(pump_until(&mut coordinator, Duration::from_secs(3), |c| {
            c.live_handle_count() == 0
        }));
        assert!(stopped_at.elapsed() < Duration::from_secs(2));

        let text = coordinator.emulator("sleep").unwrap().text().join("\n");
        assert!(text.contains("Stopped"), "no stop banner: {text}");
    }

    #[test]
    fn stop_on_a_finished_command_is_a_noop() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: ok
    id: ok
    cmd: "true"
"#,
        );
        coordinator.handle_intent(Intent::RunOne("ok".to_string()));
        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("ok") == Some(Status::Success)
        }));

        coordinator.handle_intent(Intent::Stop("ok".to_string()));
        assert_eq!(coordinator.tree.status("ok"), Some(Status::Success));
    }

    #[test]
    fn run_many_executes_in_parallel() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: a
    id: a
    cmd: sleep 1
  - name: b
    id: b
    cmd: sleep 1
  - name: c
    id: c
    cmd: sleep 1
"#,
        );
        let started = Instant::now();
        coordinator.handle_intent(Intent::RunMany(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ]));

        for id in ["a", "b", "c"] {
            assert_eq!(coordinator.tree.status(id), Some(Status::Running));
        }

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            ["a", "b", "c"]
                .iter()
                .all(|id| c.tree.status(id) == Some(Status::Success))
        }));
        assert!(
            started.elapsed() < Duration::from_millis(2500),
            "commands did not run in parallel: {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn dependency_orders_start_times() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: build
    id: build
    cmd: sleep 0.3
  - name: test
    id: test
    cmd: "true"
    depends: [build]
"#,
        );
        coordinator.handle_intent(Intent::RunMany(vec![
            "build".to_string(),
            "test".to_string(),
        ]));

        assert_eq!(coordinator.tree.status("build"), Some(Status::Running));
        assert_eq!(coordinator.tree.status("test"), Some(Status::Pending));

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("test") == Some(Status::Success)
        }));
        assert_eq!(coordinator.tree.status("build"), Some(Status::Success));
    }

    #[test]
    fn always_dependency_joins_the_run_set() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: setup
    id: setup
    cmd: "true"
  - name: test
    id: test
    cmd: "true"
    depends:
      - path: setup
        always: true
"#,
        );
        coordinator.handle_intent(Intent::RunMany(vec!["test".to_string()]));
        assert_eq!(coordinator.tree.status("setup"), Some(Status::Running));

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("test") == Some(Status::Success)
        }));
    }

    #[test]
    fn failed_dependency_strands_its_dependents() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: build
    id: build
    cmd: "false"
  - name: test
    id: test
    cmd: "true"
    depends: [build]
"#,
        );
        coordinator.handle_intent(Intent::RunMany(vec![
            "build".to_string(),
            "test".to_string(),
        ]));

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("build") == Some(Status::Failure)
        }));

        // The dependent never starts.
        coordinator.pump();
        thread::sleep(Duration::from_millis(100));
        coordinator.pump();
        assert_eq!(coordinator.tree.status("test"), Some(Status::Pending));
    }

    #[test]
    fn restart_replaces_the_live_handle() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: task
    id: task
    cmd: sleep 1
"#,
        );
        coordinator.handle_intent(Intent::RunOne("task".to_string()));
        thread::sleep(Duration::from_millis(100));
        coordinator.handle_intent(Intent::RunOne("task".to_string()));

        assert!(coordinator.live_handle_count() <= 1);
        assert_eq!(coordinator.tree.status("task"), Some(Status::Running));

        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("task") == Some(Status::Success)
        }));
        assert_eq!(coordinator.live_handle_count(), 0);
    }

    #[test]
    fn clear_resets_a_finished_command() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: ok
    id: ok
    cmd: echo hi
"#,
        );
        coordinator.handle_intent(Intent::RunOne("ok".to_string()));
        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("ok") == Some(Status::Success)
        }));

        coordinator.handle_intent(Intent::Clear("ok".to_string()));
        assert_eq!(coordinator.tree.status("ok"), Some(Status::Pending));
        assert!(
            coordinator
                .emulator("ok")
                .unwrap()
                .text()
                .iter()
                .all(String::is_empty)
        );
    }

    #[test]
    fn clear_while_running_is_a_noop() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: sleep
    id: sleep
    cmd: sleep 1
"#,
        );
        coordinator.handle_intent(Intent::RunOne("sleep".to_string()));
        coordinator.handle_intent(Intent::Clear("sleep".to_string()));
        assert_eq!(coordinator.tree.status("sleep"), Some(Status::Running));
        let text = coordinator.emulator("sleep").unwrap().text().join("\n");
        assert!(text.contains("sleep 1"));

        coordinator.handle_intent(Intent::Quit);
    }

    #[test]
    fn resize_updates_dimensions_for_live_handles() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: sleep
    id: sleep
    cmd: sleep 1
"#,
        );
        coordinator.handle_intent(Intent::RunOne("sleep".to_string()));
        coordinator.handle_intent(Intent::Resize {
            rows: 30,
            cols: 100,
        });
        assert_eq!(coordinator.emulator("sleep").unwrap().size(), (30, 100));

        coordinator.handle_intent(Intent::Quit);
        assert!(coordinator.should_quit());
        assert_eq!(coordinator.live_handle_count(), 0);
    }

    #[test]
    fn spawn_failure_marks_failure_with_banner() {
        let (_dir, mut coordinator) = coordinator_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: broken
    id: broken
    cmd: echo never
    cwd: does/not/exist
"#,
        );
        coordinator.handle_intent(Intent::RunOne("broken".to_string()));
        assert!(pump_until(&mut coordinator, Duration::from_secs(5), |c| {
            c.tree.status("broken") == Some(Status::Failure)
        }));
        let text = coordinator.emulator("broken").unwrap().text().join("\n");
        assert!(
            text.contains("Failed to start") || text.contains("(exit code"),
            "no failure indication: {text}"
        );
    }
}
