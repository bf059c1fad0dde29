//! Headless check mode: run every auto-selected command and report.
//!
//! Drives the same [`Coordinator`] as the TUI, just without a screen.
//! The exit code is 0 iff every selected command succeeded.

use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::coordinator::{Coordinator, Intent};
use crate::tree::Status;

const POLL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Cancel everything outstanding on the first failure.
    pub fail_fast: bool,
    /// Accepted for CLI parity; this build never prompts to open the TUI.
    pub no_tui: bool,
    /// Suppress terminal output for commands that passed.
    pub mute_success: bool,
}

pub fn run(config: &Config, root_dir: PathBuf, options: CheckOptions) -> u8 {
    let mut coordinator = Coordinator::new(config, root_dir);
    coordinator.startup_auto_select();

    let ids = coordinator.tree.selected_runnable_ids();
    if ids.is_empty() {
        println!("nothing to check: no commands were auto-selected");
        return 0;
    }

    let paths = config.command_paths();
    let display = |id: &str| paths.get(id).cloned().unwrap_or_else(|| id.to_string());

    coordinator.handle_intent(Intent::RunMany(ids.clone()));

    let mut reported: HashSet<String> = HashSet::new();
    let mut any_failure = false;

    loop {
        coordinator.pump();

        for id in &ids {
            if reported.contains(id) {
                continue;
            }
            match coordinator.tree.status(id) {
                Some(Status::Success) => {
                    reported.insert(id.clone());
                    println!("\u{2714} {}", display(id));
                    if !options.mute_success {
                        print_output(&coordinator, id);
                    }
                }
                Some(Status::Failure) => {
                    reported.insert(id.clone());
                    any_failure = true;
                    println!("\u{2718} {}", display(id));
                    print_output(&coordinator, id);
                }
                _ => {}
            }
        }

        if options.fail_fast && any_failure {
            coordinator.handle_intent(Intent::Quit);
            break;
        }
        if reported.len() == ids.len() {
            break;
        }

        let still_running = ids
            .iter()
            .any(|id| coordinator.tree.status(id) == Some(Status::Running));
        if !still_running {
            // Remaining commands were stranded by a failed dependency.
            for id in &ids {
                if !reported.contains(id) {
                    any_failure = true;
                    println!("\u{2718} {} (dependency did not succeed)", display(id));
                }
            }
            break;
        }

        thread::sleep(POLL);
    }

    u8::from(any_failure)
}

fn print_output(coordinator: &Coordinator, id: &str) {
    if let Some(emulator) = coordinator.emulator(id) {
        for line in emulator.text() {
            if !line.is_empty() {
                println!("  {line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn config_from(yaml: &str) -> Config {
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.finalize().unwrap();
        config
    }

    #[test]
    fn all_passing_commands_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: a
    id: a
    cmd: echo one
    auto:
      always: true
  - name: b
    id: b
    cmd: echo two
    auto:
      always: true
"#,
        );
        let code = run(&config, dir.path().to_path_buf(), CheckOptions::default());
        assert_eq!(code, 0);
    }

    #[test]
    fn a_failing_command_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: good
    id: good
    cmd: "true"
    auto:
      always: true
  - name: bad
    id: bad
    cmd: exit 3
    auto:
      always: true
"#,
        );
        let code = run(&config, dir.path().to_path_buf(), CheckOptions::default());
        assert_eq!(code, 1);
    }

    #[test]
    fn nothing_selected_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: manual
    id: manual
    cmd: "true"
"#,
        );
        let code = run(&config, dir.path().to_path_buf(), CheckOptions::default());
        assert_eq!(code, 0);
    }

    #[test]
    fn fail_fast_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: slow
    id: slow
    cmd: sleep 5
    auto:
      always: true
  - name: bad
    id: bad
    cmd: "false"
    auto:
      always: true
"#,
        );
        let started = Instant::now();
        let code = run(
            &config,
            dir.path().to_path_buf(),
            CheckOptions {
                fail_fast: true,
                ..CheckOptions::default()
            },
        );
        assert_eq!(code, 1);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn stranded_dependents_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(
            r#"
fnug_version: "0.1.0"
name: root
commands:
  - name: build
    id: build
    cmd: "false"
    auto:
      always: true
  - name: test
    id: test
    cmd: "true"
    auto:
      always: true
    depends: [build]
"#,
        );
        let code = run(&config, dir.path().to_path_buf(), CheckOptions::default());
        assert_eq!(code, 1);
    }
}
