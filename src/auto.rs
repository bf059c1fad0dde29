//! Auto-selection: marking commands for execution.
//!
//! Two sources feed the selected set. A one-shot git pass (startup and
//! the `g` key) asks [`crate::git`] whether each git-auto command has
//! changes under its paths. A streaming pass matches watcher batches
//! against [`WatchTargets`]. Selection is monotonic here: passes only
//! turn bits on; the user and the success rule turn them off.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::git::{self, GitCache};
use crate::tree::CommandTree;
use crate::watch::Change;

fn compile_regexes(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("ignoring invalid auto regex {pattern:?}: {e}");
                None
            }
        })
        .collect()
}

/// Startup pass: `always` commands unconditionally, then the git pass.
pub fn select_startup(tree: &mut CommandTree, cache: &mut GitCache, root_dir: &Path) {
    let always: Vec<String> = tree
        .commands()
        .filter(|c| c.auto.always_enabled())
        .map(|c| c.id.clone())
        .collect();
    for id in always {
        tree.set_selected(&id, true);
    }

    select_git(tree, cache, root_dir);
}

/// One-shot git pass. The cache is cleared first so back-to-back passes
/// see fresh repository state; a command is selected when any of its auto
/// paths has matching changes. Repo errors are warnings and read as "no
/// changes".
pub fn select_git(tree: &mut CommandTree, cache: &mut GitCache, root_dir: &Path) {
    cache.clear();

    let candidates: Vec<(String, Vec<PathBuf>, Vec<Regex>)> = tree
        .commands()
        .filter(|c| c.auto.git_enabled())
        .map(|c| {
            (
                c.id.clone(),
                c.auto.paths().iter().map(|p| root_dir.join(p)).collect(),
                compile_regexes(c.auto.regexes()),
            )
        })
        .collect();

    for (id, paths, regexes) in candidates {
        let changed = paths.iter().any(|path| {
            match git::has_changes(cache, path, &regexes) {
                Ok(changed) => changed,
                Err(e) => {
                    tracing::warn!("git auto-selection skipped for {}: {e}", path.display());
                    false
                }
            }
        });
        if changed {
            tree.set_selected(&id, true);
        }
    }
}

/// One watched path for one command, plus its regex filter.
struct WatchTarget {
    command_id: String,
    path: PathBuf,
    regexes: Vec<Regex>,
}

/// Mapping from watched paths to the commands they select.
pub struct WatchTargets {
    targets: Vec<WatchTarget>,
    root_dir: PathBuf,
}

impl WatchTargets {
    pub fn from_tree(tree: &CommandTree, root_dir: &Path) -> Self {
        let root_dir = root_dir
            .canonicalize()
            .unwrap_or_else(|_| root_dir.to_path_buf());

        let mut targets = Vec::new();
        for command in tree.commands().filter(|c| c.auto.watch_enabled()) {
            let regexes = compile_regexes(command.auto.regexes());
            for path in command.auto.paths() {
                let joined = root_dir.join(path);
                let path = joined.canonicalize().unwrap_or(joined);
                targets.push(WatchTarget {
                    command_id: command.id.clone(),
                    path,
                    regexes: regexes.clone(),
                });
            }
        }

        WatchTargets { targets, root_dir }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The distinct paths the watcher should attach to.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for target in &self.targets {
            if !paths.contains(&target.path) {
                paths.push(target.path.clone());
            }
        }
        paths
    }

    /// Command ids selected by a watcher batch: the watched path must be
    /// an ancestor of the change path, and the regex filter (if any) must
    /// match the change path relative to the config root.
    pub fn match_batch(&self, batch: &[Change]) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for target in &self.targets {
            if ids.iter().any(|id| id == &target.command_id) {
                continue;
            }
            let hit = batch.iter().any(|change| {
                if !change.path.starts_with(&target.path) {
                    return false;
                }
                if target.regexes.is_empty() {
                    return true;
                }
                let relative = change
                    .path
                    .strip_prefix(&self.root_dir)
                    .unwrap_or(&change.path)
                    .to_string_lossy();
                target.regexes.iter().any(|regex| regex.is_match(&relative))
            });
            if hit {
                ids.push(target.command_id.clone());
            }
        }
        ids
    }
}
