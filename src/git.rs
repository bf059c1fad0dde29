//! Git change detection for the auto-selection engine.
//!
//! Shells out to `git status --porcelain=v1` and reports whether a path
//! has tracked or untracked changes. Results are memoised in an
//! explicitly-owned [`GitCache`] that the selection pass clears before
//! each run, so back-to-back passes see fresh state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),
    #[error("git status failed in {path}: {message}")]
    StatusFailed { path: PathBuf, message: String },
}

/// Memoised repo roots and porcelain output, keyed by (root, sub-path).
#[derive(Debug, Default)]
pub struct GitCache {
    roots: HashMap<PathBuf, Option<PathBuf>>,
    status: HashMap<(PathBuf, Option<PathBuf>), Vec<String>>,
}

impl GitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; the next query hits git again.
    pub fn clear(&mut self) {
        self.roots.clear();
        self.status.clear();
    }
}

/// Walk upward from `path` until a `.git` entry is found.
pub fn discover_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.join(".git").exists())
        .map(Path::to_path_buf)
}

/// True iff git reports at least one changed file under `path`, optionally
/// filtered to files whose repo-relative path matches any of `regexes`.
pub fn has_changes(
    cache: &mut GitCache,
    path: &Path,
    regexes: &[Regex],
) -> Result<bool, GitError> {
    let root = cache
        .roots
        .entry(path.to_path_buf())
        .or_insert_with(|| discover_root(path))
        .clone()
        .ok_or_else(|| GitError::NotARepository(path.to_path_buf()))?;

    let sub = path
        .strip_prefix(&root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);

    let files = status_files(cache, &root, sub)?;
    if regexes.is_empty() {
        return Ok(!files.is_empty());
    }
    Ok(files
        .iter()
        .any(|file| regexes.iter().any(|regex| regex.is_match(file))))
}

fn status_files<'a>(
    cache: &'a mut GitCache,
    root: &Path,
    sub: Option<PathBuf>,
) -> Result<&'a [String], GitError> {
    let key = (root.to_path_buf(), sub);
    if !cache.status.contains_key(&key) {
        let files = run_status(root, key.1.as_deref())?;
        cache.status.insert(key.clone(), files);
    }
    Ok(cache.status.get(&key).map(Vec::as_slice).unwrap_or(&[]))
}

fn run_status(root: &Path, sub: Option<&Path>) -> Result<Vec<String>, GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(root)
        .args(["status", "--porcelain=v1"]);
    if let Some(sub) = sub {
        cmd.arg(sub);
    }

    let output = cmd.output().map_err(|e| GitError::StatusFailed {
        path: root.to_path_buf(),
        message: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(GitError::StatusFailed {
            path: root.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    // Porcelain v1: two status bytes, a space, then the path (renames keep
    // the whole "old -> new" remainder).
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| line[3..].to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&status.stderr)
        );
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test"]);
    }

    fn commit_all(dir: &Path) {
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn errors_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = GitCache::new();
        let err = has_changes(&mut cache, dir.path(), &[]).unwrap_err();
        assert!(matches!(err, GitError::NotARepository(_)));
    }

    #[test]
    fn clean_repo_has_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        commit_all(dir.path());

        let mut cache = GitCache::new();
        assert!(!has_changes(&mut cache, dir.path(), &[]).unwrap());
    }

    #[test]
    fn untracked_file_counts_as_change() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        commit_all(dir.path());
        fs::write(dir.path().join("new.txt"), "new").unwrap();

        let mut cache = GitCache::new();
        assert!(has_changes(&mut cache, dir.path(), &[]).unwrap());
    }

    #[test]
    fn modified_file_under_sub_path() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "a").unwrap();
        fs::write(dir.path().join("docs/readme.md"), "b").unwrap();
        commit_all(dir.path());

        fs::write(dir.path().join("src/lib.rs"), "changed").unwrap();

        let mut cache = GitCache::new();
        assert!(has_changes(&mut cache, &dir.path().join("src"), &[]).unwrap());
        assert!(!has_changes(&mut cache, &dir.path().join("docs"), &[]).unwrap());
    }

    #[test]
    fn regex_filters_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("keep.py"), "x").unwrap();
        commit_all(dir.path());
        fs::write(dir.path().join("keep.py"), "y").unwrap();

        let mut cache = GitCache::new();
        let rust_only = [Regex::new(r"\.rs$").unwrap()];
        assert!(!has_changes(&mut cache, dir.path(), &rust_only).unwrap());

        let python = [Regex::new(r"\.py$").unwrap()];
        assert!(has_changes(&mut cache, dir.path(), &python).unwrap());
    }

    #[test]
    fn results_are_cached_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        commit_all(dir.path());

        let mut cache = GitCache::new();
        assert!(!has_changes(&mut cache, dir.path(), &[]).unwrap());

        fs::write(dir.path().join("b.txt"), "b").unwrap();
        assert!(!has_changes(&mut cache, dir.path(), &[]).unwrap());

        cache.clear();
        assert!(has_changes(&mut cache, dir.path(), &[]).unwrap());
    }
}
