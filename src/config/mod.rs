//! Configuration model: a tree of command groups loaded from
//! `.fnug.{json,yaml,yml}`.
//!
//! Loading parses the document, assigns ids, merges group-level auto
//! rules, env maps, and working directories down into each command, and
//! validates the result. After `load` returns, every command carries its
//! effective settings and the tree is treated as frozen.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The only config schema version this build understands.
pub const CONFIG_VERSION: &str = "0.1.0";

/// Names probed (in order) when no `--config` path is given.
pub const DEFAULT_FILE_NAMES: [&str; 3] = [".fnug.json", ".fnug.yaml", ".fnug.yml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported fnug_version {found:?} (expected {CONFIG_VERSION:?})")]
    UnknownVersion { found: String },
    #[error("group {path:?} has no commands or children")]
    EmptyGroup { path: String },
    #[error("auto rule on {path:?} enables git or watch but has no path")]
    MissingAutoPath { path: String },
    #[error("duplicate id {id:?} (used by {first:?} and {second:?})")]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },
    #[error("dependency {dep:?} of {path:?} does not match any command")]
    UnknownDependency { path: String, dep: String },
    #[error("dependency cycle involving {path:?}")]
    DependencyCycle { path: String },
    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Automation policy for a command or group.
///
/// On a freshly parsed group this is whatever the file said; on a command
/// after load it is the effective (parent-merged) rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathBuf>>,
}

impl AutoRule {
    /// Field-wise merge: any field this rule sets wins over `parent`.
    pub fn merge(&self, parent: &AutoRule) -> AutoRule {
        AutoRule {
            git: self.git.or(parent.git),
            watch: self.watch.or(parent.watch),
            always: self.always.or(parent.always),
            regex: self.regex.clone().or_else(|| parent.regex.clone()),
            path: self.path.clone().or_else(|| parent.path.clone()),
        }
    }

    pub fn is_unset(&self) -> bool {
        self == &AutoRule::default()
    }

    pub fn git_enabled(&self) -> bool {
        self.git == Some(true)
    }

    pub fn watch_enabled(&self) -> bool {
        self.watch == Some(true)
    }

    pub fn always_enabled(&self) -> bool {
        self.always == Some(true)
    }

    pub fn paths(&self) -> &[PathBuf] {
        self.path.as_deref().unwrap_or(&[])
    }

    pub fn regexes(&self) -> &[String] {
        self.regex.as_deref().unwrap_or(&[])
    }
}

/// A dependency edge as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default, skip_serializing_if = "is_false")]
        always: bool,
        #[serde(default, skip_serializing_if = "is_false")]
        once: bool,
    },
}

impl DependsEntry {
    fn path(&self) -> &str {
        match self {
            DependsEntry::Path(path) => path,
            DependsEntry::Detailed { path, .. } => path,
        }
    }

    fn flags(&self) -> (bool, bool) {
        match self {
            DependsEntry::Path(_) => (false, false),
            DependsEntry::Detailed { always, once, .. } => (*always, *once),
        }
    }
}

/// A dependency edge after resolution, keyed by the target command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub always: bool,
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default = "new_id")]
    pub id: String,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "AutoRule::is_unset")]
    pub auto: AutoRule,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<DependsEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrollback: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip)]
    pub resolved_depends: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "AutoRule::is_unset")]
    pub auto: AutoRule,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Group>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub fnug_version: String,
    #[serde(flatten)]
    pub root: Group,
}

impl Config {
    /// Load and finalize a config file, dispatching on the file suffix
    /// (`.yaml`/`.yml` vs JSON).
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );

        let mut config: Config = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        config.finalize()?;
        Ok(config)
    }

    /// Probe the default file names under `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Serialize the effective tree back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Merge inherited settings into every command and validate the tree.
    ///
    /// Idempotent: loading the output of `to_yaml` yields an equal config.
    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.fnug_version != CONFIG_VERSION {
            return Err(ConfigError::UnknownVersion {
                found: self.fnug_version.clone(),
            });
        }

        propagate(&mut self.root, &AutoRule::default(), &BTreeMap::new(), None);
        validate(&self.root)?;
        resolve_depends(&mut self.root)?;
        detect_cycles(&self.root)?;
        Ok(())
    }

    /// All commands in pre-order.
    pub fn commands(&self) -> Vec<&Command> {
        let mut out = Vec::new();
        collect_commands(&self.root, &mut out);
        out
    }

    pub fn command(&self, id: &str) -> Option<&Command> {
        self.commands().into_iter().find(|c| c.id == id)
    }

    /// Map of command id to its dotted logical path (ancestor group names
    /// below the root, joined by `.`), used for display and fuzzy search.
    pub fn command_paths(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let mut segments = Vec::new();
        collect_paths(&self.root, &mut segments, &mut out);
        out
    }
}

fn propagate(
    group: &mut Group,
    parent_auto: &AutoRule,
    parent_env: &BTreeMap<String, String>,
    parent_cwd: Option<&Path>,
) {
    group.auto = group.auto.merge(parent_auto);

    let mut env = parent_env.clone();
    env.extend(group.env.clone());

    let cwd = match (parent_cwd, group.cwd.as_deref()) {
        (Some(parent), Some(own)) => Some(parent.join(own)),
        (Some(parent), None) => Some(parent.to_path_buf()),
        (None, Some(own)) => Some(own.to_path_buf()),
        (None, None) => None,
    };
    // Group cwds are consumed into commands so that re-finalizing the
    // serialized effective tree does not join them twice.
    group.cwd = None;

    for command in &mut group.commands {
        command.auto = command.auto.merge(&group.auto);

        let mut merged_env = env.clone();
        merged_env.extend(command.env.clone());
        command.env = merged_env;

        command.cwd = match (cwd.as_deref(), command.cwd.as_deref()) {
            (Some(parent), Some(own)) => Some(parent.join(own)),
            (Some(parent), None) => Some(parent.to_path_buf()),
            (None, own) => own.map(Path::to_path_buf),
        };
    }

    for child in &mut group.children {
        propagate(child, &group.auto, &env, cwd.as_deref());
    }
}

fn validate(root: &Group) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut segments = Vec::new();
    validate_group(root, &mut segments, &mut seen, true)
}

fn validate_group(
    group: &Group,
    segments: &mut Vec<String>,
    seen: &mut HashMap<String, String>,
    is_root: bool,
) -> Result<(), ConfigError> {
    if !is_root {
        segments.push(group.name.clone());
    }
    let group_path = display_path(segments, None);

    if group.commands.is_empty() && group.children.is_empty() {
        return Err(ConfigError::EmptyGroup { path: group_path });
    }

    record_id(seen, &group.id, &group_path)?;

    for command in &group.commands {
        let path = display_path(segments, Some(&command.name));
        record_id(seen, &command.id, &path)?;

        if (command.auto.git_enabled() || command.auto.watch_enabled())
            && command.auto.paths().is_empty()
        {
            return Err(ConfigError::MissingAutoPath { path });
        }
    }

    for child in &group.children {
        validate_group(child, segments, seen, false)?;
    }

    if !is_root {
        segments.pop();
    }
    Ok(())
}

fn record_id(
    seen: &mut HashMap<String, String>,
    id: &str,
    path: &str,
) -> Result<(), ConfigError> {
    if let Some(first) = seen.insert(id.to_string(), path.to_string()) {
        return Err(ConfigError::DuplicateId {
            id: id.to_string(),
            first,
            second: path.to_string(),
        });
    }
    Ok(())
}

fn display_path(segments: &[String], leaf: Option<&str>) -> String {
    let mut parts: Vec<&str> = segments.iter().map(String::as_str).collect();
    if let Some(leaf) = leaf {
        parts.push(leaf);
    }
    if parts.is_empty() {
        String::from(".")
    } else {
        parts.join(".")
    }
}

/// Logical slash-separated location of every command, used for resolving
/// relative dependency paths.
fn logical_locations(root: &Group) -> HashMap<String, String> {
    fn walk(group: &Group, prefix: &str, out: &mut HashMap<String, String>) {
        for command in &group.commands {
            let loc = if prefix.is_empty() {
                command.name.clone()
            } else {
                format!("{prefix}/{}", command.name)
            };
            out.insert(loc, command.id.clone());
        }
        for child in &group.children {
            let child_prefix = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{prefix}/{}", child.name)
            };
            walk(child, &child_prefix, out);
        }
    }

    let mut out = HashMap::new();
    walk(root, "", &mut out);
    out
}

fn resolve_depends(root: &mut Group) -> Result<(), ConfigError> {
    let locations = logical_locations(root);

    fn resolve_segments(base: &[String], dep: &str) -> String {
        let mut segments: Vec<&str> = base.iter().map(String::as_str).collect();
        for part in dep.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        segments.join("/")
    }

    fn walk(
        group: &mut Group,
        prefix: &mut Vec<String>,
        locations: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        for command in &mut group.commands {
            let mut resolved = Vec::with_capacity(command.depends.len());
            for entry in &command.depends {
                let dep = entry.path();
                let relative = resolve_segments(prefix, dep);
                let id = locations
                    .get(&relative)
                    .or_else(|| locations.get(&resolve_segments(&[], dep)))
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        path: command.name.clone(),
                        dep: dep.to_string(),
                    })?;
                let (always, once) = entry.flags();
                resolved.push(Dependency {
                    id: id.clone(),
                    always,
                    once,
                });
            }
            command.resolved_depends = resolved;
        }

        for child in &mut group.children {
            prefix.push(child.name.clone());
            walk(child, prefix, locations)?;
            prefix.pop();
        }
        Ok(())
    }

    walk(root, &mut Vec::new(), &locations)
}

fn detect_cycles(root: &Group) -> Result<(), ConfigError> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut all = Vec::new();
    collect_commands(root, &mut all);
    for command in &all {
        names.insert(command.id.as_str(), command.name.as_str());
        edges.insert(
            command.id.as_str(),
            command
                .resolved_depends
                .iter()
                .map(|d| d.id.as_str())
                .collect(),
        );
    }

    fn visit<'a>(
        id: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        done: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
    ) -> bool {
        if done.contains(id) {
            return true;
        }
        if !in_progress.insert(id) {
            return false;
        }
        for dep in edges.get(id).into_iter().flatten() {
            if !visit(dep, edges, done, in_progress) {
                return false;
            }
        }
        in_progress.remove(id);
        done.insert(id);
        true
    }

    let mut done: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();
    for command in &all {
        if !visit(&command.id, &edges, &mut done, &mut in_progress) {
            return Err(ConfigError::DependencyCycle {
                path: command.name.clone(),
            });
        }
    }
    Ok(())
}

fn collect_commands<'a>(group: &'a Group, out: &mut Vec<&'a Command>) {
    for command in &group.commands {
        out.push(command);
    }
    for child in &group.children {
        collect_commands(child, out);
    }
}

fn collect_paths(group: &Group, segments: &mut Vec<String>, out: &mut HashMap<String, String>) {
    for command in &group.commands {
        out.insert(
            command.id.clone(),
            display_path(segments, Some(&command.name)),
        );
    }
    for child in &group.children {
        segments.push(child.name.clone());
        collect_paths(child, segments, out);
        segments.pop();
    }
}
