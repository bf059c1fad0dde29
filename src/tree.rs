//! Runtime tree state layered over the frozen config.
//!
//! Nodes live in a flat arena and refer to each other by index; the
//! mutable per-node state (selection, status, expansion) sits in a
//! parallel vector keyed by the same index. Aggregate counters are
//! recomputed on demand by traversal, never stored.

use std::collections::HashMap;

use crate::config::{Command, Config, Group};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Running,
    Success,
    Failure,
}

#[derive(Debug)]
pub enum NodeKind {
    Group { children: Vec<NodeId> },
    Command { command: Command },
}

#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_command(&self) -> bool {
        matches!(self.kind, NodeKind::Command { .. })
    }

    pub fn command(&self) -> Option<&Command> {
        match &self.kind {
            NodeKind::Command { command } => Some(command),
            NodeKind::Group { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub selected: bool,
    pub status: Status,
    pub expanded: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState {
            selected: false,
            status: Status::Pending,
            expanded: true,
        }
    }
}

/// Aggregate over a group's descendant commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandSum {
    pub total: usize,
    pub selected: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
}

pub struct CommandTree {
    nodes: Vec<Node>,
    state: Vec<NodeState>,
    by_id: HashMap<String, NodeId>,
    root: NodeId,
}

impl CommandTree {
    pub fn from_config(config: &Config) -> Self {
        let mut tree = CommandTree {
            nodes: Vec::new(),
            state: Vec::new(),
            by_id: HashMap::new(),
            root: 0,
        };
        tree.root = tree.add_group(&config.root, None);
        tree
    }

    fn add_group(&mut self, group: &Group, parent: Option<NodeId>) -> NodeId {
        let index = self.push_node(Node {
            id: group.id.clone(),
            name: group.name.clone(),
            parent,
            kind: NodeKind::Group {
                children: Vec::new(),
            },
        });

        let mut children = Vec::with_capacity(group.commands.len() + group.children.len());
        for command in &group.commands {
            children.push(self.push_node(Node {
                id: command.id.clone(),
                name: command.name.clone(),
                parent: Some(index),
                kind: NodeKind::Command {
                    command: command.clone(),
                },
            }));
        }
        for child in &group.children {
            children.push(self.add_group(child, Some(index)));
        }

        match &mut self.nodes[index].kind {
            NodeKind::Group { children: slot } => *slot = children,
            NodeKind::Command { .. } => unreachable!("group node changed kind"),
        }
        index
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let index = self.nodes.len();
        self.by_id.insert(node.id.clone(), index);
        self.nodes.push(node);
        self.state.push(NodeState::default());
        index
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, index: NodeId) -> &Node {
        &self.nodes[index]
    }

    pub fn state(&self, index: NodeId) -> NodeState {
        self.state[index]
    }

    pub fn node_id(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    pub fn command_by_id(&self, id: &str) -> Option<&Command> {
        self.by_id
            .get(id)
            .and_then(|&index| self.nodes[index].command())
    }

    /// All command configs in tree order.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.nodes.iter().filter_map(Node::command)
    }

    pub fn status(&self, id: &str) -> Option<Status> {
        self.by_id.get(id).map(|&index| self.state[index].status)
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|&index| self.state[index].selected)
    }

    /// Update a command's status. Reaching `Success` drops the command out
    /// of the selected set.
    pub fn set_status(&mut self, id: &str, status: Status) {
        let Some(&index) = self.by_id.get(id) else {
            return;
        };
        if !self.nodes[index].is_command() {
            return;
        }
        self.state[index].status = status;
        if status == Status::Success {
            self.state[index].selected = false;
        }
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) {
        if let Some(&index) = self.by_id.get(id) {
            if self.nodes[index].is_command() {
                self.state[index].selected = selected;
            }
        }
    }

    /// Toggle a node: commands flip their own bit, groups use the
    /// tri-state policy of [`CommandTree::toggle_group`].
    pub fn toggle(&mut self, index: NodeId) {
        match &self.nodes[index].kind {
            NodeKind::Command { .. } => {
                self.state[index].selected = !self.state[index].selected;
            }
            NodeKind::Group { .. } => self.toggle_group(index),
        }
    }

    pub fn toggle_by_id(&mut self, id: &str) {
        if let Some(&index) = self.by_id.get(id) {
            self.toggle(index);
        }
    }

    /// Tri-state group toggle: if no descendant command is selected,
    /// select them all; otherwise (fully or partially selected) deselect
    /// them all.
    pub fn toggle_group(&mut self, index: NodeId) {
        let sum = self.group_sum(index);
        let select = sum.selected == 0;
        self.set_descendants_selected(index, select);
    }

    fn set_descendants_selected(&mut self, index: NodeId, selected: bool) {
        match &self.nodes[index].kind {
            NodeKind::Command { .. } => self.state[index].selected = selected,
            NodeKind::Group { children } => {
                for child in children.clone() {
                    self.set_descendants_selected(child, selected);
                }
            }
        }
    }

    pub fn expand(&mut self, index: NodeId) {
        self.state[index].expanded = true;
    }

    pub fn collapse(&mut self, index: NodeId) {
        self.state[index].expanded = false;
    }

    /// Recursive counts over a node's descendant commands.
    pub fn group_sum(&self, index: NodeId) -> CommandSum {
        let mut sum = CommandSum::default();
        self.accumulate(index, &mut sum);
        sum
    }

    fn accumulate(&self, index: NodeId, sum: &mut CommandSum) {
        match &self.nodes[index].kind {
            NodeKind::Command { .. } => {
                let state = self.state[index];
                sum.total += 1;
                if state.selected {
                    sum.selected += 1;
                }
                match state.status {
                    Status::Running => sum.running += 1,
                    Status::Success => sum.success += 1,
                    Status::Failure => sum.failure += 1,
                    Status::Pending => {}
                }
            }
            NodeKind::Group { children } => {
                for &child in children {
                    self.accumulate(child, sum);
                }
            }
        }
    }

    /// Ids of commands that are selected and not currently running, in
    /// tree order.
    pub fn selected_runnable_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(index, node)| {
                node.is_command()
                    && self.state[*index].selected
                    && self.state[*index].status != Status::Running
            })
            .map(|(_, node)| node.id.clone())
            .collect()
    }

    /// Nodes visible in the UI: depth-first below the (hidden) root,
    /// skipping the contents of collapsed groups.
    pub fn visible_rows(&self) -> Vec<(NodeId, usize)> {
        let mut rows = Vec::new();
        if let NodeKind::Group { children } = &self.nodes[self.root].kind {
            for &child in children {
                self.collect_visible(child, 0, &mut rows);
            }
        }
        rows
    }

    fn collect_visible(&self, index: NodeId, depth: usize, rows: &mut Vec<(NodeId, usize)>) {
        rows.push((index, depth));
        if let NodeKind::Group { children } = &self.nodes[index].kind {
            if self.state[index].expanded {
                for &child in children {
                    self.collect_visible(child, depth + 1, rows);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_from(yaml: &str) -> CommandTree {
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.finalize().unwrap();
        CommandTree::from_config(&config)
    }

    const THREE_IN_GROUP: &str = r#"
fnug_version: "0.1.0"
name: root
children:
  - name: lint
    commands:
      - name: a
        id: a
        cmd: "true"
      - name: b
        id: b
        cmd: "true"
      - name: c
        id: c
        cmd: "true"
"#;

    #[test]
    fn builds_arena_from_config() {
        let tree = tree_from(THREE_IN_GROUP);
        assert_eq!(tree.commands().count(), 3);
        let a = tree.node_id("a").unwrap();
        assert!(tree.node(a).is_command());
        assert_eq!(tree.state(a), NodeState::default());
        let group = tree.node(a).parent.unwrap();
        assert_eq!(tree.node(group).name, "lint");
    }

    #[test]
    fn toggle_twice_is_identity() {
        let mut tree = tree_from(THREE_IN_GROUP);
        let a = tree.node_id("a").unwrap();
        let before = tree.state(a);
        tree.toggle(a);
        assert!(tree.state(a).selected);
        tree.toggle(a);
        assert_eq!(tree.state(a), before);
    }

    #[test]
    fn group_toggle_with_partial_selection_deselects_all() {
        let mut tree = tree_from(THREE_IN_GROUP);
        tree.set_selected("b", true);

        let group = tree.node(tree.node_id("a").unwrap()).parent.unwrap();
        tree.toggle_group(group);
        assert!(!tree.is_selected("a"));
        assert!(!tree.is_selected("b"));
        assert!(!tree.is_selected("c"));

        tree.toggle_group(group);
        assert!(tree.is_selected("a"));
        assert!(tree.is_selected("b"));
        assert!(tree.is_selected("c"));
    }

    #[test]
    fn success_clears_selection() {
        let mut tree = tree_from(THREE_IN_GROUP);
        tree.set_selected("a", true);
        tree.set_status("a", Status::Success);
        assert_eq!(tree.status("a"), Some(Status::Success));
        assert!(!tree.is_selected("a"));
    }

    #[test]
    fn failure_and_running_keep_selection() {
        let mut tree = tree_from(THREE_IN_GROUP);
        tree.set_selected("a", true);
        tree.set_status("a", Status::Running);
        assert!(tree.is_selected("a"));
        tree.set_status("a", Status::Failure);
        assert!(tree.is_selected("a"));
    }

    #[test]
    fn group_sum_counts_descendants_recursively() {
        let mut tree = tree_from(
            r#"
fnug_version: "0.1.0"
name: root
children:
  - name: outer
    commands:
      - name: x
        id: x
        cmd: "true"
    children:
      - name: inner
        commands:
          - name: y
            id: y
            cmd: "true"
          - name: z
            id: z
            cmd: "true"
"#,
        );
        tree.set_selected("y", true);
        tree.set_status("x", Status::Running);
        tree.set_status("z", Status::Failure);

        let outer = tree.node(tree.node_id("x").unwrap()).parent.unwrap();
        let sum = tree.group_sum(outer);
        assert_eq!(
            sum,
            CommandSum {
                total: 3,
                selected: 1,
                running: 1,
                success: 0,
                failure: 1,
            }
        );
    }

    #[test]
    fn selected_runnable_excludes_running_commands() {
        let mut tree = tree_from(THREE_IN_GROUP);
        tree.set_selected("a", true);
        tree.set_selected("b", true);
        tree.set_status("b", Status::Running);

        assert_eq!(tree.selected_runnable_ids(), ["a"]);
    }

    #[test]
    fn expand_collapse_only_touches_the_expanded_flag() {
        let mut tree = tree_from(THREE_IN_GROUP);
        tree.set_selected("a", true);
        tree.set_status("b", Status::Failure);

        let group = tree.node(tree.node_id("a").unwrap()).parent.unwrap();
        let before: Vec<NodeState> = (0..5).map(|i| tree.state(i)).collect();

        tree.collapse(group);
        assert!(!tree.state(group).expanded);
        tree.expand(group);

        let after: Vec<NodeState> = (0..5).map(|i| tree.state(i)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn collapsed_groups_hide_their_rows() {
        let mut tree = tree_from(THREE_IN_GROUP);
        assert_eq!(tree.visible_rows().len(), 4);

        let group = tree.node(tree.node_id("a").unwrap()).parent.unwrap();
        tree.collapse(group);
        assert_eq!(tree.visible_rows(), [(group, 0)]);
    }

    #[test]
    fn status_updates_ignore_group_ids() {
        let mut tree = tree_from(THREE_IN_GROUP);
        let group = tree.node(tree.node_id("a").unwrap()).parent.unwrap();
        let group_id = tree.node(group).id.clone();
        tree.set_status(&group_id, Status::Success);
        assert_eq!(tree.state(group).status, Status::Pending);
    }
}
