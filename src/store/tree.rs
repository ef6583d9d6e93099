//! Hierarchical view of the entry table.
//!
//! Each node is one path segment. A node carries a copy of the live entry
//! published at exactly its path, or nothing if it only exists because a
//! deeper path runs through it (a placeholder, reported as
//! [`EntryType::Unknown`]).

use std::collections::BTreeMap;

use serde::Serialize;

use super::entry::Entry;
use crate::protocol::EntryType;

/// Split an entry name into non-empty path segments.
pub(crate) fn segments(name: &str) -> impl Iterator<Item = &str> {
    name.split('/').filter(|segment| !segment.is_empty())
}

/// One node of the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeNode {
    segment: String,
    entry: Option<Entry>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Self::default()
        }
    }

    /// Path segment of this node (empty for the root).
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Entry published at this path, if any.
    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    /// Type of the entry at this path; `Unknown` for placeholders.
    pub fn entry_type(&self) -> EntryType {
        self.entry
            .as_ref()
            .map_or(EntryType::Unknown, Entry::entry_type)
    }

    /// Whether this node is only an intermediate segment.
    pub fn is_placeholder(&self) -> bool {
        self.entry.is_none()
    }

    /// Whether this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Child for `segment`.
    pub fn child(&self, segment: &str) -> Option<&TreeNode> {
        self.children.get(segment)
    }

    /// Children ordered by segment.
    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.values()
    }

    fn count_entries(&self) -> usize {
        usize::from(self.entry.is_some())
            + self.children.values().map(TreeNode::count_entries).sum::<usize>()
    }
}

/// Path tree rebuilt from the entry table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EntryTree {
    root: TreeNode,
}

impl EntryTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `entries`, inserted in name order so the result
    /// does not depend on iteration order.
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut sorted: Vec<&Entry> = entries.into_iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let mut tree = Self::new();
        for entry in sorted {
            tree.insert(entry);
        }
        tree
    }

    /// Insert `entry` along its path, creating placeholders as needed.
    ///
    /// Names with no segments have no node and are skipped.
    pub fn insert(&mut self, entry: &Entry) {
        let mut node = &mut self.root;
        let mut any = false;
        for segment in segments(entry.name()) {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TreeNode::new(segment));
            any = true;
        }
        if any {
            node.entry = Some(entry.clone());
        }
    }

    /// Replace the entry copy at `entry`'s path if a node is already there.
    ///
    /// Returns false when no such node exists.
    pub fn refresh(&mut self, entry: &Entry) -> bool {
        let mut node = &mut self.root;
        for segment in segments(entry.name()) {
            match node.children.get_mut(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        match node.entry.as_mut() {
            Some(slot) if slot.key() == entry.key() => {
                *slot = entry.clone();
                true
            }
            _ => false,
        }
    }

    /// Root node (segment is empty).
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Node at `path`, e.g. `"a/b"` or `"/a/b"`.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let mut node = &self.root;
        for segment in segments(path) {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Whether the tree has no nodes besides the root.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Number of nodes carrying a live entry.
    pub fn entry_count(&self) -> usize {
        self.root.count_entries()
    }
}
