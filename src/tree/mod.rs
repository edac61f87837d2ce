//! Hierarchical Tag Tree
//!
//! An in-memory tree keyed by tag values in a fixed tag order. Interior nodes
//! map the values of one tag to child nodes; leaves hold image records.
//!
//! Every operation that derives a tree (filter, prune, merge, sort) returns a
//! new tree; inputs are never mutated.

pub mod filter;
pub mod merge;
pub mod sort;

pub use filter::{Selector, TagFilter};
pub use merge::{merge_trees, ConflictPolicy};
pub use sort::{SortMethod, SortSpec};

use crate::error::TreeError;
use crate::types::{ImageRecord, TagValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A node of the tag tree.
#[derive(Debug, Clone)]
pub enum TagNode {
    /// Values of one tag, in iteration order, each with its subtree.
    Interior(Vec<(TagValue, TagNode)>),
    /// Image records stored under the full tag-value path.
    Leaf(Vec<ImageRecord>),
}

impl TagNode {
    pub(crate) fn empty() -> Self {
        TagNode::Interior(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TagNode::Interior(children) => children.is_empty(),
            TagNode::Leaf(records) => records.is_empty(),
        }
    }

    /// Set of depths at which leaves occur below this node.
    ///
    /// A leaf (or an empty interior node) has depth 0.
    pub fn depths(&self) -> BTreeSet<usize> {
        match self {
            TagNode::Leaf(_) => BTreeSet::from([0]),
            TagNode::Interior(children) if children.is_empty() => BTreeSet::from([0]),
            TagNode::Interior(children) => children
                .iter()
                .flat_map(|(_, child)| child.depths().into_iter().map(|d| d + 1))
                .collect(),
        }
    }

    /// Number of image records below this node.
    pub fn record_count(&self) -> usize {
        match self {
            TagNode::Interior(children) => children.iter().map(|(_, c)| c.record_count()).sum(),
            TagNode::Leaf(records) => records.len(),
        }
    }

    /// Child for `value`, if this is an interior node that has one.
    pub fn child(&self, value: &TagValue) -> Option<&TagNode> {
        match self {
            TagNode::Interior(children) => {
                children.iter().find(|(k, _)| k == value).map(|(_, c)| c)
            }
            TagNode::Leaf(_) => None,
        }
    }

    /// Keys of this node in iteration order (empty for leaves).
    pub fn keys(&self) -> Vec<&TagValue> {
        match self {
            TagNode::Interior(children) => children.iter().map(|(k, _)| k).collect(),
            TagNode::Leaf(_) => Vec::new(),
        }
    }

    fn visit<'a, F>(&'a self, path: &mut Vec<TagValue>, f: &mut F)
    where
        F: FnMut(&[TagValue], &'a ImageRecord),
    {
        match self {
            TagNode::Interior(children) => {
                for (key, child) in children {
                    path.push(key.clone());
                    child.visit(path, f);
                    path.pop();
                }
            }
            TagNode::Leaf(records) => {
                for record in records {
                    f(path, record);
                }
            }
        }
    }
}

/// Order-insensitive structural equality: keys compare as maps, leaf records
/// as multisets.
impl PartialEq for TagNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TagNode::Interior(a), TagNode::Interior(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, child)| {
                        b.iter()
                            .find(|(k, _)| k == key)
                            .is_some_and(|(_, other_child)| child == other_child)
                    })
            }
            (TagNode::Leaf(a), TagNode::Leaf(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                let mut used = vec![false; b.len()];
                a.iter().all(|record| {
                    match (0..b.len()).find(|&i| !used[i] && b[i] == *record) {
                        Some(i) => {
                            used[i] = true;
                            true
                        }
                        None => false,
                    }
                })
            }
            _ => false,
        }
    }
}

/// Order in which [`TagTree::keys_at_depth`] reports values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    /// Order of first appearance in a depth-first walk.
    FirstSeen,
    /// Natural [`TagValue`] ordering.
    Sorted,
}

/// One (tag-value tuple, record) pair of a flattened tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatEntry {
    pub tags: Vec<TagValue>,
    pub record: ImageRecord,
}

/// Everything a page generator needs to build cascading selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeExport {
    pub hierarchy: Vec<String>,
    /// Distinct values per depth, first-seen order.
    pub keys: Vec<Vec<TagValue>>,
    pub entries: Vec<FlatEntry>,
}

/// Tag tree over a fixed, ordered tag hierarchy.
#[derive(Debug, Clone)]
pub struct TagTree {
    hierarchy: Vec<String>,
    uniform: bool,
    root: TagNode,
}

impl PartialEq for TagTree {
    fn eq(&self, other: &Self) -> bool {
        self.hierarchy == other.hierarchy
            && self.uniform == other.uniform
            && (self.root == other.root || (self.root.is_empty() && other.root.is_empty()))
    }
}

impl TagTree {
    /// Empty uniform tree: every leaf sits at depth `hierarchy.len()`.
    pub fn new<S: Into<String>>(hierarchy: impl IntoIterator<Item = S>) -> Self {
        Self {
            hierarchy: hierarchy.into_iter().map(Into::into).collect(),
            uniform: true,
            root: TagNode::empty(),
        }
    }

    /// Empty tree that accepts tag paths shorter than the hierarchy.
    pub fn non_uniform<S: Into<String>>(hierarchy: impl IntoIterator<Item = S>) -> Self {
        Self {
            uniform: false,
            ..Self::new(hierarchy)
        }
    }

    /// Empty tree with the same hierarchy and mode as `self`.
    pub(crate) fn empty_like(&self) -> Self {
        Self {
            hierarchy: self.hierarchy.clone(),
            uniform: self.uniform,
            root: TagNode::empty(),
        }
    }

    pub(crate) fn with_root(&self, root: Option<TagNode>) -> Self {
        Self {
            hierarchy: self.hierarchy.clone(),
            uniform: self.uniform,
            root: root.unwrap_or_else(TagNode::empty),
        }
    }

    pub fn hierarchy(&self) -> &[String] {
        &self.hierarchy
    }

    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    pub fn root(&self) -> &TagNode {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Total number of image records.
    pub fn len(&self) -> usize {
        self.root.record_count()
    }

    /// Position of a tag in the hierarchy.
    pub fn depth_of(&self, tag: &str) -> Option<usize> {
        self.hierarchy.iter().position(|t| t == tag)
    }

    /// Add `record` under the tag-value path `tags`.
    ///
    /// The path is the key of a record within its leaf: a record already in
    /// that leaf with the same path is replaced, not duplicated.
    pub fn insert(&mut self, tags: &[TagValue], record: ImageRecord) -> Result<(), TreeError> {
        let leaf = self.leaf_mut(tags)?;
        match leaf.iter_mut().find(|r| r.path == record.path) {
            Some(existing) => *existing = record,
            None => leaf.push(record),
        }
        Ok(())
    }

    /// Leaf for `tags`, creating interior nodes and the leaf as needed.
    pub(crate) fn leaf_mut(&mut self, tags: &[TagValue]) -> Result<&mut Vec<ImageRecord>, TreeError> {
        let expected = self.hierarchy.len();
        if tags.len() > expected || (self.uniform && tags.len() != expected) {
            return Err(TreeError::DepthMismatch {
                expected,
                found: tags.len(),
                context: format!("path {}", describe(tags)),
            });
        }

        if tags.is_empty() && matches!(&self.root, TagNode::Interior(c) if c.is_empty()) {
            self.root = TagNode::Leaf(Vec::new());
        }

        let mut node = &mut self.root;
        for (depth, value) in tags.iter().enumerate() {
            let children = match node {
                TagNode::Interior(children) => children,
                TagNode::Leaf(_) => {
                    return Err(TreeError::DepthMismatch {
                        expected: depth,
                        found: tags.len(),
                        context: format!("existing leaf at {}", describe(&tags[..depth])),
                    })
                }
            };
            let index = match children.iter().position(|(k, _)| k == value) {
                Some(index) => index,
                None => {
                    let child = if depth + 1 == tags.len() {
                        TagNode::Leaf(Vec::new())
                    } else {
                        TagNode::empty()
                    };
                    children.push((value.clone(), child));
                    children.len() - 1
                }
            };
            node = &mut children[index].1;
        }

        match node {
            TagNode::Leaf(records) => Ok(records),
            TagNode::Interior(_) => Err(TreeError::DepthMismatch {
                expected: tags.len() + 1,
                found: tags.len(),
                context: format!("existing branch at {}", describe(tags)),
            }),
        }
    }

    /// Records stored under exactly `tags`.
    pub fn get(&self, tags: &[TagValue]) -> Option<&[ImageRecord]> {
        let mut node = &self.root;
        for value in tags {
            node = node.child(value)?;
        }
        match node {
            TagNode::Leaf(records) => Some(records),
            TagNode::Interior(_) => None,
        }
    }

    /// Set of depths at which leaves occur.
    pub fn depths(&self) -> BTreeSet<usize> {
        self.root.depths()
    }

    /// Check the uniform-mode invariant: all leaves at the hierarchy depth.
    pub fn validate(&self) -> Result<(), TreeError> {
        if !self.uniform || self.is_empty() {
            return Ok(());
        }
        let depths = self.depths();
        let expected = self.hierarchy.len();
        match depths.iter().find(|d| **d != expected) {
            Some(found) => Err(TreeError::DepthMismatch {
                expected,
                found: *found,
                context: "tree validation".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Distinct values observed at depth `n` across the whole tree.
    pub fn keys_at_depth(&self, n: usize, order: KeyOrder) -> Vec<TagValue> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        collect_keys(&self.root, 0, n, &mut seen, &mut keys);
        if order == KeyOrder::Sorted {
            keys.sort();
        }
        keys
    }

    /// Distinct values for the named tag.
    pub fn keys_for(&self, tag: &str, order: KeyOrder) -> Option<Vec<TagValue>> {
        self.depth_of(tag).map(|depth| self.keys_at_depth(depth, order))
    }

    /// Call `f` for every (tag path, record) pair in iteration order.
    pub fn for_each<'a, F>(&'a self, mut f: F)
    where
        F: FnMut(&[TagValue], &'a ImageRecord),
    {
        let mut path = Vec::with_capacity(self.hierarchy.len());
        self.root.visit(&mut path, &mut f);
    }

    /// Flat sequence of (tag-value tuple, record) pairs.
    pub fn flatten(&self) -> Vec<FlatEntry> {
        let mut entries = Vec::with_capacity(self.len());
        self.for_each(|tags, record| {
            entries.push(FlatEntry {
                tags: tags.to_vec(),
                record: record.clone(),
            })
        });
        entries
    }

    /// Rebuild a tree from flattened entries, inserting them in order.
    pub fn unflatten<S, I>(hierarchy: impl IntoIterator<Item = S>, entries: I, uniform: bool) -> Result<Self, TreeError>
    where
        S: Into<String>,
        I: IntoIterator<Item = FlatEntry>,
    {
        let mut tree = if uniform {
            Self::new(hierarchy)
        } else {
            Self::non_uniform(hierarchy)
        };
        for entry in entries {
            tree.insert(&entry.tags, entry.record)?;
        }
        Ok(tree)
    }

    /// Flattened entries plus per-depth key listings.
    pub fn export(&self) -> TreeExport {
        TreeExport {
            hierarchy: self.hierarchy.clone(),
            keys: (0..self.hierarchy.len())
                .map(|depth| self.keys_at_depth(depth, KeyOrder::FirstSeen))
                .collect(),
            entries: self.flatten(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.export())
    }
}

fn collect_keys(
    node: &TagNode,
    depth: usize,
    target: usize,
    seen: &mut HashSet<TagValue>,
    keys: &mut Vec<TagValue>,
) {
    if let TagNode::Interior(children) = node {
        for (key, child) in children {
            if depth == target {
                if seen.insert(key.clone()) {
                    keys.push(key.clone());
                }
            } else {
                collect_keys(child, depth + 1, target, seen, keys);
            }
        }
    }
}

pub(crate) fn describe(tags: &[TagValue]) -> String {
    let parts: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
