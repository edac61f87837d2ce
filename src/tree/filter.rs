//! Tag filters and pruning.
//!
//! Both produce a new tree and drop every branch left without records.

use super::{TagNode, TagTree};
use crate::types::{ImageRecord, TagValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Acceptable values for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Match any value at that depth.
    Any,
    Exact(TagValue),
    OneOf(Vec<TagValue>),
}

impl Selector {
    pub fn matches(&self, value: &TagValue) -> bool {
        match self {
            Selector::Any => true,
            Selector::Exact(expected) => expected == value,
            Selector::OneOf(values) => values.contains(value),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Selector::Any)
    }
}

/// Mapping from tag name to selector. Tags without an entry match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagFilter {
    selectors: BTreeMap<String, Selector>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: impl Into<String>, selector: Selector) -> Self {
        self.selectors.insert(tag.into(), selector);
        self
    }

    pub fn exact(self, tag: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.with(tag, Selector::Exact(value.into()))
    }

    pub fn one_of<V: Into<TagValue>>(self, tag: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.with(tag, Selector::OneOf(values.into_iter().map(Into::into).collect()))
    }

    pub fn selector(&self, tag: &str) -> &Selector {
        self.selectors.get(tag).unwrap_or(&Selector::Any)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Selector)> {
        self.selectors.iter()
    }

    /// True when no selector constrains anything.
    pub fn is_unconstrained(&self) -> bool {
        self.selectors.values().all(Selector::is_any)
    }

    /// Constrained tags that are not part of `hierarchy`.
    pub fn unknown_tags<'a>(&'a self, hierarchy: &'a [String]) -> impl Iterator<Item = &'a String> + 'a {
        self.selectors
            .iter()
            .filter(move |(tag, selector)| !selector.is_any() && !hierarchy.contains(tag))
            .map(|(tag, _)| tag)
    }
}

impl TagTree {
    /// Keep only branches whose tag values satisfy `filter`.
    ///
    /// A constrained tag that is not in the hierarchy matches nothing. Leaves
    /// above the hierarchy depth (non-uniform trees) are treated as having
    /// `Null` for the missing tags.
    pub fn filter(&self, filter: &TagFilter) -> TagTree {
        if filter.unknown_tags(self.hierarchy()).next().is_some() {
            return self.empty_like();
        }
        let selectors: Vec<&Selector> = self
            .hierarchy()
            .iter()
            .map(|tag| filter.selector(tag))
            .collect();
        self.with_root(filter_node(self.root(), &selectors))
    }

    /// Keep only branches where `keep(depth, value)` holds at every depth.
    pub fn filter_by<F>(&self, keep: F) -> TagTree
    where
        F: Fn(usize, &TagValue) -> bool,
    {
        self.with_root(filter_node_by(self.root(), 0, &keep))
    }

    /// Remove every record for which `remove(tags, record)` is true.
    pub fn prune<F>(&self, mut remove: F) -> TagTree
    where
        F: FnMut(&[TagValue], &ImageRecord) -> bool,
    {
        let mut path = Vec::new();
        self.with_root(prune_node(self.root(), &mut path, &mut remove))
    }

    /// Remove records whose image file no longer exists under `base_dir`.
    pub fn prune_missing(&self, base_dir: &Path) -> TagTree {
        self.prune(|_, record| !base_dir.join(&record.path).exists())
    }
}

fn filter_node(node: &TagNode, selectors: &[&Selector]) -> Option<TagNode> {
    match node {
        TagNode::Leaf(records) => {
            let rest_match = selectors.iter().all(|s| s.matches(&TagValue::Null));
            (rest_match && !records.is_empty()).then(|| node.clone())
        }
        TagNode::Interior(children) => {
            let (selector, rest) = selectors.split_first()?;
            let kept: Vec<(TagValue, TagNode)> = children
                .iter()
                .filter(|(key, _)| selector.matches(key))
                .filter_map(|(key, child)| filter_node(child, rest).map(|c| (key.clone(), c)))
                .collect();
            (!kept.is_empty()).then_some(TagNode::Interior(kept))
        }
    }
}

fn filter_node_by<F>(node: &TagNode, depth: usize, keep: &F) -> Option<TagNode>
where
    F: Fn(usize, &TagValue) -> bool,
{
    match node {
        TagNode::Leaf(records) => (!records.is_empty()).then(|| node.clone()),
        TagNode::Interior(children) => {
            let kept: Vec<(TagValue, TagNode)> = children
                .iter()
                .filter(|(key, _)| keep(depth, key))
                .filter_map(|(key, child)| {
                    filter_node_by(child, depth + 1, keep).map(|c| (key.clone(), c))
                })
                .collect();
            (!kept.is_empty()).then_some(TagNode::Interior(kept))
        }
    }
}

fn prune_node<F>(node: &TagNode, path: &mut Vec<TagValue>, remove: &mut F) -> Option<TagNode>
where
    F: FnMut(&[TagValue], &ImageRecord) -> bool,
{
    match node {
        TagNode::Leaf(records) => {
            let kept: Vec<ImageRecord> = records
                .iter()
                .filter(|record| !remove(path.as_slice(), record))
                .cloned()
                .collect();
            (!kept.is_empty()).then_some(TagNode::Leaf(kept))
        }
        TagNode::Interior(children) => {
            let mut kept = Vec::with_capacity(children.len());
            for (key, child) in children {
                path.push(key.clone());
                if let Some(child) = prune_node(child, path, remove) {
                    kept.push((key.clone(), child));
                }
                path.pop();
            }
            (!kept.is_empty()).then_some(TagNode::Interior(kept))
        }
    }
}
