//! Key ordering at each depth of a tag tree.

use super::{TagNode, TagTree};
use crate::types::TagValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// How the keys of one depth are ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMethod {
    /// [`TagValue`]'s own total order.
    Natural,
    /// Compare display strings.
    Lexicographic,
    /// Compare numerically; values that do not coerce to a number sort after
    /// those that do, by display string.
    Numeric,
    /// Listed values first, in list order; the rest keep their current order.
    Priority(Vec<TagValue>),
}

impl SortMethod {
    pub fn compare(&self, a: &TagValue, b: &TagValue) -> Ordering {
        match self {
            SortMethod::Natural => a.cmp(b),
            SortMethod::Lexicographic => a.to_string().cmp(&b.to_string()).then_with(|| a.cmp(b)),
            SortMethod::Numeric => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.to_string().cmp(&b.to_string()).then_with(|| a.cmp(b)),
            },
            SortMethod::Priority(list) => {
                let rank = |v: &TagValue| list.iter().position(|p| p == v);
                match (rank(a), rank(b)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        }
    }

    /// [`compare`](Self::compare) in the requested direction.
    ///
    /// Reversing a priority list only reverses the listed values; unlisted
    /// values still come last, in their current order.
    pub fn compare_directed(&self, a: &TagValue, b: &TagValue, reverse: bool) -> Ordering {
        match self {
            SortMethod::Priority(list) if reverse => {
                let rank = |v: &TagValue| list.iter().position(|p| p == v);
                match (rank(a), rank(b)) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
            _ if reverse => self.compare(b, a),
            _ => self.compare(a, b),
        }
    }
}

/// Sort configuration for a whole tree.
///
/// Lookup order for a depth: method named for its tag, then method set for
/// the depth index, then the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub default: SortMethod,
    /// Descending order. Unlisted values of a priority list stay last.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub per_depth: BTreeMap<usize, SortMethod>,
    #[serde(default)]
    pub per_tag: BTreeMap<String, SortMethod>,
}

impl SortSpec {
    pub fn new(default: SortMethod) -> Self {
        Self {
            default,
            reverse: false,
            per_depth: BTreeMap::new(),
            per_tag: BTreeMap::new(),
        }
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn at_depth(mut self, depth: usize, method: SortMethod) -> Self {
        self.per_depth.insert(depth, method);
        self
    }

    pub fn for_tag(mut self, tag: impl Into<String>, method: SortMethod) -> Self {
        self.per_tag.insert(tag.into(), method);
        self
    }

    fn method_for(&self, depth: usize, tag: Option<&String>) -> &SortMethod {
        tag.and_then(|t| self.per_tag.get(t))
            .or_else(|| self.per_depth.get(&depth))
            .unwrap_or(&self.default)
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortMethod::Natural)
    }
}

impl TagTree {
    /// Copy of the tree with keys reordered at every depth. Content is
    /// unchanged and the sort is stable, so re-applying it is a no-op.
    pub fn sorted(&self, spec: &SortSpec) -> TagTree {
        let mut root = self.root().clone();
        sort_node(&mut root, 0, self.hierarchy(), spec);
        self.with_root(Some(root))
    }
}

fn sort_node(node: &mut TagNode, depth: usize, hierarchy: &[String], spec: &SortSpec) {
    if let TagNode::Interior(children) = node {
        let method = spec.method_for(depth, hierarchy.get(depth));
        children.sort_by(|(a, _), (b, _)| method.compare_directed(a, b, spec.reverse));
        for (_, child) in children.iter_mut() {
            sort_node(child, depth + 1, hierarchy, spec);
        }
    }
}
