//! Deep union of tag trees.

use super::TagTree;
use crate::error::TreeError;
use crate::types::{ImageRecord, TagValue};
use serde::{Deserialize, Serialize};

/// How to resolve two records with the same path but different content in
/// the same leaf. Identical records are always collapsed into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Fail with `DuplicateKeyConflict`.
    Error,
    /// Keep the record from the left-hand tree.
    KeepFirst,
    /// Keep the record from the right-hand tree.
    KeepLast,
    /// Keep both records in the leaf.
    KeepBoth,
}

impl TagTree {
    /// Union of `self` and `other`. Neither input is modified.
    ///
    /// The result is uniform only when both inputs are.
    pub fn merge(&self, other: &TagTree, policy: ConflictPolicy) -> Result<TagTree, TreeError> {
        if self.hierarchy() != other.hierarchy() {
            return Err(TreeError::HierarchyMismatch {
                left: self.hierarchy().to_vec(),
                right: other.hierarchy().to_vec(),
            });
        }

        let mut merged = self.clone();
        merged.uniform = self.is_uniform() && other.is_uniform();

        let mut result = Ok(());
        other.for_each(|tags, record| {
            if result.is_ok() {
                result = merged.merge_record(tags, record, policy);
            }
        });
        result.map(|_| merged)
    }

    fn merge_record(
        &mut self,
        tags: &[TagValue],
        record: &ImageRecord,
        policy: ConflictPolicy,
    ) -> Result<(), TreeError> {
        let leaf = self.leaf_mut(tags)?;
        let Some(index) = leaf.iter().position(|r| r.path == record.path) else {
            leaf.push(record.clone());
            return Ok(());
        };
        if leaf[index] == *record {
            return Ok(());
        }
        match policy {
            ConflictPolicy::Error => Err(TreeError::DuplicateKeyConflict {
                path: record.path.clone(),
            }),
            ConflictPolicy::KeepFirst => Ok(()),
            ConflictPolicy::KeepLast => {
                leaf[index] = record.clone();
                Ok(())
            }
            ConflictPolicy::KeepBoth => {
                leaf.push(record.clone());
                Ok(())
            }
        }
    }
}

/// Fold any number of trees into one, left to right.
///
/// Returns `None` for an empty input.
pub fn merge_trees<'a, I>(trees: I, policy: ConflictPolicy) -> Result<Option<TagTree>, TreeError>
where
    I: IntoIterator<Item = &'a TagTree>,
{
    let mut iter = trees.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut merged = first.clone();
    for tree in iter {
        merged = merged.merge(tree, policy)?;
    }
    Ok(Some(merged))
}
