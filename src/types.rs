//! Core types for the plot tagging system.
//!
//! Tag values are a closed variant so that equality, hashing and ordering are
//! well defined no matter what mix of strings and numbers a producer uses to
//! label its plots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single value of one tag (one level of the hierarchy).
///
/// Natural ordering: `Null` < numbers (`Int`/`Float`, compared numerically)
/// < `Str` < `Ordered` (by rank, then label). An `Int` and a `Float` with the
/// same numeric value are distinct keys; the `Int` sorts first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValue {
    /// Default for a tag the record was never given (e.g. after a merge
    /// widened the hierarchy).
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    /// Member of an ordered enumeration: `rank` fixes its position.
    Ordered { rank: i64, label: String },
}

impl TagValue {
    /// Build an ordered-enum value.
    pub fn ordered(rank: i64, label: impl Into<String>) -> Self {
        TagValue::Ordered {
            rank,
            label: label.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TagValue::Null)
    }

    /// Numeric coercion used by numeric sorting.
    ///
    /// Strings are parsed; ordered-enum values coerce to their rank.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Null => None,
            TagValue::Int(i) => Some(*i as f64),
            TagValue::Float(f) => Some(*f),
            TagValue::Str(s) => s.trim().parse::<f64>().ok(),
            TagValue::Ordered { rank, .. } => Some(*rank as f64),
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            TagValue::Null => 0,
            TagValue::Int(_) | TagValue::Float(_) => 1,
            TagValue::Str(_) => 2,
            TagValue::Ordered { .. } => 3,
        }
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TagValue {}

impl PartialOrd for TagValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use TagValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Str(a), Str(b)) => a.cmp(b),
            (
                Ordered {
                    rank: ra,
                    label: la,
                },
                Ordered {
                    rank: rb,
                    label: lb,
                },
            ) => ra.cmp(rb).then_with(|| la.cmp(lb)),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl Hash for TagValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            TagValue::Null => {}
            TagValue::Int(i) => i.hash(state),
            TagValue::Float(f) => f.to_bits().hash(state),
            TagValue::Str(s) => s.hash(state),
            TagValue::Ordered { rank, label } => {
                rank.hash(state);
                label.hash(state);
            }
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Null => write!(f, "None"),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Str(s) => write!(f, "{}", s),
            TagValue::Ordered { label, .. } => write!(f, "{}", label),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::Int(value as i64)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

/// Display-only metadata value carried by an image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Integer(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Real(value)
    }
}

/// One rendered image and its display attributes.
///
/// `path` is the unique key of the record within a leaf (and within a store
/// file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetaValue>,
}

impl ImageRecord {
    /// Record for `path`, stamped with the current time.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_timestamp(path, Utc::now())
    }

    pub fn with_timestamp(path: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            thumbnail: None,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
