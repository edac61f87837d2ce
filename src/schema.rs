//! Tag Schema Mapper
//!
//! Deterministic, invertible mapping between tag (or metadata) names and
//! column identifiers of a store table, plus the declared column types that
//! record what role a column plays.
//!
//! Encoded identifiers only use `[a-z0-9_]`, so SQLite's case-insensitive
//! identifier matching can never merge two distinct names. Escapes all start
//! with `_` followed by a marker:
//!
//! | input | encoding |
//! |---|---|
//! | `a-z`, `0-9` | unchanged |
//! | space | `__` |
//! | `A-Z` | `_1` + lowercase letter |
//! | `_` | `_5` |
//! | anything else | `_0` + lowercase hex code point + `_` |
//! | leading digit | prefixed with `_2` |
//! | reserved word | suffixed with `_3` |
//! | empty name | `_4` |
//!
//! Names are encoded code point by code point without any Unicode
//! normalization: canonically equivalent spellings (`"é"` and `"e\u{301}"`)
//! are distinct names and get distinct columns.

use crate::types::TagValue;

/// Table holding the tag → image mapping inside each store file.
pub const TABLE_NAME: &str = "img_info";

pub const PATH_COLUMN: &str = "path";
pub const THUMBNAIL_COLUMN: &str = "thumbnail";
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Fixed columns, in table order.
pub const FIXED_COLUMNS: [&str; 3] = [PATH_COLUMN, THUMBNAIL_COLUMN, TIMESTAMP_COLUMN];

/// Identifiers an encoded name must never equal.
const RESERVED: &[&str] = &[
    "path", "thumbnail", "timestamp", "rowid", "oid", "_rowid_", "abort", "add", "all", "alter",
    "and", "as", "asc", "between", "by", "case", "check", "collate", "column", "commit",
    "constraint", "create", "cross", "default", "delete", "desc", "distinct", "drop", "else",
    "end", "escape", "except", "exists", "from", "full", "glob", "group", "having", "if", "in",
    "index", "inner", "insert", "intersect", "into", "is", "isnull", "join", "key", "left",
    "like", "limit", "match", "natural", "not", "notnull", "null", "of", "offset", "on", "or",
    "order", "outer", "primary", "references", "regexp", "replace", "right", "select", "set",
    "table", "then", "to", "transaction", "union", "unique", "update", "using", "values",
    "when", "where", "with",
];

/// Encode a tag or metadata name as a column identifier.
pub fn column_for(name: &str) -> String {
    if name.is_empty() {
        return "_4".to_string();
    }

    let mut out = String::with_capacity(name.len() + 4);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        out.push_str("_2");
    }
    for c in name.chars() {
        match c {
            'a'..='z' | '0'..='9' => out.push(c),
            'A'..='Z' => {
                out.push_str("_1");
                out.push(c.to_ascii_lowercase());
            }
            ' ' => out.push_str("__"),
            '_' => out.push_str("_5"),
            other => {
                out.push_str("_0");
                out.push_str(&format!("{:x}", other as u32));
                out.push('_');
            }
        }
    }
    if RESERVED.contains(&out.as_str()) {
        out.push_str("_3");
    }
    out
}

/// Decode a column identifier produced by [`column_for`].
///
/// Returns `None` for identifiers that are not valid encodings (including the
/// fixed columns themselves).
pub fn name_for(column: &str) -> Option<String> {
    if column == "_4" {
        return Some(String::new());
    }
    if FIXED_COLUMNS.contains(&column) {
        return None;
    }

    let chars: Vec<char> = column.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    let mut reserved_marker = false;

    if chars.len() >= 2 && chars[0] == '_' && chars[1] == '2' {
        if !chars.get(2).is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        i = 2;
    }

    while i < chars.len() {
        match chars[i] {
            c @ ('a'..='z' | '0'..='9') => {
                out.push(c);
                i += 1;
            }
            '_' => {
                let marker = *chars.get(i + 1)?;
                match marker {
                    '_' => {
                        out.push(' ');
                        i += 2;
                    }
                    '1' => {
                        let letter = *chars.get(i + 2)?;
                        if !letter.is_ascii_lowercase() {
                            return None;
                        }
                        out.push(letter.to_ascii_uppercase());
                        i += 3;
                    }
                    '5' => {
                        out.push('_');
                        i += 2;
                    }
                    '0' => {
                        let start = i + 2;
                        let end = start + chars[start..].iter().position(|c| *c == '_')?;
                        let hex: String = chars[start..end].iter().collect();
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        out.push(char::from_u32(code)?);
                        i = end + 1;
                    }
                    '3' if i + 2 == chars.len() => {
                        reserved_marker = true;
                        i += 2;
                    }
                    _ => return None,
                }
            }
            _ => return None,
        }
    }

    // The reserved suffix only appears on names that encode to a reserved word.
    if reserved_marker != RESERVED.contains(&column.trim_end_matches("_3")) {
        return None;
    }
    Some(out)
}

/// Kind of the values a tag column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Text,
    Integer,
    Real,
    Ordinal,
}

impl TagKind {
    /// Kind a tag column gets when `value` is the first value written to it.
    /// A null first value yields a text column.
    pub fn of(value: &TagValue) -> Self {
        match value {
            TagValue::Null | TagValue::Str(_) => TagKind::Text,
            TagValue::Int(_) => TagKind::Integer,
            TagValue::Float(_) => TagKind::Real,
            TagValue::Ordered { .. } => TagKind::Ordinal,
        }
    }

    /// Whether `value` can be stored in a column of this kind.
    pub fn accepts(self, value: &TagValue) -> bool {
        value.is_null() || TagKind::of(value) == self
    }
}

/// Role of a non-fixed column, encoded in its declared SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Tag(TagKind),
    Meta,
}

impl ColumnRole {
    /// Declared type for this role. Each name is chosen for the SQLite
    /// affinity it implies (TEXT, INTEGER, REAL, TEXT, BLOB).
    pub fn declared_type(self) -> &'static str {
        match self {
            ColumnRole::Tag(TagKind::Text) => "TAG_TEXT",
            ColumnRole::Tag(TagKind::Integer) => "TAG_INT",
            ColumnRole::Tag(TagKind::Real) => "TAG_REAL",
            ColumnRole::Tag(TagKind::Ordinal) => "TAG_ORDINAL_TEXT",
            ColumnRole::Meta => "META_BLOB",
        }
    }

    /// Role for a declared type. Types written by other tools are treated as
    /// display-only metadata.
    pub fn from_declared_type(declared: &str) -> Self {
        match declared.to_ascii_uppercase().as_str() {
            "TAG_TEXT" => ColumnRole::Tag(TagKind::Text),
            "TAG_INT" => ColumnRole::Tag(TagKind::Integer),
            "TAG_REAL" => ColumnRole::Tag(TagKind::Real),
            "TAG_ORDINAL_TEXT" => ColumnRole::Tag(TagKind::Ordinal),
            _ => ColumnRole::Meta,
        }
    }

    pub fn is_tag(self) -> bool {
        matches!(self, ColumnRole::Tag(_))
    }
}

/// Quote an identifier for use in SQL text.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
