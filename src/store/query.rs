//! Translation of tag filters into SQL row predicates.

use super::codec::tag_to_sql;
use super::migrate::TableSchema;
use crate::schema::{quote, TagKind};
use crate::tree::{Selector, TagFilter};
use crate::types::TagValue;
use rusqlite::types::Value;

/// `WHERE` clause (with leading space, or empty) and its positional
/// parameters for `filter`.
///
/// `None` means no row can match: a constrained tag that is not a tag column
/// of the table.
pub(crate) fn where_clause(filter: &TagFilter, schema: &TableSchema) -> Option<(String, Vec<Value>)> {
    let mut terms = Vec::new();
    let mut params = Vec::new();

    for (tag, selector) in filter.iter() {
        if selector.is_any() {
            continue;
        }
        let def = schema.tag(tag)?;
        let kind = def.tag_kind()?;
        let column = quote(&def.column);
        let values: &[TagValue] = match selector {
            Selector::Any => continue,
            Selector::Exact(value) => std::slice::from_ref(value),
            Selector::OneOf(values) => values,
        };
        terms.push(term(&column, kind, values, &mut params));
    }

    if terms.is_empty() {
        Some((String::new(), params))
    } else {
        Some((format!(" WHERE {}", terms.join(" AND ")), params))
    }
}

fn term(column: &str, kind: TagKind, values: &[TagValue], params: &mut Vec<Value>) -> String {
    let mut alternatives = Vec::new();
    if values.iter().any(TagValue::is_null) {
        alternatives.push(format!("{} IS NULL", column));
    }

    // SQLite compares across storage classes after affinity conversion
    // (`2 = 2.0`, `'3' = 3`), so values of another kind are dropped here to
    // keep the result identical to the in-memory filter.
    let mut placeholders = Vec::new();
    for value in values.iter().filter(|v| !v.is_null() && kind.accepts(v)) {
        params.push(tag_to_sql(value));
        placeholders.push(format!("?{}", params.len()));
    }
    match placeholders.len() {
        0 => {}
        1 => alternatives.push(format!("{} = {}", column, placeholders[0])),
        _ => alternatives.push(format!("{} IN ({})", column, placeholders.join(", "))),
    }

    match alternatives.len() {
        0 => "0".to_string(),
        1 => alternatives.remove(0),
        _ => format!("({})", alternatives.join(" OR ")),
    }
}
