//! Conversions between tag tree values and SQLite values.

use crate::error::StorageError;
use crate::schema::TagKind;
use crate::types::{MetaValue, TagValue};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value, ValueRef};

pub(crate) fn tag_to_sql(value: &TagValue) -> Value {
    match value {
        TagValue::Null => Value::Null,
        TagValue::Int(i) => Value::Integer(*i),
        TagValue::Float(f) => Value::Real(*f),
        TagValue::Str(s) => Value::Text(s.clone()),
        TagValue::Ordered { rank, label } => Value::Text(format!("{}:{}", rank, label)),
    }
}

pub(crate) fn tag_from_sql(value: ValueRef<'_>, kind: TagKind, column: &str) -> Result<TagValue, StorageError> {
    let corrupt = || StorageError::Corrupt(format!("unexpected value in tag column {}", column));
    Ok(match (kind, value) {
        (_, ValueRef::Null) => TagValue::Null,
        (TagKind::Text, ValueRef::Text(bytes)) => TagValue::Str(utf8(bytes, column)?),
        (TagKind::Text, ValueRef::Integer(i)) => TagValue::Str(i.to_string()),
        (TagKind::Text, ValueRef::Real(f)) => TagValue::Str(f.to_string()),
        (TagKind::Integer, ValueRef::Integer(i)) => TagValue::Int(i),
        (TagKind::Real, ValueRef::Real(f)) => TagValue::Float(f),
        (TagKind::Real, ValueRef::Integer(i)) => TagValue::Float(i as f64),
        (TagKind::Ordinal, ValueRef::Text(bytes)) => {
            let text = utf8(bytes, column)?;
            let (rank, label) = text.split_once(':').ok_or_else(corrupt)?;
            TagValue::Ordered {
                rank: rank.parse().map_err(|_| corrupt())?,
                label: label.to_string(),
            }
        }
        _ => return Err(corrupt()),
    })
}

pub(crate) fn meta_to_sql(value: &MetaValue) -> Value {
    match value {
        MetaValue::Integer(i) => Value::Integer(*i),
        MetaValue::Real(f) => Value::Real(*f),
        MetaValue::Text(s) => Value::Text(s.clone()),
    }
}

/// `None` for SQL NULL: the record simply lacks that attribute.
pub(crate) fn meta_from_sql(value: ValueRef<'_>, column: &str) -> Result<Option<MetaValue>, StorageError> {
    Ok(match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(MetaValue::Integer(i)),
        ValueRef::Real(f) => Some(MetaValue::Real(f)),
        ValueRef::Text(bytes) => Some(MetaValue::Text(utf8(bytes, column)?)),
        ValueRef::Blob(bytes) => Some(MetaValue::Text(String::from_utf8_lossy(bytes).into_owned())),
    })
}

pub(crate) fn timestamp_to_sql(timestamp: &DateTime<Utc>) -> Value {
    Value::Text(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

pub(crate) fn timestamp_from_sql(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp {:?}: {}", text, e)))
}

fn utf8(bytes: &[u8], column: &str) -> Result<String, StorageError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StorageError::Corrupt(format!("non UTF-8 text in column {}", column)))
}
