//! Table schema of a store file and the rebuild-and-swap migration.
//!
//! Column order is meaningful: tag columns come first, in hierarchy order,
//! followed by metadata columns. A migration always rebuilds the whole table
//! under a temporary name and only replaces the live table once every row has
//! been copied and counted.

use crate::error::StorageError;
use crate::schema::{
    column_for, name_for, quote, ColumnRole, TagKind, FIXED_COLUMNS, PATH_COLUMN, TABLE_NAME,
    THUMBNAIL_COLUMN, TIMESTAMP_COLUMN,
};
use rusqlite::{Connection, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// One non-fixed column of the store table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Tag or metadata name.
    pub name: String,
    /// Column identifier in the table.
    pub column: String,
    pub role: ColumnRole,
}

impl ColumnDef {
    fn new(name: &str, role: ColumnRole) -> Self {
        Self {
            name: name.to_string(),
            column: column_for(name),
            role,
        }
    }

    /// Kind of a tag column, `None` for metadata.
    pub fn tag_kind(&self) -> Option<TagKind> {
        match self.role {
            ColumnRole::Tag(kind) => Some(kind),
            ColumnRole::Meta => None,
        }
    }
}

/// Non-fixed columns of the store table, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Read the current schema with `PRAGMA table_info`.
    pub(crate) fn load(conn: &Connection) -> Result<Self, StorageError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(TABLE_NAME)))?;
        let mut rows = stmt.query([])?;
        let mut fixed = BTreeSet::new();
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            let column: String = row.get(1)?;
            let declared: String = row.get(2)?;
            if FIXED_COLUMNS.contains(&column.as_str()) {
                fixed.insert(column);
                continue;
            }
            let role = ColumnRole::from_declared_type(&declared);
            let name = match (name_for(&column), role) {
                (Some(name), _) => name,
                (None, ColumnRole::Meta) => column.clone(),
                (None, ColumnRole::Tag(_)) => {
                    return Err(StorageError::Corrupt(format!(
                        "tag column {} is not a valid encoded name",
                        column
                    )))
                }
            };
            columns.push(ColumnDef { name, column, role });
        }
        if fixed.len() != FIXED_COLUMNS.len() {
            return Err(StorageError::Corrupt(format!(
                "table {} lacks the fixed columns {:?}",
                TABLE_NAME, FIXED_COLUMNS
            )));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Tag column for `name`; metadata columns of that name do not count.
    pub fn tag(&self, name: &str) -> Option<&ColumnDef> {
        self.get(name).filter(|c| c.role.is_tag())
    }

    /// Tag names in column order.
    pub fn hierarchy(&self) -> Vec<String> {
        self.tag_columns().map(|c| c.name.clone()).collect()
    }

    pub fn tag_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.role.is_tag())
    }

    pub fn meta_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.role.is_tag())
    }

    /// Schema needed to store rows for `hierarchy` with metadata names
    /// `metas`, or `None` when the current schema already covers them.
    ///
    /// `kinds` gives the kind of each tag column that may have to be created.
    pub(crate) fn plan(
        &self,
        hierarchy: &[String],
        kinds: &BTreeMap<String, TagKind>,
        metas: &BTreeSet<String>,
    ) -> Result<Option<TableSchema>, StorageError> {
        let existing = self.hierarchy();

        let mut last = None;
        for tag in hierarchy {
            if let Some(column) = self.get(tag) {
                if !column.role.is_tag() {
                    return Err(StorageError::SchemaConflict(format!(
                        "{} is stored as metadata, cannot be used as a tag",
                        tag
                    )));
                }
            }
            if let Some(position) = existing.iter().position(|t| t == tag) {
                if last.is_some_and(|l| position < l) {
                    return Err(StorageError::SchemaConflict(format!(
                        "tag order {:?} disagrees with stored order {:?}",
                        hierarchy, existing
                    )));
                }
                last = Some(position);
            }
        }
        for name in metas {
            if hierarchy.contains(name) || self.tag(name).is_some() {
                return Err(StorageError::SchemaConflict(format!(
                    "{} is used both as a tag and as metadata",
                    name
                )));
            }
        }

        let mut tags: Vec<ColumnDef> = self.tag_columns().cloned().collect();
        let mut added = false;
        for (i, tag) in hierarchy.iter().enumerate() {
            if tags.iter().any(|c| &c.name == tag) {
                continue;
            }
            let kind = kinds.get(tag).copied().unwrap_or(TagKind::Text);
            let column = ColumnDef::new(tag, ColumnRole::Tag(kind));
            let next_shared = hierarchy[i + 1..]
                .iter()
                .find_map(|t| tags.iter().position(|c| &c.name == t));
            match next_shared {
                Some(position) => tags.insert(position, column),
                None => tags.push(column),
            }
            added = true;
        }

        let mut meta: Vec<ColumnDef> = self.meta_columns().cloned().collect();
        for name in metas {
            if self.get(name).is_none() {
                meta.push(ColumnDef::new(name, ColumnRole::Meta));
                added = true;
            }
        }

        if !added {
            return Ok(None);
        }
        tags.extend(meta);
        Ok(Some(TableSchema { columns: tags }))
    }

    /// Columns of `self` not present in `base`.
    pub fn added_since<'a>(&'a self, base: &'a TableSchema) -> impl Iterator<Item = &'a ColumnDef> + 'a {
        self.columns
            .iter()
            .filter(move |c| base.get(&c.name).is_none())
    }
}

fn create_sql(table: &str, schema: &TableSchema) -> String {
    let mut sql = format!(
        "CREATE TABLE {} ({} TEXT PRIMARY KEY NOT NULL, {} TEXT, {} TEXT NOT NULL",
        quote(table),
        PATH_COLUMN,
        THUMBNAIL_COLUMN,
        TIMESTAMP_COLUMN
    );
    for column in &schema.columns {
        sql.push_str(&format!(", {} {}", quote(&column.column), column.role.declared_type()));
    }
    sql.push(')');
    sql
}

/// Create the table with only the fixed columns if it does not exist yet.
pub(crate) fn ensure_table(conn: &Connection) -> Result<(), StorageError> {
    let sql = create_sql(TABLE_NAME, &TableSchema::default()).replacen(
        "CREATE TABLE",
        "CREATE TABLE IF NOT EXISTS",
        1,
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Rebuild the table with schema `new`, copying every row of `old`.
///
/// Runs inside the caller's transaction; nothing is visible to other handles
/// until it commits, and a failure leaves the live table as it was.
pub(crate) fn migrate(
    tx: &Transaction<'_>,
    old: &TableSchema,
    new: &TableSchema,
    path: &Path,
) -> Result<(), StorageError> {
    let temp = format!("{}_migrate", TABLE_NAME);
    let added: Vec<&str> = new.added_since(old).map(|c| c.name.as_str()).collect();

    let result = (|| -> Result<usize, StorageError> {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&temp)))?;
        tx.execute_batch(&create_sql(&temp, new))?;

        let copied: Vec<String> = FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(old.columns.iter().map(|c| quote(&c.column)))
            .collect();
        let copied = copied.join(", ");
        tx.execute(
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} ORDER BY rowid",
                quote(&temp),
                copied,
                copied,
                quote(TABLE_NAME)
            ),
            [],
        )?;

        let count = |table: &str| -> Result<usize, StorageError> {
            let n: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };
        let before = count(TABLE_NAME)?;
        let after = count(&temp)?;
        if before != after {
            return Err(StorageError::Corrupt(format!(
                "copied {} of {} rows",
                after, before
            )));
        }

        tx.execute_batch(&format!("DROP TABLE {}", quote(TABLE_NAME)))?;
        tx.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&temp),
            quote(TABLE_NAME)
        ))?;
        Ok(before)
    })();

    match result {
        Ok(rows) if rows > 0 => {
            warn!(path = %path.display(), rows, added = ?added, "Recreating table with new tags");
            Ok(())
        }
        Ok(_) => {
            debug!(path = %path.display(), added = ?added, "Added columns to empty table");
            Ok(())
        }
        Err(err) if err.is_transient() => Err(err),
        Err(err) => Err(StorageError::MigrationFailure {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}
