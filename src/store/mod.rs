//! Store File
//!
//! Persistent counterpart of a tag tree: one SQLite file holding a single
//! table with the fixed columns `path`, `thumbnail` and `timestamp`, one
//! column per tag and one per metadata name ever written.
//!
//! A [`StoreFile`] is an explicit handle. Every mutating operation runs in an
//! `IMMEDIATE` transaction, so schema migrations and row writes from other
//! handles on the same file are serialized by SQLite's file lock. Lock
//! contention is absorbed by the handle's [`RetryPolicy`].

pub mod codec;
pub mod migrate;
pub mod query;

pub use migrate::{ColumnDef, TableSchema};

use crate::concurrency::RetryPolicy;
use crate::error::{StorageError, TreeError};
use crate::schema::{quote, ColumnRole, TagKind, FIXED_COLUMNS, PATH_COLUMN, TABLE_NAME};
use crate::tree::{FlatEntry, TagFilter, TagTree};
use crate::types::{ImageRecord, TagValue};
use codec::{meta_from_sql, meta_to_sql, tag_from_sql, tag_to_sql, timestamp_from_sql, timestamp_to_sql};
use parking_lot::Mutex;
use rusqlite::backup::Progress;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, DatabaseName, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a write does when the table needs columns it does not have yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Migrate the table to the union of old and new columns.
    #[default]
    Evolve,
    /// Fail with `SchemaConflict`.
    Strict,
}

/// What a write does when a row with the same path but different content is
/// already stored. Rewriting an identical row is always a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Fail with `DuplicateKeyConflict`; nothing of the batch is written.
    Error,
    /// Leave the stored row alone.
    KeepExisting,
    /// Overwrite the stored row.
    #[default]
    Replace,
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Create the file (and parent directories) if missing.
    pub create: bool,
    pub retry: RetryPolicy,
    pub schema_mode: SchemaMode,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: true,
            retry: RetryPolicy::default(),
            schema_mode: SchemaMode::Evolve,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read only these tags, in this order, as the tree hierarchy. Fails with
    /// `MissingTags` if the store lacks any of them.
    pub required_tags: Option<Vec<String>>,
    /// Load only this many randomly chosen rows.
    pub sample: Option<usize>,
}

impl ReadOptions {
    pub fn required_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.required_tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn sample(mut self, n: usize) -> Self {
        self.sample = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Paths removed per transaction.
    pub chunk_size: usize,
    /// Run `VACUUM` afterwards to return the freed pages to the filesystem.
    pub vacuum: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            vacuum: false,
        }
    }
}

/// Row counts of one write call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub kept_existing: usize,
    pub columns_added: usize,
}

impl WriteReport {
    /// Rows whose stored content changed.
    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn absorb(&mut self, other: WriteReport) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.unchanged += other.unchanged;
        self.kept_existing += other.kept_existing;
        self.columns_added += other.columns_added;
    }
}

/// Columns a batch write must create even when no entry carries a value
/// for them, and the kinds of such tag columns.
#[derive(Debug, Clone, Default)]
pub(crate) struct ColumnHints {
    pub kinds: BTreeMap<String, TagKind>,
    pub metas: BTreeSet<String>,
}

impl ColumnHints {
    /// Hints reproducing every column of `schema`.
    pub(crate) fn from_schema(schema: &TableSchema) -> Self {
        Self {
            kinds: schema
                .tag_columns()
                .filter_map(|c| Some((c.name.clone(), c.tag_kind()?)))
                .collect(),
            metas: schema.meta_columns().map(|c| c.name.clone()).collect(),
        }
    }
}

/// Open handle on one store file.
pub struct StoreFile {
    conn: Mutex<Connection>,
    path: PathBuf,
    retry: RetryPolicy,
    schema_mode: SchemaMode,
}

impl std::fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFile")
            .field("path", &self.path)
            .field("schema_mode", &self.schema_mode)
            .finish()
    }
}

impl StoreFile {
    /// Open the store file at `path`, creating it if allowed.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if !options.create {
                return Err(StorageError::NotFound(path));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = if options.create {
            OpenFlags::default()
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = options.retry.run(&path, "open", || {
            let conn = Connection::open_with_flags(&path, flags)?;
            conn.busy_timeout(options.retry.busy_timeout)?;
            migrate::ensure_table(&conn)?;
            Ok(conn)
        })?;
        debug!(path = %path.display(), "Opened store file");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            retry: options.retry,
            schema_mode: options.schema_mode,
        })
    }

    /// Load the store file at `path` into a private in-memory database.
    ///
    /// Later writes through the handle never reach the file.
    pub fn open_in_memory_copy(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        let conn = options.retry.run(&path, "copy", || {
            let mut conn = Connection::open_in_memory()?;
            conn.busy_timeout(options.retry.busy_timeout)?;
            conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;
            migrate::ensure_table(&conn)?;
            Ok(conn)
        })?;
        debug!(path = %path.display(), "Loaded store file into memory");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            retry: options.retry,
            schema_mode: options.schema_mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema_mode
    }

    pub fn set_schema_mode(&mut self, mode: SchemaMode) {
        self.schema_mode = mode;
    }

    /// Current table schema.
    pub fn schema(&self) -> Result<TableSchema, StorageError> {
        self.retry
            .run(&self.path, "schema", || TableSchema::load(&self.conn.lock()))
    }

    /// Tag hierarchy recorded by the order of tag columns.
    pub fn hierarchy(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.schema()?.hierarchy())
    }

    /// Number of rows.
    pub fn count(&self) -> Result<usize, StorageError> {
        self.retry.run(&self.path, "count", || {
            let conn = self.conn.lock();
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(TABLE_NAME)), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        })
    }

    /// Upsert one record under `tags`, named by `hierarchy`.
    ///
    /// `tags` may be shorter than `hierarchy`; the missing tags are stored as
    /// null.
    pub fn write<S: AsRef<str>>(
        &self,
        hierarchy: &[S],
        tags: &[TagValue],
        record: &ImageRecord,
    ) -> Result<WriteReport, StorageError> {
        self.write_with_policy(hierarchy, tags, record, WritePolicy::Replace)
    }

    pub fn write_with_policy<S: AsRef<str>>(
        &self,
        hierarchy: &[S],
        tags: &[TagValue],
        record: &ImageRecord,
        policy: WritePolicy,
    ) -> Result<WriteReport, StorageError> {
        let hierarchy: Vec<String> = hierarchy.iter().map(|s| s.as_ref().to_string()).collect();
        let entry = FlatEntry {
            tags: tags.to_vec(),
            record: record.clone(),
        };
        self.write_entries(&hierarchy, std::slice::from_ref(&entry), policy)
    }

    /// Write every record of `tree` in one transaction.
    pub fn write_tree(&self, tree: &TagTree, policy: WritePolicy) -> Result<WriteReport, StorageError> {
        tree.validate()?;
        self.write_entries(tree.hierarchy(), &tree.flatten(), policy)
    }

    /// Write flattened entries in one transaction.
    pub fn write_entries(
        &self,
        hierarchy: &[String],
        entries: &[FlatEntry],
        policy: WritePolicy,
    ) -> Result<WriteReport, StorageError> {
        self.write_batch(hierarchy, entries, policy, &ColumnHints::default())
    }

    pub(crate) fn write_batch(
        &self,
        hierarchy: &[String],
        entries: &[FlatEntry],
        policy: WritePolicy,
        hints: &ColumnHints,
    ) -> Result<WriteReport, StorageError> {
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = hierarchy.iter().find(|tag| !seen.insert(tag.as_str())) {
            return Err(StorageError::InvalidArgument(format!(
                "tag {} appears twice in hierarchy {:?}",
                duplicate, hierarchy
            )));
        }

        let mut kinds = hints.kinds.clone();
        let mut metas = hints.metas.clone();
        for entry in entries {
            if entry.tags.len() > hierarchy.len() {
                return Err(TreeError::DepthMismatch {
                    expected: hierarchy.len(),
                    found: entry.tags.len(),
                    context: format!("record {}", entry.record.path),
                }
                .into());
            }
            if let Some((tag, _)) = hierarchy
                .iter()
                .zip(&entry.tags)
                .find(|(_, v)| matches!(v, TagValue::Float(f) if f.is_nan()))
            {
                return Err(StorageError::InvalidArgument(format!(
                    "tag {} of record {} is NaN, which SQLite cannot store",
                    tag, entry.record.path
                )));
            }
            for (tag, value) in hierarchy.iter().zip(&entry.tags) {
                if !value.is_null() && !kinds.contains_key(tag) {
                    kinds.insert(tag.clone(), TagKind::of(value));
                }
            }
            metas.extend(entry.record.metadata.keys().cloned());
        }

        self.retry.run(&self.path, "write", || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = TableSchema::load(&tx)?;
            let mut report = WriteReport::default();

            let schema = match current.plan(hierarchy, &kinds, &metas)? {
                Some(next) => {
                    let added: Vec<&str> = next.added_since(&current).map(|c| c.name.as_str()).collect();
                    if self.schema_mode == SchemaMode::Strict {
                        return Err(StorageError::SchemaConflict(format!(
                            "strict store {} has no columns for {:?}",
                            self.path.display(),
                            added
                        )));
                    }
                    report.columns_added = added.len();
                    migrate::migrate(&tx, &current, &next, &self.path)?;
                    next
                }
                None => current,
            };
            check_kinds(&schema, hierarchy, entries)?;

            let columns = column_list(&schema);
            let placeholders: Vec<String> = (1..=FIXED_COLUMNS.len() + schema.len())
                .map(|i| format!("?{}", i))
                .collect();
            let mut select = tx.prepare_cached(&format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                columns,
                quote(TABLE_NAME),
                PATH_COLUMN
            ))?;
            let mut upsert = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                quote(TABLE_NAME),
                columns,
                placeholders.join(", ")
            ))?;

            for entry in entries {
                let row = row_values(&schema, hierarchy, entry);
                let stored: Option<Vec<Value>> = select
                    .query_row([&entry.record.path], |r| {
                        (0..row.len()).map(|i| r.get::<_, Value>(i)).collect()
                    })
                    .optional()?;
                match stored {
                    None => {
                        upsert.execute(params_from_iter(row.iter()))?;
                        report.inserted += 1;
                    }
                    Some(stored) if stored == row => report.unchanged += 1,
                    Some(_) => match policy {
                        WritePolicy::Error => {
                            return Err(StorageError::DuplicateKeyConflict {
                                path: entry.record.path.clone(),
                            })
                        }
                        WritePolicy::KeepExisting => report.kept_existing += 1,
                        WritePolicy::Replace => {
                            upsert.execute(params_from_iter(row.iter()))?;
                            report.replaced += 1;
                        }
                    },
                }
            }
            drop(select);
            drop(upsert);
            tx.commit()?;
            Ok(report)
        })
    }

    /// Every row as a tag tree over the stored hierarchy.
    pub fn read_all(&self) -> Result<TagTree, StorageError> {
        self.read(&ReadOptions::default())
    }

    pub fn read(&self, options: &ReadOptions) -> Result<TagTree, StorageError> {
        self.read_rows(None, options)
    }

    /// Rows matching `filter`, selected by SQLite.
    ///
    /// Same result as `read_all()?.filter(filter)`.
    pub fn select(&self, filter: &TagFilter) -> Result<TagTree, StorageError> {
        self.read_rows(Some(filter), &ReadOptions::default())
    }

    pub fn select_with(&self, filter: &TagFilter, options: &ReadOptions) -> Result<TagTree, StorageError> {
        self.read_rows(Some(filter), options)
    }

    fn read_rows(&self, filter: Option<&TagFilter>, options: &ReadOptions) -> Result<TagTree, StorageError> {
        if options.sample == Some(0) {
            return Err(StorageError::InvalidArgument(
                "sample size must be at least 1".to_string(),
            ));
        }

        self.retry.run(&self.path, "read", || {
            let conn = self.conn.lock();
            let schema = TableSchema::load(&conn)?;

            let hierarchy = match &options.required_tags {
                Some(required) => {
                    let missing: Vec<String> = required
                        .iter()
                        .filter(|tag| schema.tag(tag).is_none())
                        .cloned()
                        .collect();
                    if !missing.is_empty() {
                        return Err(StorageError::MissingTags(missing));
                    }
                    required.clone()
                }
                None => schema.hierarchy(),
            };
            let mut tree = TagTree::new(hierarchy.iter().cloned());

            let (clause, params) = match filter {
                Some(filter) => match query::where_clause(filter, &schema) {
                    Some(clause) => clause,
                    None => return Ok(tree),
                },
                None => (String::new(), Vec::new()),
            };
            let order = match options.sample {
                Some(n) => format!(" ORDER BY RANDOM() LIMIT {}", n),
                None => " ORDER BY rowid".to_string(),
            };
            let sql = format!(
                "SELECT {} FROM {}{}{}",
                column_list(&schema),
                quote(TABLE_NAME),
                clause,
                order
            );

            let tag_index: Vec<(usize, TagKind, &str)> = hierarchy
                .iter()
                .filter_map(|tag| {
                    let position = schema.columns().iter().position(|c| &c.name == tag)?;
                    let def = &schema.columns()[position];
                    Some((FIXED_COLUMNS.len() + position, def.tag_kind()?, def.column.as_str()))
                })
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let timestamp: String = row.get(2)?;
                let mut record = ImageRecord::with_timestamp(row.get::<_, String>(0)?, timestamp_from_sql(&timestamp)?);
                record.thumbnail = row.get(1)?;
                for (i, def) in schema.columns().iter().enumerate() {
                    if def.role == ColumnRole::Meta {
                        if let Some(value) = meta_from_sql(row.get_ref(FIXED_COLUMNS.len() + i)?, &def.column)? {
                            record.metadata.insert(def.name.clone(), value);
                        }
                    }
                }
                let tags = tag_index
                    .iter()
                    .map(|(index, kind, column)| tag_from_sql(row.get_ref(*index)?, *kind, column))
                    .collect::<Result<Vec<_>, _>>()?;
                tree.insert(&tags, record)?;
            }
            Ok(tree)
        })
    }

    /// Remove rows matching `filter`. Returns the number of rows removed.
    pub fn delete(&self, filter: &TagFilter) -> Result<usize, StorageError> {
        let deleted = self.retry.run(&self.path, "delete", || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let schema = TableSchema::load(&tx)?;
            let Some((clause, params)) = query::where_clause(filter, &schema) else {
                return Ok(0);
            };
            let n = tx.execute(
                &format!("DELETE FROM {}{}", quote(TABLE_NAME), clause),
                params_from_iter(params.iter()),
            )?;
            tx.commit()?;
            Ok(n)
        })?;
        debug!(path = %self.path.display(), deleted, "Deleted rows by filter");
        Ok(deleted)
    }

    /// Remove rows by path, `options.chunk_size` paths per transaction.
    ///
    /// Chunks already committed stay deleted if a later chunk fails.
    pub fn delete_paths<S: AsRef<str>>(&self, paths: &[S], options: &DeleteOptions) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for chunk in paths.chunks(options.chunk_size.max(1)) {
            let n = self.retry.run(&self.path, "delete", || {
                let mut conn = self.conn.lock();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let n = tx.execute(
                    &format!(
                        "DELETE FROM {} WHERE {} IN ({})",
                        quote(TABLE_NAME),
                        PATH_COLUMN,
                        placeholders.join(", ")
                    ),
                    params_from_iter(chunk.iter().map(|p| p.as_ref())),
                )?;
                tx.commit()?;
                Ok(n)
            })?;
            debug!(path = %self.path.display(), requested = chunk.len(), deleted = n, "Deleted chunk");
            deleted += n;
        }
        if options.vacuum {
            self.retry.run(&self.path, "vacuum", || {
                self.conn.lock().execute_batch("VACUUM")?;
                Ok(())
            })?;
            info!(path = %self.path.display(), "Vacuumed store file");
        }
        Ok(deleted)
    }

    /// Release the handle, reporting errors from closing the connection.
    pub fn close(self) -> Result<(), StorageError> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, err)| StorageError::Sqlite(err))
    }
}

/// Fixed columns followed by every schema column, quoted, comma separated.
fn column_list(schema: &TableSchema) -> String {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(schema.columns().iter().map(|c| quote(&c.column)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values for every column of `schema`, in [`column_list`] order.
fn row_values(schema: &TableSchema, hierarchy: &[String], entry: &FlatEntry) -> Vec<Value> {
    let record = &entry.record;
    let mut row = Vec::with_capacity(FIXED_COLUMNS.len() + schema.len());
    row.push(Value::Text(record.path.clone()));
    row.push(record.thumbnail.clone().map_or(Value::Null, Value::Text));
    row.push(timestamp_to_sql(&record.timestamp));
    for def in schema.columns() {
        let value = match def.role {
            ColumnRole::Tag(_) => hierarchy
                .iter()
                .position(|t| t == &def.name)
                .and_then(|i| entry.tags.get(i))
                .map_or(Value::Null, tag_to_sql),
            ColumnRole::Meta => record.metadata.get(&def.name).map_or(Value::Null, meta_to_sql),
        };
        row.push(value);
    }
    row
}

fn check_kinds(schema: &TableSchema, hierarchy: &[String], entries: &[FlatEntry]) -> Result<(), StorageError> {
    for (i, tag) in hierarchy.iter().enumerate() {
        let Some(kind) = schema.tag(tag).and_then(ColumnDef::tag_kind) else {
            continue;
        };
        if let Some(entry) = entries
            .iter()
            .find(|e| e.tags.get(i).is_some_and(|v| !kind.accepts(v)))
        {
            return Err(StorageError::SchemaConflict(format!(
                "tag {} holds {:?} values, cannot store {:?} for {}",
                tag, kind, entry.tags[i], entry.record.path
            )));
        }
    }
    Ok(())
}
