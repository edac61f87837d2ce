//! Store Merger
//!
//! Folds any number of source store files into one destination. Each source
//! is written in its own transaction, so a failure leaves the destination with
//! the sources merged so far and every remaining source untouched. Rows are
//! keyed by path, so re-running a merge never duplicates rows.

use crate::concurrency::RetryPolicy;
use crate::error::StorageError;
use crate::store::{ColumnHints, DeleteOptions, OpenOptions, StoreFile, WritePolicy, WriteReport};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What happens to a source once its rows are in the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDisposal {
    #[default]
    Keep,
    /// Remove the source file (and its rollback journal).
    DeleteFile,
    /// Remove only the rows that were merged; rows a producer added in the
    /// meantime stay in the source.
    DeleteMergedRows,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub policy: WritePolicy,
    pub disposal: SourceDisposal,
    pub retry: RetryPolicy,
}

impl MergeOptions {
    /// The conflict policy has no default and must be chosen by the caller.
    pub fn new(policy: WritePolicy) -> Self {
        Self {
            policy,
            disposal: SourceDisposal::Keep,
            retry: RetryPolicy::default(),
        }
    }

    pub fn disposal(mut self, disposal: SourceDisposal) -> Self {
        self.disposal = disposal;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Sources whose rows are now in the destination.
    pub merged: Vec<PathBuf>,
    /// Sources that did not exist or were the destination itself.
    pub skipped: Vec<PathBuf>,
    pub rows: WriteReport,
}

/// Merge every store file in `sources` into `destination`, creating it if
/// needed.
pub fn merge_store_files<I, P>(sources: I, destination: impl AsRef<Path>, options: &MergeOptions) -> Result<MergeReport, StorageError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let destination = destination.as_ref();
    let dest = StoreFile::open(destination, &OpenOptions::new().retry(options.retry))?;
    let dest_canonical = dunce::canonicalize(destination)?;
    let mut report = MergeReport::default();

    for source in sources {
        let source = source.as_ref();
        let canonical = match dunce::canonicalize(source) {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(source = %source.display(), "Source store file not found, skipping");
                report.skipped.push(source.to_path_buf());
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if canonical == dest_canonical {
            warn!(source = %source.display(), "Source is the destination, skipping");
            report.skipped.push(source.to_path_buf());
            continue;
        }

        let rows = merge_one(source, &dest, options)?;
        info!(
            source = %source.display(),
            destination = %destination.display(),
            inserted = rows.inserted,
            replaced = rows.replaced,
            unchanged = rows.unchanged,
            "Merged store file"
        );
        report.rows.absorb(rows);
        report.merged.push(source.to_path_buf());
    }
    Ok(report)
}

fn merge_one(source: &Path, dest: &StoreFile, options: &MergeOptions) -> Result<WriteReport, StorageError> {
    let src = StoreFile::open(source, &OpenOptions::new().create(false).retry(options.retry))?;
    let schema = src.schema()?;
    let tree = src.read_all()?;
    let entries = tree.flatten();

    let rows = dest.write_batch(
        tree.hierarchy(),
        &entries,
        options.policy,
        &ColumnHints::from_schema(&schema),
    )?;

    match options.disposal {
        SourceDisposal::Keep => src.close()?,
        SourceDisposal::DeleteMergedRows => {
            let paths: Vec<&str> = entries.iter().map(|e| e.record.path.as_str()).collect();
            let deleted = src.delete_paths(&paths, &DeleteOptions::default())?;
            debug!(source = %source.display(), deleted, "Removed merged rows from source");
            src.close()?;
        }
        SourceDisposal::DeleteFile => {
            src.close()?;
            remove_if_present(source)?;
            let mut journal = source.as_os_str().to_owned();
            journal.push("-journal");
            remove_if_present(Path::new(&journal))?;
            debug!(source = %source.display(), "Removed source store file");
        }
    }
    Ok(rows)
}

fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
