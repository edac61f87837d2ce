use crate::integration::support::{fast_options, record, tags};
use plottag::concurrency::{Backoff, RetryPolicy};
use plottag::{
    merge_store_files, MergeOptions, SourceDisposal, StorageError, StoreFile, TagValue,
    WritePolicy,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn options(policy: WritePolicy) -> MergeOptions {
    MergeOptions::new(policy).retry(RetryPolicy::new(3, Duration::from_secs(2), Backoff::None))
}

fn seed(path: &Path, hierarchy: &[&str], rows: &[(&[&str], &str)]) {
    let store = StoreFile::open(path, &fast_options()).unwrap();
    for (values, image) in rows {
        store.write(hierarchy, &tags(values), &record(image)).unwrap();
    }
    store.close().unwrap();
}

#[test]
fn union_of_disjoint_columns() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    let dest = dir.path().join("dest.db");
    seed(&a, &["model", "region"], &[(&["A", "N"], "a_n.png"), (&["A", "S"], "a_s.png")]);
    seed(&b, &["model", "level"], &[(&["B", "850"], "b_850.png")]);

    let report = merge_store_files([&a, &b], &dest, &options(WritePolicy::Error)).unwrap();
    assert_eq!(report.merged.len(), 2);
    assert_eq!(report.rows.inserted, 3);

    let store = StoreFile::open(&dest, &fast_options()).unwrap();
    assert_eq!(store.hierarchy().unwrap(), vec!["model", "region", "level"]);
    let tree = store.read_all().unwrap();
    assert_eq!(
        tree.get(&[TagValue::from("A"), TagValue::from("N"), TagValue::Null]).unwrap()[0].path,
        "a_n.png"
    );
    assert_eq!(
        tree.get(&[TagValue::from("B"), TagValue::Null, TagValue::from("850")]).unwrap()[0].path,
        "b_850.png"
    );
}

#[test]
fn rerunning_a_merge_adds_nothing() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.db");
    let dest = dir.path().join("dest.db");
    seed(&a, &["model"], &[(&["A"], "1.png"), (&["B"], "2.png")]);

    let opts = options(WritePolicy::Error);
    merge_store_files([&a], &dest, &opts).unwrap();
    let again = merge_store_files([&a], &dest, &opts).unwrap();
    assert_eq!(again.rows.inserted, 0);
    assert_eq!(again.rows.unchanged, 2);
    assert_eq!(StoreFile::open(&dest, &fast_options()).unwrap().count().unwrap(), 2);
}

#[test]
fn failure_leaves_merged_prefix_and_remaining_sources() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.db");
    let bad = dir.path().join("bad.db");
    let last = dir.path().join("last.db");
    let dest = dir.path().join("dest.db");
    seed(&first, &["model", "region"], &[(&["A", "N"], "first.png")]);
    seed(&bad, &["region", "model"], &[(&["N", "A"], "bad.png")]);
    seed(&last, &["model", "region"], &[(&["C", "E"], "last.png")]);

    let opts = options(WritePolicy::Error).disposal(SourceDisposal::DeleteFile);
    let err = merge_store_files([&first, &bad, &last], &dest, &opts);
    assert!(matches!(err, Err(StorageError::SchemaConflict(_))));

    assert!(!first.exists());
    assert!(bad.exists());
    assert!(last.exists());
    let store = StoreFile::open(&dest, &fast_options()).unwrap();
    let paths: Vec<String> = store.read_all().unwrap().flatten().into_iter().map(|e| e.record.path).collect();
    assert_eq!(paths, vec!["first.png"]);
    drop(store);

    // Resume without the offending source; the consumed one is simply skipped.
    let resumed = merge_store_files([&first, &last], &dest, &opts).unwrap();
    assert_eq!(resumed.skipped, vec![first.clone()]);
    assert_eq!(resumed.merged, vec![last.clone()]);
    assert_eq!(StoreFile::open(&dest, &fast_options()).unwrap().count().unwrap(), 2);
}

#[test]
fn conflicting_rows_follow_write_policy() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    let dest = dir.path().join("dest.db");
    seed(&a, &["model"], &[(&["A"], "same.png")]);
    seed(&b, &["model"], &[(&["B"], "same.png")]);

    let err = merge_store_files([&a, &b], &dest, &options(WritePolicy::Error));
    assert!(matches!(err, Err(StorageError::DuplicateKeyConflict { path }) if path == "same.png"));

    let kept = merge_store_files([&b], &dest, &options(WritePolicy::KeepExisting)).unwrap();
    assert_eq!(kept.rows.kept_existing, 1);
    let tree = StoreFile::open(&dest, &fast_options()).unwrap().read_all().unwrap();
    assert!(tree.get(&tags(&["A"])).is_some());

    let replaced = merge_store_files([&b], &dest, &options(WritePolicy::Replace)).unwrap();
    assert_eq!(replaced.rows.replaced, 1);
    let tree = StoreFile::open(&dest, &fast_options()).unwrap().read_all().unwrap();
    assert!(tree.get(&tags(&["A"])).is_none());
    assert_eq!(tree.get(&tags(&["B"])).unwrap()[0].path, "same.png");
}
