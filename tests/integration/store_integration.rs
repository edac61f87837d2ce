use crate::integration::support::{fast_options, record, tags};
use plottag::store::DeleteOptions;
use plottag::{
    KeyOrder, MetaValue, ReadOptions, StorageError, StoreFile, TagFilter, TagTree, TagValue,
    WritePolicy,
};
use tempfile::TempDir;

fn mixed_tree() -> TagTree {
    let mut tree = TagTree::new(["model", "hour", "level", "stat"]);
    let rows = [
        ("ukv", 0, 850.0, (1, "mean"), "ukv_0_850_mean.png"),
        ("ukv", 6, 850.0, (2, "max"), "ukv_6_850_max.png"),
        ("ukv", 6, 500.0, (1, "mean"), "ukv_6_500_mean.png"),
        ("glm", 12, 250.0, (0, "min"), "glm_12_250_min.png"),
    ];
    for (model, hour, level, (rank, stat), path) in rows {
        let rec = record(path)
            .thumbnail(format!("thumbs/{}", path))
            .meta("title", format!("{} T+{}", model, hour))
            .meta("dpi", 72i64)
            .meta("scale", 0.5);
        tree.insert(
            &[
                TagValue::from(model),
                TagValue::Int(hour),
                TagValue::Float(level),
                TagValue::ordered(rank, stat),
            ],
            rec,
        )
        .unwrap();
    }
    tree
}

#[test]
fn store_round_trip_preserves_tree() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imt.db");
    let tree = mixed_tree();

    let store = StoreFile::open(&path, &fast_options()).unwrap();
    let report = store.write_tree(&tree, WritePolicy::Error).unwrap();
    assert_eq!(report.inserted, 4);
    store.close().unwrap();

    let reopened = StoreFile::open(&path, &fast_options().create(false)).unwrap();
    let read = reopened.read_all().unwrap();
    assert_eq!(read, tree);
    assert_eq!(read.keys_at_depth(0, KeyOrder::Sorted), tags(&["glm", "ukv"]));
}

#[test]
fn scenario_keys_and_filter() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    store.write(&["model", "region"], &tags(&["A", "N"]), &record("img1.png")).unwrap();
    store.write(&["model", "region"], &tags(&["A", "S"]), &record("img2.png")).unwrap();

    let tree = store.read_all().unwrap();
    assert_eq!(tree.keys_at_depth(0, KeyOrder::FirstSeen), tags(&["A"]));
    assert_eq!(tree.keys_at_depth(1, KeyOrder::FirstSeen), tags(&["N", "S"]));

    let north = tree.filter(&TagFilter::new().exact("region", "N"));
    let paths: Vec<String> = north.flatten().into_iter().map(|e| e.record.path).collect();
    assert_eq!(paths, vec!["img1.png"]);
    assert_eq!(store.select(&TagFilter::new().exact("region", "N")).unwrap(), north);
}

#[test]
fn select_with_options_and_metadata() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    store.write_tree(&mixed_tree(), WritePolicy::Error).unwrap();

    let filter = TagFilter::new().exact("model", "ukv").exact("level", 850.0);
    let tree = store
        .select_with(&filter, &ReadOptions::default().required_tags(["stat", "model"]))
        .unwrap();
    assert_eq!(tree.hierarchy(), ["stat", "model"]);
    assert_eq!(tree.len(), 2);
    let mean = tree.get(&[TagValue::ordered(1, "mean"), TagValue::from("ukv")]).unwrap();
    assert_eq!(mean[0].metadata.get("title"), Some(&MetaValue::from("ukv T+0")));
    assert_eq!(mean[0].metadata.get("scale"), Some(&MetaValue::Real(0.5)));
}

#[test]
fn delete_removes_only_matching_rows() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    store.write_tree(&mixed_tree(), WritePolicy::Error).unwrap();

    let removed = store
        .delete(&TagFilter::new().one_of("hour", [TagValue::Int(6), TagValue::Int(12)]))
        .unwrap();
    assert_eq!(removed, 3);
    let left = store.read_all().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left.flatten()[0].record.path, "ukv_0_850_mean.png");

    let stale: Vec<String> = (0..250).map(|i| format!("stale_{}.png", i)).collect();
    for path in &stale {
        store.write(&["model"], &tags(&["old"]), &record(path)).unwrap();
    }
    let deleted = store.delete_paths(&stale, &DeleteOptions::default()).unwrap();
    assert_eq!(deleted, 250);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn prune_missing_then_delete_stale_rows() {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::write(images.join("kept.png"), b"png").unwrap();

    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    store.write(&["model"], &tags(&["A"]), &record("kept.png")).unwrap();
    store.write(&["model"], &tags(&["A"]), &record("gone.png")).unwrap();

    let all = store.read_all().unwrap();
    let present = all.prune_missing(&images);
    let stale: Vec<String> = all
        .prune(|_, rec| present.flatten().iter().any(|e| e.record.path == rec.path))
        .flatten()
        .into_iter()
        .map(|e| e.record.path)
        .collect();
    assert_eq!(stale, vec!["gone.png"]);
    store.delete_paths(&stale, &DeleteOptions::default()).unwrap();
    assert_eq!(store.read_all().unwrap(), present);
}

#[test]
fn open_without_create_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let result = StoreFile::open(dir.path().join("missing.db"), &fast_options().create(false));
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[test]
fn export_json_lists_keys_per_depth() {
    let json = mixed_tree().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["hierarchy"].as_array().unwrap().len(), 4);
    assert_eq!(value["keys"][0].as_array().unwrap().len(), 2);
    assert_eq!(value["entries"].as_array().unwrap().len(), 4);
}

#[test]
fn reinserted_path_round_trips_through_store() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();

    let mut tree = TagTree::new(["model", "region"]);
    tree.insert(&tags(&["A", "N"]), record("img1.png")).unwrap();
    tree.insert(&tags(&["A", "N"]), record("img1.png").meta("run", 2i64)).unwrap();
    assert_eq!(tree.len(), 1);

    store.write_tree(&tree, WritePolicy::Error).unwrap();
    let read = store.read_all().unwrap();
    assert_eq!(read, tree);
    assert_eq!(
        read.get(&tags(&["A", "N"])).unwrap()[0].metadata.get("run"),
        Some(&MetaValue::Integer(2))
    );
}
