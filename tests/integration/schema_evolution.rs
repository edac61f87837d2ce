use crate::integration::support::{fast_options, record, tags};
use plottag::schema::{ColumnRole, TagKind};
use plottag::{MetaValue, SchemaMode, StorageError, StoreFile, TagValue};
use tempfile::TempDir;

#[test]
fn new_tag_leaves_prior_rows_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();

    let n = 7;
    for i in 0..n {
        let rec = record(&format!("prior_{}.png", i)).meta("run", i as i64);
        store.write(&["model", "region"], &tags(&["A", "N"]), &rec).unwrap();
    }
    let before = store.read_all().unwrap().flatten();

    let report = store
        .write(
            &["model", "level", "region"],
            &[TagValue::from("A"), TagValue::Int(500), TagValue::from("S")],
            &record("new.png").meta("contour", "filled"),
        )
        .unwrap();
    assert_eq!(report.columns_added, 2);

    let schema = store.schema().unwrap();
    assert_eq!(schema.hierarchy(), vec!["model", "level", "region"]);
    assert_eq!(schema.get("level").unwrap().role, ColumnRole::Tag(TagKind::Integer));
    assert_eq!(schema.get("contour").unwrap().role, ColumnRole::Meta);

    let after = store.read_all().unwrap();
    assert_eq!(after.len(), n + 1);
    let prior = after
        .get(&[TagValue::from("A"), TagValue::Null, TagValue::from("N")])
        .unwrap();
    assert_eq!(prior.len(), n);
    for (old, new) in before.iter().zip(prior) {
        assert_eq!(&old.record, new);
        assert!(!new.metadata.contains_key("contour"));
    }
    let added = after
        .get(&[TagValue::from("A"), TagValue::Int(500), TagValue::from("S")])
        .unwrap();
    assert_eq!(added[0].metadata.get("contour"), Some(&MetaValue::from("filled")));
    assert!(!added[0].metadata.contains_key("run"));
}

#[test]
fn leftover_migration_table_is_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imt.db");
    let store = StoreFile::open(&path, &fast_options()).unwrap();
    store.write(&["model"], &tags(&["A"]), &record("a.png")).unwrap();
    store.close().unwrap();

    // Debris of an interrupted migration from some earlier process.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE img_info_migrate (junk TEXT); INSERT INTO img_info_migrate VALUES ('x');")
        .unwrap();
    drop(conn);

    let store = StoreFile::open(&path, &fast_options()).unwrap();
    store.write(&["model", "region"], &tags(&["B", "N"]), &record("b.png")).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.hierarchy().unwrap(), vec!["model", "region"]);
}

#[test]
fn rejected_writes_leave_store_intact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imt.db");
    let store = StoreFile::open(&path, &fast_options()).unwrap();
    store.write(&["model", "hour"], &[TagValue::from("A"), TagValue::Int(0)], &record("a.png")).unwrap();
    let before = store.read_all().unwrap();

    let reordered = store.write(&["hour", "model"], &[TagValue::Int(6), TagValue::from("A")], &record("b.png"));
    assert!(matches!(reordered, Err(StorageError::SchemaConflict(_))));

    let wrong_kind = store.write(
        &["model", "hour", "region"],
        &[TagValue::from("A"), TagValue::Float(6.5), TagValue::from("N")],
        &record("c.png"),
    );
    assert!(matches!(wrong_kind, Err(StorageError::SchemaConflict(_))));
    // The rejected write must not have migrated the table either.
    assert_eq!(store.hierarchy().unwrap(), vec!["model", "hour"]);

    drop(store);
    let strict = StoreFile::open(&path, &fast_options().schema_mode(SchemaMode::Strict)).unwrap();
    let widened = strict.write(&["model", "hour"], &[TagValue::from("B"), TagValue::Int(3)], &record("d.png").meta("note", "x"));
    assert!(matches!(widened, Err(StorageError::SchemaConflict(_))));
    strict
        .write(&["model", "hour"], &[TagValue::from("B"), TagValue::Int(3)], &record("d.png"))
        .unwrap();

    let after = strict.read_all().unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(after.filter(&plottag::TagFilter::new().exact("model", "A")), before);
}

#[test]
fn null_first_value_creates_text_column() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    store.write(&["ensemble"], &[TagValue::Null], &record("a.png")).unwrap();
    let schema = store.schema().unwrap();
    assert_eq!(schema.get("ensemble").unwrap().role, ColumnRole::Tag(TagKind::Text));
    store.write(&["ensemble"], &tags(&["member 1"]), &record("b.png")).unwrap();
    assert_eq!(store.read_all().unwrap().len(), 2);
}

#[test]
fn failed_migration_keeps_previous_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imt.db");
    let store = StoreFile::open(&path, &fast_options()).unwrap();
    store.write(&["model"], &tags(&["A"]), &record("a.png").meta("run", 1i64)).unwrap();

    // A column added by some other tool; SQLite treats "Region" and the
    // encoded tag column "region" as the same identifier.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("ALTER TABLE img_info ADD COLUMN \"Region\" TEXT").unwrap();
    drop(conn);

    let schema_before = store.schema().unwrap();
    let tree_before = store.read_all().unwrap();

    let err = store.write(&["model", "region"], &tags(&["B", "N"]), &record("b.png"));
    assert!(matches!(err, Err(StorageError::MigrationFailure { .. })), "{:?}", err);

    assert_eq!(store.schema().unwrap(), schema_before);
    assert_eq!(store.read_all().unwrap(), tree_before);
    assert_eq!(store.count().unwrap(), 1);

    // The table is still writable with its existing columns.
    store.write(&["model"], &tags(&["C"]), &record("c.png")).unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn canonically_equivalent_tag_names_get_separate_columns() {
    let dir = TempDir::new().unwrap();
    let store = StoreFile::open(dir.path().join("imt.db"), &fast_options()).unwrap();
    let decomposed = "re\u{301}gion";
    let composed = "r\u{e9}gion";

    store.write(&[decomposed], &tags(&["N"]), &record("a.png")).unwrap();
    assert_eq!(store.hierarchy().unwrap(), vec![decomposed]);

    let again = store.write(&[decomposed], &tags(&["S"]), &record("b.png")).unwrap();
    assert_eq!(again.columns_added, 0);
    assert_eq!(again.inserted, 1);

    store.write(&[decomposed, composed], &tags(&["E", "W"]), &record("c.png")).unwrap();
    assert_eq!(store.hierarchy().unwrap(), vec![decomposed, composed]);
    let tree = store.read_all().unwrap();
    assert_eq!(tree.get(&[TagValue::from("N"), TagValue::Null]).unwrap().len(), 1);
    assert_eq!(tree.get(&tags(&["E", "W"])).unwrap().len(), 1);
}
