use crate::integration::support::record;
use plottag::store::OpenOptions;
use plottag::{
    ConflictPolicy, ImageRecord, Selector, StoreFile, TagFilter, TagTree, TagValue, WritePolicy,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const TAGS: [&str; 4] = ["model", "region", "hour", "stat"];

fn arb_value() -> impl Strategy<Value = TagValue> {
    prop_oneof![
        Just(TagValue::Null),
        (-20i64..20).prop_map(TagValue::Int),
        (-100.0f64..100.0).prop_map(TagValue::Float),
        "[a-c]{1,2}".prop_map(TagValue::Str),
        (0i64..3, "[a-c]").prop_map(|(rank, label)| TagValue::ordered(rank, label)),
    ]
}

/// Uniform tree of depth 1..=4 with unique record paths.
fn arb_tree() -> impl Strategy<Value = TagTree> {
    (1usize..=TAGS.len()).prop_flat_map(|depth| {
        prop::collection::vec(prop::collection::vec(arb_value(), depth), 0..24).prop_map(move |paths| {
            let mut tree = TagTree::new(TAGS[..depth].iter().copied());
            for (i, tags) in paths.into_iter().enumerate() {
                tree.insert(&tags, record(&format!("{}.png", i))).unwrap();
            }
            tree
        })
    })
}

/// Filter built from values actually present in the tree, plus a miss.
fn filter_for(tree: &TagTree, picks: &[usize]) -> TagFilter {
    let mut filter = TagFilter::new();
    for (depth, tag) in tree.hierarchy().iter().enumerate() {
        let keys = tree.keys_at_depth(depth, plottag::KeyOrder::FirstSeen);
        let pick = picks.get(depth).copied().unwrap_or(0);
        let selector = match pick % 4 {
            0 => Selector::Any,
            1 if !keys.is_empty() => Selector::Exact(keys[pick % keys.len()].clone()),
            2 => Selector::OneOf(keys.iter().step_by(2).cloned().collect()),
            _ => Selector::Exact(TagValue::from("zzz")),
        };
        filter = filter.with(tag.clone(), selector);
    }
    filter
}

fn relabel(tree: &TagTree, prefix: &str) -> TagTree {
    let entries = tree.flatten().into_iter().map(|mut e| {
        e.record = ImageRecord::with_timestamp(format!("{}{}", prefix, e.record.path), e.record.timestamp);
        e
    });
    TagTree::unflatten(tree.hierarchy().iter().cloned(), entries, true).unwrap()
}

proptest! {
    #[test]
    fn prop_uniform_tree_has_single_depth(tree in arb_tree()) {
        if !tree.is_empty() {
            prop_assert_eq!(tree.depths(), BTreeSet::from([tree.hierarchy().len()]));
        }
        prop_assert!(tree.validate().is_ok());
        let mut short = tree.clone();
        let too_short = vec![TagValue::Null; tree.hierarchy().len() - 1];
        prop_assert!(short.insert(&too_short, record("x.png")).is_err());
    }

    #[test]
    fn prop_unflatten_inverts_flatten(tree in arb_tree()) {
        let rebuilt = TagTree::unflatten(tree.hierarchy().iter().cloned(), tree.flatten(), true).unwrap();
        prop_assert_eq!(&rebuilt, &tree);
        prop_assert_eq!(rebuilt.flatten(), tree.flatten());
    }

    #[test]
    fn prop_filter_is_idempotent(tree in arb_tree(), picks in prop::collection::vec(0usize..16, 4)) {
        let filter = filter_for(&tree, &picks);
        let once = tree.filter(&filter);
        prop_assert_eq!(once.filter(&filter), once.clone());
        prop_assert!(once.len() <= tree.len());
    }

    #[test]
    fn prop_disjoint_merge_commutes(a in arb_tree(), b in arb_tree()) {
        let depth = a.hierarchy().len().min(b.hierarchy().len());
        let truncate = |t: &TagTree, prefix: &str| {
            let entries = t.flatten().into_iter().map(|mut e| {
                e.tags.truncate(depth);
                e
            });
            relabel(&TagTree::unflatten(TAGS[..depth].iter().copied(), entries, true).unwrap(), prefix)
        };
        let (a, b) = (truncate(&a, "a_"), truncate(&b, "b_"));

        let ab = a.merge(&b, ConflictPolicy::Error).unwrap();
        let ba = b.merge(&a, ConflictPolicy::Error).unwrap();
        prop_assert_eq!(&ab, &ba);
        prop_assert_eq!(ab.len(), a.len() + b.len());
    }

    #[test]
    fn prop_sort_only_reorders(tree in arb_tree(), reverse in any::<bool>()) {
        let spec = plottag::SortSpec::new(plottag::SortMethod::Numeric).reversed(reverse);
        let sorted = tree.sorted(&spec);
        prop_assert_eq!(&sorted, &tree);
        prop_assert_eq!(sorted.sorted(&spec).flatten(), sorted.flatten());
    }
}

fn arb_store_rows() -> impl Strategy<Value = Vec<(Option<&'static str>, Option<i64>)>> {
    let model = prop::option::weighted(0.8, prop::sample::select(vec!["ukv", "glm", "mogreps"]));
    let hour = prop::option::weighted(0.8, 0i64..4);
    prop::collection::vec((model, hour), 0..20)
}

fn value_tree(rows: &[(Option<&'static str>, Option<i64>)]) -> TagTree {
    let mut tree = TagTree::new(["model", "hour"]);
    for (i, (model, hour)) in rows.iter().enumerate() {
        let tags = [
            model.map_or(TagValue::Null, TagValue::from),
            hour.map_or(TagValue::Null, TagValue::Int),
        ];
        tree.insert(&tags, record(&format!("{}.png", i)).meta("index", i as i64)).unwrap();
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_store_round_trip_and_select(rows in arb_store_rows(), picks in prop::collection::vec(0usize..16, 2)) {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreFile::open(dir.path().join("imt.db"), &OpenOptions::new()).unwrap();
        let tree = value_tree(&rows);
        store.write_tree(&tree, WritePolicy::Error).unwrap();

        let all = store.read_all().unwrap();
        if !tree.is_empty() {
            prop_assert_eq!(&all, &tree);
        }

        let filter = filter_for(&all, &picks);
        prop_assert_eq!(store.select(&filter).unwrap(), all.filter(&filter));

        // Writing the same tree again changes nothing.
        let again = store.write_tree(&tree, WritePolicy::Error).unwrap();
        prop_assert_eq!(again.unchanged, tree.len());
        prop_assert_eq!(store.count().unwrap(), tree.len());
    }
}
