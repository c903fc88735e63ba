//! Property tests over generated notebooks.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use common::{name, snapshot_pages};
use notedex::index::Index;
use notedex::layout::MemoryLayout;

/// A generated notebook: page name -> link targets written into its
/// content.
type Notebook = BTreeMap<String, Vec<String>>;

fn page_name_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::sample::select(vec!["alpha", "beta", "gamma", "delta", "epsilon"]),
        1..=3,
    )
    .prop_map(|parts| parts.join(":"))
}

fn notebook_strategy() -> impl Strategy<Value = Notebook> {
    prop::collection::btree_map(
        page_name_strategy(),
        prop::collection::vec(page_name_strategy(), 0..=2),
        1..=12,
    )
}

fn build_index(notebook: &Notebook) -> (Arc<MemoryLayout>, Index) {
    let layout = Arc::new(MemoryLayout::new());
    for (page, links) in notebook {
        let text: String = links
            .iter()
            .map(|target| format!("see [[:{target}]] "))
            .collect();
        layout.store_page(&name(page), &text);
    }
    let index = Index::new_from_memory(layout.clone()).expect("open index");
    (layout, index)
}

fn monotonicity_violations(index: &Index) -> i64 {
    index
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM pages p JOIN pages q ON p.parent = q.id \
                 WHERE q.page_exists < p.page_exists",
                [],
                |row| row.get(0),
            )?)
        })
        .expect("query monotonicity")
}

fn orphan_placeholders(index: &Index) -> i64 {
    index
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM pages p WHERE p.page_exists=1 AND p.n_children=0 \
                 AND NOT EXISTS (SELECT 1 FROM links l WHERE l.target = p.id)",
                [],
                |row| row.get(0),
            )?)
        })
        .expect("query placeholders")
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    #[test]
    fn existence_is_monotone_up_the_tree(notebook in notebook_strategy()) {
        let (_layout, index) = build_index(&notebook);
        index.update(None).unwrap();

        prop_assert_eq!(monotonicity_violations(&index), 0);
        prop_assert!(index.probably_uptodate().unwrap());
    }

    #[test]
    fn update_twice_is_idempotent(notebook in notebook_strategy()) {
        let (_layout, index) = build_index(&notebook);
        index.update(None).unwrap();
        let first = snapshot_pages(&index);

        index.update(None).unwrap();
        let second = snapshot_pages(&index);

        prop_assert_eq!(first, second);
        prop_assert!(index.probably_uptodate().unwrap());
    }

    #[test]
    fn no_orphan_placeholders_after_scan(notebook in notebook_strategy()) {
        let (_layout, index) = build_index(&notebook);
        index.update(None).unwrap();

        prop_assert_eq!(orphan_placeholders(&index), 0);
    }

    #[test]
    fn no_orphan_placeholders_after_delete(notebook in notebook_strategy()) {
        let (layout, index) = build_index(&notebook);
        index.update(None).unwrap();

        // Delete an arbitrary page from store and index.
        let victim = notebook.keys().next().unwrap().clone();
        layout.remove_tree(&name(&victim));
        index.on_delete_page(&name(&victim)).unwrap();

        prop_assert_eq!(orphan_placeholders(&index), 0);
        prop_assert_eq!(monotonicity_violations(&index), 0);
    }

    #[test]
    fn rescan_after_delete_converges(notebook in notebook_strategy()) {
        let (layout, index) = build_index(&notebook);
        index.update(None).unwrap();

        let victim = notebook.keys().last().unwrap().clone();
        layout.remove_tree(&name(&victim));
        index.update(None).unwrap();

        prop_assert!(index.probably_uptodate().unwrap());
        prop_assert_eq!(monotonicity_violations(&index), 0);
        prop_assert_eq!(orphan_placeholders(&index), 0);
    }
}
