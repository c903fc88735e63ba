//! Placeholder bookkeeping: creation for dangling links, cleanup once
//! the last reference is gone, and the current-page marker.

mod common;

use common::{exists_level, link_pairs, memory_fixture, name, SignalLog};
use notedex::index::{SIGNAL_PAGE_ADDED, SIGNAL_PAGE_REMOVED};
use notedex::model::PageExists;

#[test]
fn dangling_link_creates_placeholder_chain() {
    let (_layout, index) = memory_fixture(&[("X", "see [[Y:Z]]")]);
    index.update(None).unwrap();

    assert_eq!(exists_level(&index, "X"), Some(PageExists::HasContent));
    assert_eq!(exists_level(&index, "Y"), Some(PageExists::AsLink));
    assert_eq!(exists_level(&index, "Y:Z"), Some(PageExists::AsLink));
    assert_eq!(
        link_pairs(&index),
        vec![("X".to_string(), "Y:Z".to_string())]
    );
}

#[test]
fn placeholder_cleaned_up_after_edit() {
    let (layout, index) = memory_fixture(&[("X", "see [[Y:Z]]")]);
    index.update(None).unwrap();

    let removed = SignalLog::new();
    removed.attach(&index, SIGNAL_PAGE_REMOVED);

    layout.store_page(&name("X"), "no links here");
    index.on_store_page(&name("X")).unwrap();

    assert_eq!(exists_level(&index, "Y:Z"), None);
    assert_eq!(exists_level(&index, "Y"), None);
    assert!(link_pairs(&index).is_empty());
    assert!(removed.contains(SIGNAL_PAGE_REMOVED, "Y:Z"));
    assert!(removed.contains(SIGNAL_PAGE_REMOVED, "Y"));
}

#[test]
fn placeholder_survives_while_second_link_remains() {
    let (layout, index) = memory_fixture(&[
        ("X", "see [[Ghost]]"),
        ("W", "also [[Ghost]]"),
    ]);
    index.update(None).unwrap();
    assert_eq!(exists_level(&index, "Ghost"), Some(PageExists::AsLink));

    layout.store_page(&name("X"), "dropped");
    index.on_store_page(&name("X")).unwrap();
    assert_eq!(exists_level(&index, "Ghost"), Some(PageExists::AsLink));

    layout.store_page(&name("W"), "dropped too");
    index.on_store_page(&name("W")).unwrap();
    assert_eq!(exists_level(&index, "Ghost"), None);
}

#[test]
fn placeholder_promoted_when_file_appears() {
    let (layout, index) = memory_fixture(&[("X", "see [[Target]]")]);
    index.update(None).unwrap();
    assert_eq!(exists_level(&index, "Target"), Some(PageExists::AsLink));

    layout.store_page(&name("Target"), "now real");
    index.update(None).unwrap();

    assert_eq!(exists_level(&index, "Target"), Some(PageExists::HasContent));
    assert_eq!(
        link_pairs(&index),
        vec![("X".to_string(), "Target".to_string())]
    );
}

#[test]
fn deleting_linked_page_leaves_placeholder() {
    let (layout, index) = memory_fixture(&[("A", "see [[C]]"), ("C", "content")]);
    index.update(None).unwrap();
    assert_eq!(exists_level(&index, "C"), Some(PageExists::HasContent));

    layout.remove_page(&name("C"));
    index.on_delete_page(&name("C")).unwrap();

    // A still links to C, so a placeholder row is kept.
    assert_eq!(exists_level(&index, "C"), Some(PageExists::AsLink));
    assert_eq!(
        link_pairs(&index),
        vec![("A".to_string(), "C".to_string())]
    );
}

#[test]
fn current_page_placeholder_roundtrip() {
    let (_layout, index) = memory_fixture(&[("Home", "start")]);
    index.update(None).unwrap();

    let added = SignalLog::new();
    added.attach(&index, SIGNAL_PAGE_ADDED);

    index
        .touch_current_page_placeholder(&name("Drafts:New"))
        .unwrap();
    assert_eq!(exists_level(&index, "Drafts:New"), Some(PageExists::AsLink));
    assert_eq!(exists_level(&index, "Drafts"), Some(PageExists::AsLink));
    assert!(added.contains(SIGNAL_PAGE_ADDED, "Drafts:New"));

    // Moving on to another page drops the previous marker.
    index
        .touch_current_page_placeholder(&name("Elsewhere"))
        .unwrap();
    assert_eq!(exists_level(&index, "Drafts:New"), None);
    assert_eq!(exists_level(&index, "Drafts"), None);
    assert_eq!(exists_level(&index, "Elsewhere"), Some(PageExists::AsLink));
}

#[test]
fn current_page_placeholder_is_noop_for_existing_page() {
    let (_layout, index) = memory_fixture(&[("Home", "start")]);
    index.update(None).unwrap();

    index.touch_current_page_placeholder(&name("Home")).unwrap();

    assert_eq!(exists_level(&index, "Home"), Some(PageExists::HasContent));
    // No synthetic link was needed.
    let root_links: i64 = index
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT count(*) FROM links WHERE source=?1",
                [notedex::index::ROOT_ID],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(root_links, 0);
}

#[test]
fn relative_links_resolve_within_namespace() {
    let (_layout, index) = memory_fixture(&[
        ("Proj:Sub:One", "see [[Two]]"),
        ("Proj:Sub:Two", "up to [[One]] and [[+Deep]]"),
    ]);
    index.update(None).unwrap();

    let pairs = link_pairs(&index);
    assert!(pairs.contains(&("Proj:Sub:One".to_string(), "Proj:Sub:Two".to_string())));
    assert!(pairs.contains(&("Proj:Sub:Two".to_string(), "Proj:Sub:One".to_string())));
    // "+Deep" resolves below the source page and creates a placeholder.
    assert!(pairs.contains(&("Proj:Sub:Two".to_string(), "Proj:Sub:Two:Deep".to_string())));
    assert_eq!(
        exists_level(&index, "Proj:Sub:Two:Deep"),
        Some(PageExists::AsLink)
    );
}

#[test]
fn absolute_links_resolve_from_root() {
    let (_layout, index) = memory_fixture(&[
        ("Deep:Nested:Page", "see [[:Top]]"),
        ("Top", "content"),
        ("Deep:Top", "decoy"),
    ]);
    index.update(None).unwrap();

    assert!(link_pairs(&index)
        .contains(&("Deep:Nested:Page".to_string(), "Top".to_string())));
}
