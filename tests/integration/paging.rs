use msgstore::core::MessageReference;
use msgstore::storage::PagingController;

use crate::fixture::{TestStore, reference};

fn ids(infos: &[msgstore::core::ReferenceInfo]) -> Vec<i64> {
    infos.iter().map(|info| info.message_id).collect()
}

#[test]
fn shrink_then_grow_across_restarts() {
    let fixture = TestStore::new();
    {
        let store = fixture.open();
        let refs: Vec<MessageReference> = (1..=10).map(|id| reference(&store, id, true)).collect();
        store.ledger().add_references(1, &refs).unwrap();

        let loaded = store.paging().get_initial_reference_infos(1, 4).unwrap();
        assert_eq!(ids(&loaded.refs), vec![1, 2, 3, 4]);
        assert_eq!(loaded.min_page_ordering(), Some(0));
        assert_eq!(loaded.max_page_ordering(), Some(5));
    }

    let store = fixture.open();
    let paging: &PagingController = store.paging();
    let again = paging.get_initial_reference_infos(1, 4).unwrap();
    assert_eq!(ids(&again.refs), vec![1, 2, 3, 4]);

    let grown = paging.get_initial_reference_infos(1, 7).unwrap();
    assert_eq!(ids(&grown.refs), vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(grown.min_page_ordering(), Some(3));
    assert_eq!(grown.max_page_ordering(), Some(5));

    let paged = paging.get_paged_reference_infos(1, 3, 3).unwrap();
    assert_eq!(ids(&paged), vec![8, 9, 10]);
}

#[test]
fn depaging_clears_window_slice() {
    let fixture = TestStore::new();
    let store = fixture.open();
    let refs: Vec<MessageReference> = (1..=6).map(|id| reference(&store, id, true)).collect();
    store.ledger().add_references(2, &refs).unwrap();
    store.paging().get_initial_reference_infos(2, 2).unwrap();

    store
        .paging()
        .update_reliable_references_not_paged_in_range(2, 0, 2)
        .unwrap();
    let loaded = store.paging().get_initial_reference_infos(2, 4).unwrap();
    assert_eq!(ids(&loaded.refs), vec![1, 2, 3, 4]);
    assert_eq!(loaded.min_page_ordering(), Some(2));
    assert_eq!(loaded.max_page_ordering(), Some(3));
}
