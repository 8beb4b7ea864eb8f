//! Unpublish resolution over the site item ledger.

mod common;

use chrono::Utc;
use common::builders::{live_site_item, Harness, CONTEXT, SITE, TEMPLATE};
use publisher_core::constants::FOLDER_MOVED_SENTINEL;
use publisher_core::models::{ItemStatus, Operation};
use publisher_core::unpublish::{UnpublishReason, UnpublishRequest};
use tokio_test::assert_ok;

/// Items 1..=3 live in site folder 10
fn seeded() -> Harness {
    let harness = Harness::new();
    harness.seed_items(&[1, 2, 3]);
    let now = Utc::now();
    for (reference_id, content_id) in [(11, 1), (12, 2), (13, 3)] {
        harness
            .store
            .insert_site_item(live_site_item(reference_id, content_id, Some(10), now));
    }
    harness
}

#[tokio::test]
async fn test_nothing_to_unpublish_when_site_is_consistent() {
    let harness = seeded();
    let request = UnpublishRequest::for_site(SITE, None);
    assert!(assert_ok!(harness.service.resolver().resolve(&request).await).is_empty());
}

#[tokio::test]
async fn test_item_removed_from_folder_is_resolved() {
    let harness = seeded();
    harness.repository.move_item(2, 10_000);

    let request = UnpublishRequest::for_site(SITE, None);
    let candidates = assert_ok!(harness.service.resolver().resolve_candidates(&request).await);

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].reference_id(), 12);
    assert_eq!(candidates[0].reason, UnpublishReason::NotInFolderTree);
}

#[tokio::test]
async fn test_resolution_is_deterministic_and_ordered() {
    let harness = seeded();
    harness.repository.remove_item(3);
    harness.repository.set_flag(1, "U");

    let request = UnpublishRequest::for_site(SITE, None);
    let resolver = harness.service.resolver();
    let first = assert_ok!(resolver.resolve(&request).await);
    let second = assert_ok!(resolver.resolve(&request).await);

    assert_eq!(first, vec![11, 13]);
    assert_eq!(first, second);

    let candidates = assert_ok!(resolver.resolve_candidates(&request).await);
    assert_eq!(candidates[0].reason, UnpublishReason::RetiredFlag);
    assert_eq!(candidates[1].reason, UnpublishReason::ContentMissing);
}

#[tokio::test]
async fn test_request_flags_replace_configured_flags() {
    let harness = seeded();
    harness.repository.set_flag(2, "x");

    let resolver = harness.service.resolver();
    let default_request = UnpublishRequest::for_site(SITE, None);
    assert!(assert_ok!(resolver.resolve(&default_request).await).is_empty());

    let archive_request = UnpublishRequest::for_site(SITE, None).with_flags(["x"]);
    assert_eq!(assert_ok!(resolver.resolve(&archive_request).await), vec![12]);

    let via_service = assert_ok!(
        harness
            .service
            .find_unpublish_candidates(SITE, None, Some(vec!["x".to_string()]))
            .await
    );
    assert_eq!(via_service.len(), 1);
}

#[tokio::test]
async fn test_moved_folder_sentinel_forces_unpublish() {
    let harness = seeded();
    let resolver = harness.service.resolver();

    let marked = assert_ok!(resolver.mark_folder_ids_for_moved_folders(&[10]).await);
    assert_eq!(marked, 3);
    let live = assert_ok!(harness.tracker().find_live_site_items(1, None).await);
    assert_eq!(live[0].folder_id, Some(FOLDER_MOVED_SENTINEL));

    let candidates = assert_ok!(
        resolver
            .resolve_candidates(&UnpublishRequest::for_site(SITE, None))
            .await
    );
    assert_eq!(candidates.len(), 3);
    assert!(candidates
        .iter()
        .all(|candidate| candidate.reason == UnpublishReason::FolderMoved));
    assert_eq!(assert_ok!(resolver.mark_folder_ids_for_moved_folders(&[]).await), 0);
}

#[tokio::test]
async fn test_tombstones_and_other_sites_are_ignored() {
    let harness = seeded();
    harness.repository.remove_item(1);
    harness.repository.remove_item(2);

    let mut tombstone = live_site_item(14, 2, Some(10), Utc::now());
    tombstone.location = Some("/2/old".to_string());
    tombstone.operation = Operation::Unpublish;
    harness.store.insert_site_item(tombstone);

    let mut elsewhere = live_site_item(15, 1, Some(10), Utc::now());
    elsewhere.site_id = SITE + 1;
    harness.store.insert_site_item(elsewhere);

    let resolved = assert_ok!(
        harness
            .service
            .resolver()
            .resolve(&UnpublishRequest::for_site(SITE, None))
            .await
    );
    assert_eq!(resolved, vec![11, 12]);
}

#[tokio::test]
async fn test_find_unpublish_info_returns_newest_live_rendition() {
    let harness = seeded();
    let resolver = harness.service.resolver();

    let info = assert_ok!(
        resolver
            .find_unpublish_info(2, CONTEXT, Some(TEMPLATE), SITE, None, None)
            .await
    )
    .expect("item 2 is live");
    assert_eq!(info.reference_id, 12);
    assert_eq!(info.folder_id, Some(10));
    assert_eq!(info.delivery_type.as_deref(), Some("filesystem"));
    assert!(info.unpublish_data.is_some());

    let missing = assert_ok!(
        resolver
            .find_unpublish_info(2, CONTEXT, Some(TEMPLATE), SITE, None, Some("/elsewhere"))
            .await
    );
    assert!(missing.is_none());

    let mut removed = live_site_item(20, 3, Some(10), Utc::now());
    removed.status = ItemStatus::Success;
    removed.operation = Operation::Unpublish;
    harness.store.insert_site_item(removed);
    assert!(assert_ok!(
        resolver
            .find_unpublish_info(3, CONTEXT, Some(TEMPLATE), SITE, None, None)
            .await
    )
    .is_none());
}

#[tokio::test]
async fn test_resolution_is_scoped_to_the_requested_server() {
    let harness = Harness::new();
    let mut remote = live_site_item(42, 42, Some(10), Utc::now());
    remote.pub_server_id = Some(9);
    harness.store.insert_site_item(remote);

    let resolver = harness.service.resolver();
    let serverless = assert_ok!(resolver.resolve(&UnpublishRequest::for_site(SITE, None)).await);
    assert!(serverless.is_empty());

    let server_nine =
        assert_ok!(resolver.resolve(&UnpublishRequest::for_site(SITE, Some(9))).await);
    assert_eq!(server_nine, vec![42]);
}
