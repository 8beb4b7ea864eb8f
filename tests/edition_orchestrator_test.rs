//! Edition runs: task phases, content lists, cancellation and recovery.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::builders::{live_site_item, Harness, SITE};
use common::fakes::{
    CountingTask, FailingGenerator, FailingTask, FixedHealthCheck, RecordingAssembly,
};
use publisher_core::config::RecoveryPolicy;
use publisher_core::extensions::{
    ContentGenerator, EditionTask, NoopEditionTask, TemplateMapExpander,
};
use publisher_core::models::{ItemStatus, NewContentList, Operation};
use publisher_core::orchestration::EditionOrchestrator;
use publisher_core::repository::TargetHealthCheck;
use publisher_core::{EndingState, ExtensionRegistry};
use tokio_test::{assert_err, assert_ok};

fn with_task_extensions(counting: Arc<CountingTask>) -> impl FnOnce(&ExtensionRegistry) {
    move |registry: &ExtensionRegistry| {
        let failing = Arc::new(FailingTask) as Arc<dyn EditionTask>;
        registry.register_edition_task_instance("failing", failing);
        registry.register_edition_task_instance("counting", counting as Arc<dyn EditionTask>);
        registry.register_generator_instance(
            "broken_generator",
            Arc::new(FailingGenerator) as Arc<dyn ContentGenerator>,
        );
    }
}

#[tokio::test]
async fn test_failing_gate_pre_task_aborts_edition() {
    let counting = Arc::new(CountingTask::default());
    let harness = Harness::builder()
        .registry(with_task_extensions(Arc::clone(&counting)))
        .build();
    harness.seed_items(&[1, 2]);
    let edition = harness.edition("gated").await;
    let list = harness.selected_list("front_page", &[1, 2]).await;
    harness.attach(&edition, &list, 1).await;
    let gate = harness.task(&edition, -1, "failing", false).await;
    harness.task(&edition, 1, "counting", true).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Aborted);
    assert!(report.abort_reason.is_some());
    assert_eq!(report.content_lists_run(), 0);
    assert!(report.post_tasks_skipped);
    assert_eq!(counting.calls(), 0);
    assert!(harness.assembly.items().is_empty());

    let logs = assert_ok!(harness.tracker().find_task_logs(report.job_id).await);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].task_id, gate.task_id);
    assert!(!logs[0].success);

    let status = harness
        .tracker()
        .find_pub_status(report.job_id)
        .await
        .unwrap()
        .expect("job status exists");
    assert_eq!(status.ending_state, EndingState::Aborted);
    assert!(status.end_date.is_some());
}

#[tokio::test]
async fn test_post_tasks_run_after_gate_when_configured() {
    let counting = Arc::new(CountingTask::default());
    let harness = Harness::builder()
        .config(|config| config.orchestration.post_tasks_on_abort = true)
        .registry(with_task_extensions(Arc::clone(&counting)))
        .build();
    let edition = harness.edition("cleanup_after_abort").await;
    harness.task(&edition, -1, "failing", false).await;
    harness.task(&edition, 1, "counting", true).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Aborted);
    assert!(!report.post_tasks_skipped);
    assert_eq!(counting.calls(), 1);
}

#[tokio::test]
async fn test_tolerated_pre_task_failure_lets_edition_finish() {
    let counting = Arc::new(CountingTask::default());
    let harness = Harness::builder()
        .registry(with_task_extensions(Arc::clone(&counting)))
        .build();
    harness.seed_items(&[1]);
    let edition = harness.edition("tolerant").await;
    let list = harness.selected_list("single", &[1]).await;
    harness.attach(&edition, &list, 1).await;
    harness.task(&edition, -2, "failing", true).await;
    harness.task(&edition, -1, "counting", false).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::CompletedWithFailure);
    assert_eq!(report.pre_tasks.results.len(), 2);
    assert!(!report.pre_tasks.is_gated());
    assert_eq!(counting.calls(), 1);
    assert_eq!(report.items_dispatched, 1);
}

#[tokio::test]
async fn test_successful_edition_completes_and_counts_deliveries() {
    let harness = Harness::new();
    harness.seed_items(&[1, 2, 3]);
    let edition = harness.edition("nightly").await;
    let first = harness.selected_list("first", &[1, 2]).await;
    let second = harness.selected_list("second", &[3]).await;
    harness.attach(&edition, &second, 2).await;
    harness.attach(&edition, &first, 1).await;
    harness.task(&edition, 1, NoopEditionTask::NAME, true).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Completed);
    assert_eq!(
        report
            .content_lists
            .iter()
            .map(|list| list.content_list_name.clone().unwrap_or_default())
            .collect::<Vec<_>>(),
        vec!["first".to_string(), "second".to_string()]
    );
    assert_eq!(report.items_dispatched, 3);
    assert_eq!(report.post_tasks.results.len(), 1);
    assert_eq!(harness.assembly.batches(), 2);

    let dispatched = assert_ok!(harness.tracker().find_pub_item_status(report.job_id).await);
    assert_eq!(dispatched.len(), 3);
    assert!(dispatched.iter().all(|row| row.status == ItemStatus::Undefined));

    // Delivery callbacks arrive after the job finished
    let summary = assert_ok!(harness.deliver_job(report.job_id, ItemStatus::Success).await);
    assert_eq!(summary.ledger_rows_written, 3);
    let counts = assert_ok!(harness.tracker().update_counts(report.job_id).await);
    assert_eq!(counts.delivered, 3);
    assert_eq!(harness.store.ledger_len(), 3);
}

#[tokio::test]
async fn test_failed_list_continues_when_edition_tolerates_failures() {
    let harness = Harness::builder()
        .registry(with_task_extensions(Arc::new(CountingTask::default())))
        .build();
    harness.seed_items(&[1]);
    let edition = harness.edition("tolerant_lists").await;
    let broken = assert_ok!(
        harness
            .service
            .create_content_list(NewContentList::pipeline(
                "broken",
                "broken_generator",
                TemplateMapExpander::NAME
            ))
            .await
    );
    let healthy = harness.selected_list("healthy", &[1]).await;
    harness.attach(&edition, &broken, 1).await;
    harness.attach(&edition, &healthy, 2).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::CompletedWithFailure);
    assert_eq!(report.content_lists_run(), 2);
    assert_eq!(report.content_list_failures(), 1);
    assert_eq!(
        report.content_lists[0].error_code.as_deref(),
        Some("GENERATOR_MALFUNCTION")
    );
    assert_eq!(report.items_dispatched, 1);
}

#[tokio::test]
async fn test_failed_list_aborts_strict_edition() {
    let counting = Arc::new(CountingTask::default());
    let harness = Harness::builder()
        .registry(with_task_extensions(Arc::clone(&counting)))
        .build();
    harness.seed_items(&[1]);
    let mut edition = harness.edition("strict_lists").await;
    edition.continue_on_failure = false;
    assert_ok!(harness.service.save_edition(&edition).await);

    let broken = assert_ok!(
        harness
            .service
            .create_content_list(NewContentList::pipeline(
                "broken",
                "broken_generator",
                TemplateMapExpander::NAME
            ))
            .await
    );
    let healthy = harness.selected_list("healthy", &[1]).await;
    harness.attach(&edition, &broken, 1).await;
    harness.attach(&edition, &healthy, 2).await;
    harness.task(&edition, 1, "counting", true).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Aborted);
    assert_eq!(report.content_lists_run(), 1);
    assert!(harness.assembly.items().is_empty());
    // Post-tasks still run after a content list abort
    assert_eq!(counting.calls(), 1);
}

#[tokio::test]
async fn test_abort_cancels_items_dispatched_by_earlier_lists() {
    let harness = Harness::builder()
        .registry(with_task_extensions(Arc::new(CountingTask::default())))
        .build();
    harness.seed_items(&[1, 2]);
    let mut edition = harness.edition("strict_after_dispatch").await;
    edition.continue_on_failure = false;
    assert_ok!(harness.service.save_edition(&edition).await);

    let healthy = harness.selected_list("healthy_first", &[1, 2]).await;
    let broken = assert_ok!(
        harness
            .service
            .create_content_list(NewContentList::pipeline(
                "broken_second",
                "broken_generator",
                TemplateMapExpander::NAME
            ))
            .await
    );
    harness.attach(&edition, &healthy, 1).await;
    harness.attach(&edition, &broken, 2).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Aborted);
    assert_eq!(report.items_dispatched, 2);
    let rows = assert_ok!(harness.tracker().find_pub_item_status(report.job_id).await);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.status == ItemStatus::Cancelled));
    assert_eq!(harness.store.ledger_len(), 0);
}

#[tokio::test]
async fn test_cancel_stops_dispatch_and_cancels_unfinished_items() {
    let harness = Harness::builder()
        .assembly(RecordingAssembly::gated())
        .build();
    harness.seed_items(&[1, 2, 3, 4]);
    let edition = harness.edition("cancel_me").await;
    let list = harness.selected_list("four", &[1, 2, 3, 4]).await;
    harness.attach(&edition, &list, 1).await;

    let spawned = assert_ok!(harness.service.spawn_edition(edition.edition_id).await);
    harness.assembly.entered.notified().await;

    assert!(assert_ok!(harness.service.cancel_job(spawned.job_id).await));
    harness.assembly.release(10);

    let report = assert_ok!(spawned.handle.await.expect("edition task joined"));
    assert_eq!(report.ending_state, EndingState::CanceledByUser);
    assert!(report.post_tasks_skipped);

    let rows = assert_ok!(harness.tracker().find_pub_item_status(spawned.job_id).await);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.status == ItemStatus::Cancelled));
    assert_eq!(harness.store.ledger_len(), 0);

    // A finished job cannot be cancelled again
    assert!(!assert_ok!(harness.service.cancel_job(spawned.job_id).await));
    assert_eq!(harness.service.orchestrator().active_job(edition.edition_id), None);
}

#[tokio::test]
async fn test_second_run_of_active_edition_is_rejected() {
    let harness = Harness::builder()
        .assembly(RecordingAssembly::gated())
        .build();
    harness.seed_items(&[1]);
    let edition = harness.edition("busy").await;
    let list = harness.selected_list("one", &[1]).await;
    harness.attach(&edition, &list, 1).await;

    let spawned = assert_ok!(harness.service.spawn_edition(edition.edition_id).await);
    harness.assembly.entered.notified().await;

    let error = assert_err!(harness.service.run_edition(edition.edition_id).await);
    assert_eq!(error.code(), "ALREADY_RUNNING");
    let delete_error = assert_err!(harness.service.delete_edition(edition.edition_id).await);
    assert_eq!(delete_error.code(), "ALREADY_RUNNING");

    harness.assembly.release(1);
    let report = assert_ok!(spawned.handle.await.expect("edition task joined"));
    assert_eq!(report.ending_state, EndingState::Completed);

    let running = assert_ok!(harness.tracker().find_running_jobs(Some(edition.edition_id)).await);
    assert!(running.is_empty());
}

#[tokio::test]
async fn test_unknown_edition_is_edition_missing() {
    let harness = Harness::new();
    let error = assert_err!(harness.service.run_edition(404).await);
    assert_eq!(error.code(), "EDITION_MISSING");
}

#[tokio::test]
async fn test_automatic_edition_unpublishes_before_publishing() {
    let harness = Harness::new();
    harness.seed_items(&[1, 2]);
    // Item 2 was moved out of the site's folder tree since its last publish
    harness.repository.move_item(2, 99);
    let earlier = Utc::now() - chrono::Duration::hours(1);
    harness.store.insert_site_item(live_site_item(70, 2, Some(10), earlier));

    let edition = harness.automatic_edition("auto").await;
    let list = harness.selected_list("remaining", &[1]).await;
    harness.attach(&edition, &list, 1).await;

    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Completed);
    assert_eq!(report.unpublish_dispatched, 1);
    let items = harness.assembly.items_for_job(report.job_id);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].operation, Operation::Unpublish);
    assert_eq!(items[0].unpublish_ref_id, Some(70));
    assert_eq!(items[1].operation, Operation::Publish);

    assert_ok!(harness.deliver_job(report.job_id, ItemStatus::Success).await);
    let counts = assert_ok!(harness.tracker().update_counts(report.job_id).await);
    assert_eq!(counts.removed, 1);
    assert_eq!(counts.delivered, 1);
    let live = assert_ok!(harness.tracker().find_live_site_items(2, None).await);
    assert!(live.is_empty());
}

#[tokio::test]
async fn test_serverless_automatic_edition_leaves_other_servers_alone() {
    let harness = Harness::new();
    let mut remote = live_site_item(80, 42, Some(10), Utc::now() - chrono::Duration::hours(1));
    remote.pub_server_id = Some(9);
    harness.store.insert_site_item(remote);

    let edition = harness.automatic_edition("auto_local").await;
    let report = assert_ok!(harness.service.run_edition(edition.edition_id).await);

    assert_eq!(report.ending_state, EndingState::Completed);
    assert_eq!(report.unpublish_dispatched, 0);
    assert!(harness.assembly.items_for_job(report.job_id).is_empty());
}

#[tokio::test]
async fn test_orphaned_jobs_are_aborted_on_startup() {
    let harness = Harness::new();
    let edition = harness.edition("crashed").await;
    let tracker = harness.tracker();
    let job_id = assert_ok!(tracker.allocate_job_id().await);
    assert_ok!(
        tracker
            .init_publishing_status(job_id, Utc::now(), edition.edition_id, None)
            .await
    );

    // A restarted process sharing the store finds the job without an owner
    let restarted = Harness::builder().store(Arc::clone(&harness.store)).build();
    let recovered = assert_ok!(restarted.service.orchestrator().initialize().await);

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].job_id, job_id);
    assert_eq!(recovered[0].ending_state, EndingState::Aborted);
    assert!(assert_ok!(restarted.tracker().find_running_jobs(None).await).is_empty());
}

#[tokio::test]
async fn test_health_check_policy_marks_unreachable_targets_for_restart() {
    let harness = Harness::builder()
        .config(|config| config.recovery.policy = RecoveryPolicy::HealthCheck)
        .build();
    let edition = harness.edition("offline_target").await;
    let tracker = harness.tracker();
    let job_id = assert_ok!(tracker.allocate_job_id().await);
    assert_ok!(
        tracker
            .init_publishing_status(job_id, Utc::now(), edition.edition_id, None)
            .await
    );

    let unreachable = Arc::new(FixedHealthCheck { reachable: false }) as Arc<dyn TargetHealthCheck>;
    let orchestrator: EditionOrchestrator = harness
        .service
        .orchestrator()
        .clone()
        .with_target_check(unreachable);
    let recovered = assert_ok!(orchestrator.recover_orphaned_jobs().await);

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].ending_state, EndingState::RestartNeeded);
}

#[tokio::test]
async fn test_concurrent_editions_run_independently() {
    let harness = Harness::new();
    harness.seed_items(&[1, 2]);
    let left = harness.edition("left").await;
    let right = harness.edition("right").await;
    let left_list = harness.selected_list("left_list", &[1]).await;
    let right_list = harness.selected_list("right_list", &[2]).await;
    harness.attach(&left, &left_list, 1).await;
    harness.attach(&right, &right_list, 1).await;

    let (a, b) = tokio::join!(
        harness.service.run_edition(left.edition_id),
        harness.service.run_edition(right.edition_id)
    );
    let (a, b) = (assert_ok!(a), assert_ok!(b));

    assert_ne!(a.job_id, b.job_id);
    assert_eq!(a.ending_state, EndingState::Completed);
    assert_eq!(b.ending_state, EndingState::Completed);
    assert!(harness.service.orchestrator().active_job_ids().is_empty());
}
