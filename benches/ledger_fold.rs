//! Ledger Fold Benchmarks
//!
//! Cost of folding delivery outcomes into site item rows, per event and per batch.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use publisher_core::ledger::{fold_site_item, LedgerDecision, LedgerEvent};
use publisher_core::models::{
    ItemOutcome, ItemStatus, Operation, PublishItem, SiteItem, SiteItemKey,
};

fn outcome(job_id: i64, reference_id: i64, content_id: i64, operation: Operation) -> ItemOutcome {
    ItemOutcome::new(
        PublishItem {
            reference_id,
            job_id,
            site_id: 1,
            pub_server_id: None,
            content_id,
            revision_id: 1,
            folder_id: Some(10),
            template_id: Some(500),
            delivery_context_id: 1,
            assembly_context_id: None,
            operation,
            location: Some(format!("/{content_id}.html")),
            delivery_type: Some("filesystem".to_string()),
            unpublish_ref_id: None,
            unpublish_info: None,
        },
        ItemStatus::Success,
    )
}

fn benchmark_single_fold(c: &mut Criterion) {
    let now = Utc::now();
    let publish = LedgerEvent::from_outcome(&outcome(1, 1, 42, Operation::Publish), now, now);
    let live = match fold_site_item(None, &publish) {
        LedgerDecision::Write(row) => row,
        LedgerDecision::Unchanged(reason) => panic!("publish did not write: {reason:?}"),
    };
    let later = now + Duration::minutes(1);
    let unpublish =
        LedgerEvent::from_outcome(&outcome(2, 2, 42, Operation::Unpublish), later, later);
    let straggler = LedgerEvent::from_outcome(
        &outcome(0, 3, 42, Operation::Publish),
        now - Duration::minutes(1),
        later,
    );

    c.bench_function("fold_new_row", |b| {
        b.iter(|| fold_site_item(black_box(None), black_box(&publish)))
    });
    c.bench_function("fold_tombstone", |b| {
        b.iter(|| fold_site_item(black_box(Some(&live)), black_box(&unpublish)))
    });
    c.bench_function("fold_stale_straggler", |b| {
        b.iter(|| fold_site_item(black_box(Some(&live)), black_box(&straggler)))
    });
}

fn benchmark_batch_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold_batch");
    let now = Utc::now();

    for size in [100_i64, 1_000, 10_000] {
        // Half the batch republishes content the first half already wrote
        let events: Vec<LedgerEvent> = (0..size)
            .map(|i| {
                let started = now + Duration::seconds(i);
                LedgerEvent::from_outcome(
                    &outcome(i, i, i % (size / 2), Operation::Publish),
                    started,
                    started,
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let mut ledger: HashMap<SiteItemKey, SiteItem> = HashMap::new();
                for event in events {
                    let key = event.key();
                    if let LedgerDecision::Write(row) = fold_site_item(ledger.get(&key), event) {
                        ledger.insert(key, row);
                    }
                }
                black_box(ledger.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_single_fold, benchmark_batch_fold);
criterion_main!(benches);
