// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reconciliation scenarios against fake Fitbit/Strava sides.

mod common;

use chrono::{Duration, Utc};
use common::{at, register, run, FakeDestination, FakeSource};
use fitbit_strava_sync::db::{CredentialStore, MemoryStore};
use fitbit_strava_sync::models::{watermark_epoch, ActivityCategory, ActivityDescriptor};
use fitbit_strava_sync::services::{SyncEngine, SyncOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const HORIZON_HOURS: i64 = 72;

struct Harness {
    source: Arc<FakeSource>,
    destination: Arc<FakeDestination>,
    store: MemoryStore,
    engine: SyncEngine,
}

async fn harness(source: Arc<FakeSource>, destination: Arc<FakeDestination>) -> Harness {
    let store = MemoryStore::new();
    register(&store, "U1").await;
    let engine = SyncEngine::new(
        source.clone(),
        destination.clone(),
        Arc::new(store.clone()),
        Duration::hours(HORIZON_HOURS),
    );
    Harness {
        source,
        destination,
        store,
        engine,
    }
}

async fn watermark(store: &MemoryStore) -> chrono::DateTime<Utc> {
    store
        .get_watermark("U1")
        .await
        .unwrap()
        .unwrap()
        .last_synced_activity_time
}

#[tokio::test]
async fn new_activities_are_uploaded_and_watermark_advances() {
    let h = harness(
        FakeSource::with(vec![run(1, at(2, 8)), run(2, at(3, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Processed);
    assert_eq!(report.uploaded, 2);
    assert_eq!(h.destination.uploaded(), vec![1, 2]);
    assert_eq!(report.watermark, Some(at(3, 8)));
    assert_eq!(watermark(&h.store).await, at(3, 8));
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let h = harness(
        FakeSource::with(vec![run(1, at(2, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;
    h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();
    let windows_before = h.source.window_calls.load(Ordering::SeqCst);

    let report = h.engine.reconcile_at("U1", at(4, 13)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::AlreadySynced);
    assert_eq!(h.destination.uploaded(), vec![1]);
    assert_eq!(h.source.window_calls.load(Ordering::SeqCst), windows_before);
    assert_eq!(h.source.export_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn watermark_match_makes_no_detail_calls() {
    let h = harness(
        FakeSource::with(vec![run(1, at(2, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;
    h.store.advance_watermark("U1", at(2, 8)).await.unwrap();

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::AlreadySynced);
    assert_eq!(h.source.latest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.window_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.source.export_calls.load(Ordering::SeqCst), 0);
    assert!(h.destination.uploaded().is_empty());
}

#[tokio::test]
async fn partial_failure_still_advances_watermark() {
    let source = FakeSource::with(vec![run(1, at(2, 8)), run(2, at(3, 8))]);
    source.fail_export(2);
    let h = harness(source, FakeDestination::with_latest(None)).await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.destination.uploaded(), vec![1]);
    assert_eq!(watermark(&h.store).await, at(3, 8));
}

#[tokio::test]
async fn all_failures_leave_watermark_untouched() {
    let h = harness(
        FakeSource::with(vec![run(1, at(2, 8)), run(2, at(3, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;
    h.destination.rejecting.store(true, Ordering::SeqCst);

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Processed);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.watermark, None);
    assert_eq!(watermark(&h.store).await, watermark_epoch());
}

#[tokio::test]
async fn ineligible_activities_are_skipped() {
    let manual = ActivityDescriptor {
        is_tracker_recorded: false,
        ..run(1, at(2, 8))
    };
    let indoor = ActivityDescriptor {
        has_positional_data: false,
        ..run(2, at(2, 9))
    };
    let yoga = ActivityDescriptor {
        category: ActivityCategory::Other("Yoga".to_string()),
        ..run(3, at(2, 10))
    };
    let h = harness(
        FakeSource::with(vec![manual, indoor, yoga, run(4, at(2, 11))]),
        FakeDestination::with_latest(None),
    )
    .await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.skipped, 3);
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.destination.uploaded(), vec![4]);
    assert_eq!(h.source.export_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn only_skipped_activities_leave_watermark_untouched() {
    let indoor = ActivityDescriptor {
        has_positional_data: false,
        ..run(1, at(2, 8))
    };
    let h = harness(
        FakeSource::with(vec![indoor]),
        FakeDestination::with_latest(None),
    )
    .await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(watermark(&h.store).await, watermark_epoch());
}

#[tokio::test]
async fn activities_already_on_destination_are_not_reuploaded() {
    let h = harness(
        FakeSource::with(vec![run(1, at(3, 7)), run(2, at(3, 9))]),
        FakeDestination::with_latest(Some(at(3, 8))),
    )
    .await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(h.destination.uploaded(), vec![2]);
}

#[tokio::test]
async fn activities_older_than_horizon_are_ignored() {
    let now = at(10, 12);
    let old = now - Duration::hours(HORIZON_HOURS + 1);
    let recent = now - Duration::hours(1);
    let h = harness(
        FakeSource::with(vec![run(1, old), run(2, recent)]),
        FakeDestination::with_latest(None),
    )
    .await;

    let report = h.engine.reconcile_at("U1", now).await.unwrap();

    assert_eq!(h.destination.uploaded(), vec![2]);
    assert_eq!(report.watermark, Some(recent));
}

#[tokio::test]
async fn unavailable_source_ends_pass_quietly() {
    let source = FakeSource::with(vec![run(1, at(2, 8))]);
    source.unavailable.store(true, Ordering::SeqCst);
    let h = harness(source, FakeDestination::with_latest(None)).await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::SourceUnavailable);
    assert_eq!(h.source.window_calls.load(Ordering::SeqCst), 0);
    assert_eq!(watermark(&h.store).await, watermark_epoch());
}

#[tokio::test]
async fn user_without_activities_has_nothing_to_do() {
    let h = harness(FakeSource::with(vec![]), FakeDestination::with_latest(None)).await;

    let report = h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::NoActivity);
}

#[tokio::test]
async fn unregistered_user_is_reported_without_provider_calls() {
    let h = harness(
        FakeSource::with(vec![run(1, at(2, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;

    let report = h.engine.reconcile_at("nobody", at(4, 12)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::NotRegistered);
    assert_eq!(h.source.latest_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn watermark_is_monotonic_across_passes() {
    let h = harness(
        FakeSource::with(vec![run(1, at(3, 8))]),
        FakeDestination::with_latest(None),
    )
    .await;
    h.engine.reconcile_at("U1", at(4, 12)).await.unwrap();
    assert_eq!(watermark(&h.store).await, at(3, 8));

    // A late-arriving activity that starts before the watermark
    h.source.push(run(2, at(2, 8)));
    h.source.push(run(3, at(3, 10)));
    *h.destination.latest.lock().unwrap() = Some(at(3, 8));

    let report = h.engine.reconcile_at("U1", at(4, 13)).await.unwrap();

    assert_eq!(h.destination.uploaded(), vec![1, 3]);
    assert_eq!(report.watermark, Some(at(3, 10)));
    assert!(!h.store.advance_watermark("U1", at(3, 9)).await.unwrap());
    assert_eq!(watermark(&h.store).await, at(3, 10));
}

#[tokio::test]
async fn local_dispatcher_runs_pass_in_background() {
    use fitbit_strava_sync::services::{LocalDispatcher, SyncUserPayload, TaskDispatcher};

    let now = Utc::now();
    let source = FakeSource::with(vec![run(1, now - Duration::hours(1))]);
    let destination = FakeDestination::with_latest(None);
    let h = harness(source, destination).await;
    let dispatcher = LocalDispatcher::new(Arc::new(h.engine.clone()), 1);

    dispatcher
        .dispatch_sync(SyncUserPayload {
            user_id: "U1".to_string(),
        })
        .await
        .unwrap();

    for _ in 0..100 {
        if !h.destination.uploaded().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(h.destination.uploaded(), vec![1]);
}
