// SPDX-License-Identifier: MIT

//! Sync pipeline behavior against in-memory source and store doubles.
//!
//! All tests run with paused time so the pipeline's pacing delays and
//! backoff sleeps resolve instantly.

use country_tracker::models::{SyncMode, SyncState};
use country_tracker::services::{CountryResolver, SyncGuard, SyncPipeline};
use dashmap::DashMap;
use std::sync::Arc;

mod common;

use common::{raw_activity, track_polyline, MemoryStore, MockSource};

fn pipeline(source: MockSource, store: MemoryStore) -> SyncPipeline<MockSource, MemoryStore> {
    SyncPipeline::new(source, store, Arc::new(CountryResolver::offline()))
}

#[tokio::test(start_paused = true)]
async fn test_full_sync_stores_all_pages() {
    let source = MockSource::with_pages(vec![
        (1..=3).map(|i| raw_activity(i, "Morning Run", "Run")).collect(),
        vec![raw_activity(4, "Evening Ride", "Ride")],
    ]);
    let store = MemoryStore::new();

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    assert_eq!(run.fetched, 4);
    assert_eq!(run.stored, 4);
    assert_eq!(run.skipped, 0);
    assert!(run.finished_at.is_some());
    assert_eq!(store.stored_count(), 4);

    let stored = store.stored(1).unwrap();
    assert_eq!(stored.athlete_id, "42");
    assert_eq!(stored.country, "United States");
    assert_eq!(stored.distance_km, 10.0);
    assert_eq!(stored.duration, "01:00:00");
}

#[tokio::test(start_paused = true)]
async fn test_incremental_sync_skips_existing() {
    let source = MockSource::with_pages(vec![
        (1..=4).map(|i| raw_activity(i, "Run", "Run")).collect(),
    ]);
    let store = MemoryStore::new();

    // Pre-store IDs 1 and 2 by running a first sync over the same page.
    let first = MockSource::with_pages(vec![
        (1..=2).map(|i| raw_activity(i, "Run", "Run")).collect(),
    ]);
    pipeline(first, store.clone()).run("42", SyncMode::Full).await;
    assert_eq!(store.stored_count(), 2);

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Incremental)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    assert_eq!(run.fetched, 4);
    assert_eq!(run.stored, 2);
    assert_eq!(run.skipped, 2);
    assert_eq!(store.stored_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_virtual_activities_dropped_during_fetch() {
    let mut zwift = raw_activity(2, "Zwift intervals", "Run");
    zwift.name = "Zwift intervals".to_string();
    let mut trainer = raw_activity(3, "Base spin", "Ride");
    trainer.trainer = true;

    let source = MockSource::with_pages(vec![vec![
        raw_activity(1, "Outdoor run", "Run"),
        zwift,
        trainer,
    ]]);
    let store = MemoryStore::new();

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    // The fetch-phase filter drops both before they count as fetched.
    assert_eq!(run.fetched, 1);
    assert_eq!(store.stored_count(), 1);
    assert!(store.stored(1).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_and_short_tracks_excluded() {
    let mut rowing = raw_activity(1, "River session", "Rowing");
    rowing.sport_type = "Rowing".to_string();
    let mut short = raw_activity(2, "GPS hiccup", "Run");
    short.map.as_mut().unwrap().summary_polyline = Some(track_polyline(2));

    let source = MockSource::with_pages(vec![vec![
        rowing,
        short,
        raw_activity(3, "Proper run", "Run"),
    ]]);
    let store = MemoryStore::new();

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    assert_eq!(run.fetched, 3);
    assert_eq!(run.stored, 1);
    assert_eq!(store.stored_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batches_split_at_store_limit() {
    // 60 activities over two pages: expect batch writes of 25, 25, 10.
    let source = MockSource::with_pages(vec![
        (1..=50).map(|i| raw_activity(i, "Run", "Run")).collect(),
        (51..=60).map(|i| raw_activity(i, "Run", "Run")).collect(),
    ]);
    let store = MemoryStore::new();

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    assert_eq!(run.stored, 60);
    assert_eq!(store.batch_sizes(), vec![25, 25, 10]);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_batch_retried_with_backoff() {
    let source = MockSource::with_pages(vec![
        (1..=10).map(|i| raw_activity(i, "Run", "Run")).collect(),
    ]);
    let store = MemoryStore::new();
    // Two rejections still leave one attempt, so the run recovers.
    store.throttle_next_batches(2);

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Completed);
    assert_eq!(run.stored, 10);
    assert_eq!(store.stored_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_throttling_fails_the_run() {
    let source = MockSource::with_pages(vec![
        (1..=10).map(|i| raw_activity(i, "Run", "Run")).collect(),
    ]);
    let store = MemoryStore::new();
    store.throttle_next_batches(5);

    let run = pipeline(source, store.clone())
        .run("42", SyncMode::Full)
        .await;

    assert_eq!(run.state, SyncState::Failed);
    assert!(run.error.is_some());
    assert_eq!(store.stored_count(), 0);

    // The failure is durably recorded as the final run document.
    let recorded = store.recorded_runs();
    assert_eq!(recorded.last().unwrap().state, SyncState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_run_transitions_are_recorded() {
    let source = MockSource::with_pages(vec![vec![raw_activity(1, "Run", "Run")]]);
    let store = MemoryStore::new();

    pipeline(source, store.clone()).run("42", SyncMode::Full).await;

    let states: Vec<SyncState> = store.recorded_runs().iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            SyncState::Started,
            SyncState::Fetching,
            SyncState::Persisting,
            SyncState::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_summary_records_capped_at_twenty_points() {
    let mut long = raw_activity(1, "Long run", "Run");
    long.map.as_mut().unwrap().summary_polyline = Some(track_polyline(50));

    let source = MockSource::with_pages(vec![vec![long]]);
    let store = MemoryStore::new();

    pipeline(source, store.clone()).run("42", SyncMode::Full).await;

    assert_eq!(store.stored(1).unwrap().coordinates.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_detail_served_from_store_when_track_is_full() {
    let store = MemoryStore::new();

    // Seed a detail-grade record (more than 20 points).
    let mut detail_raw = raw_activity(7, "Run", "Run");
    detail_raw.map.as_mut().unwrap().polyline = Some(track_polyline(40));
    let p = pipeline(MockSource::with_details(vec![detail_raw]), store.clone());
    p.activity_detail("42", 7).await.unwrap();

    // A second lookup must not go upstream again.
    let source = MockSource::with_pages(vec![]);
    let p2 = pipeline(source.clone(), store.clone());
    let activity = p2.activity_detail("42", 7).await.unwrap().unwrap();

    assert_eq!(activity.coordinates.len(), 40);
    assert_eq!(source.detail_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detail_upgrades_summary_record() {
    let store = MemoryStore::new();

    // Sync stores the capped summary record first.
    let mut summary = raw_activity(9, "Run", "Run");
    summary.map.as_mut().unwrap().summary_polyline = Some(track_polyline(50));
    pipeline(
        MockSource::with_pages(vec![vec![summary]]),
        store.clone(),
    )
    .run("42", SyncMode::Full)
    .await;
    assert_eq!(store.stored(9).unwrap().coordinates.len(), 20);

    // Detail fetch replaces it with the full track.
    let mut detail_raw = raw_activity(9, "Run", "Run");
    detail_raw.map.as_mut().unwrap().polyline = Some(track_polyline(50));
    let source = MockSource::with_details(vec![detail_raw]);
    let p = pipeline(source.clone(), store.clone());

    let activity = p.activity_detail("42", 9).await.unwrap().unwrap();
    assert_eq!(source.detail_calls(), 1);
    assert_eq!(activity.coordinates.len(), 50);
    assert_eq!(store.stored(9).unwrap().coordinates.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_detail_of_excluded_activity_is_none() {
    let store = MemoryStore::new();
    let mut trainer = raw_activity(3, "Turbo session", "Ride");
    trainer.trainer = true;

    let p = pipeline(MockSource::with_details(vec![trainer]), store.clone());

    assert!(p.activity_detail("42", 3).await.unwrap().is_none());
    assert_eq!(store.stored_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detail_ignores_other_athletes_record() {
    let store = MemoryStore::new();

    // Athlete 99 owns a detail-grade record for this ID.
    let mut detail_raw = raw_activity(5, "Run", "Run");
    detail_raw.map.as_mut().unwrap().polyline = Some(track_polyline(30));
    pipeline(
        MockSource::with_details(vec![detail_raw.clone()]),
        store.clone(),
    )
    .activity_detail("99", 5)
    .await
    .unwrap();

    // Athlete 42's lookup must go upstream rather than serve 99's record.
    let source = MockSource::with_details(vec![detail_raw]);
    let p = pipeline(source.clone(), store.clone());
    let activity = p.activity_detail("42", 5).await.unwrap().unwrap();

    assert_eq!(source.detail_calls(), 1);
    assert_eq!(activity.athlete_id, "42");
}

#[tokio::test]
async fn test_sync_guard_excludes_overlapping_claims() {
    let active: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());

    let guard = SyncGuard::claim(Arc::clone(&active), "42".to_string()).unwrap();
    assert!(SyncGuard::claim(Arc::clone(&active), "42".to_string()).is_none());
    // Other athletes are unaffected.
    assert!(SyncGuard::claim(Arc::clone(&active), "99".to_string()).is_some());

    drop(guard);
    assert!(SyncGuard::claim(active, "42".to_string()).is_some());
}

#[tokio::test]
async fn test_sync_guard_released_when_task_panics() {
    let active: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
    let guard = SyncGuard::claim(Arc::clone(&active), "42".to_string()).unwrap();

    let handle = tokio::spawn(async move {
        let _guard = guard;
        panic!("sync body failed");
    });
    assert!(handle.await.is_err());

    // The slot must be free again after the panic.
    assert!(SyncGuard::claim(active, "42".to_string()).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_race_flag_from_workout_type_and_name() {
    let mut workout_race = raw_activity(1, "Intervals", "Run");
    workout_race.workout_type = Some(1);
    let name_race = raw_activity(2, "City Marathon Race", "Run");
    let plain = raw_activity(3, "Recovery jog", "Run");

    let source = MockSource::with_pages(vec![vec![workout_race, name_race, plain]]);
    let store = MemoryStore::new();

    pipeline(source, store.clone()).run("42", SyncMode::Full).await;

    assert!(store.stored(1).unwrap().is_race);
    assert!(store.stored(2).unwrap().is_race);
    assert!(!store.stored(3).unwrap().is_race);
}
