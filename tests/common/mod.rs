// SPDX-License-Identifier: MIT

use country_tracker::config::Config;
use country_tracker::db::{ActivityFilter, ActivityStore, FirestoreDb};
use country_tracker::error::AppError;
use country_tracker::models::{Activity, SyncRun};
use country_tracker::routes::create_router;
use country_tracker::services::strava::{StravaActivity, StravaMap};
use country_tracker::services::sync::ActivitySource;
use country_tracker::services::{CountryResolver, StravaService};
use country_tracker::AppState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

/// Create a test app with offline mock dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    create_app_with_db(test_db_offline())
}

/// Create a test app backed by the Firestore emulator.
#[allow(dead_code)]
pub async fn create_emulator_app() -> (axum::Router, Arc<AppState>) {
    create_app_with_db(test_db().await)
}

#[allow(dead_code)]
fn create_app_with_db(db: FirestoreDb) -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();

    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let strava = StravaService::new(
        config.strava_client_id.clone(),
        config.strava_client_secret.clone(),
        db.clone(),
        token_cache,
        refresh_locks,
    );

    let state = Arc::new(AppState {
        config,
        db,
        strava,
        resolver: Arc::new(CountryResolver::offline()),
        active_syncs: Arc::new(dashmap::DashMap::new()),
    });

    (create_router(state.clone()), state)
}

/// In-memory activity store for exercising the sync pipeline.
///
/// Records the size of every batch write and can be told to reject the
/// next N batch calls with a throughput error.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    activities: Mutex<HashMap<u64, Activity>>,
    runs: Mutex<Vec<SyncRun>>,
    batch_sizes: Mutex<Vec<usize>>,
    throttle_next: AtomicU32,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a stored activity.
    pub fn seed(&self, activity: Activity) {
        self.inner
            .activities
            .lock()
            .unwrap()
            .insert(activity.id, activity);
    }

    /// Reject the next `n` batch writes with a throughput error.
    pub fn throttle_next_batches(&self, n: u32) {
        self.inner.throttle_next.store(n, Ordering::SeqCst);
    }

    pub fn stored_count(&self) -> usize {
        self.inner.activities.lock().unwrap().len()
    }

    pub fn stored(&self, id: u64) -> Option<Activity> {
        self.inner.activities.lock().unwrap().get(&id).cloned()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.batch_sizes.lock().unwrap().clone()
    }

    pub fn recorded_runs(&self) -> Vec<SyncRun> {
        self.inner.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn put_activity(&self, activity: &Activity) -> Result<(), AppError> {
        self.inner
            .activities
            .lock()
            .unwrap()
            .insert(activity.id, activity.clone());
        Ok(())
    }

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        Ok(self.inner.activities.lock().unwrap().get(&activity_id).cloned())
    }

    async fn activity_exists(&self, activity_id: u64) -> Result<bool, AppError> {
        Ok(self.inner.activities.lock().unwrap().contains_key(&activity_id))
    }

    async fn batch_put_activities(&self, activities: &[Activity]) -> Result<(), AppError> {
        let remaining = self.inner.throttle_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner.throttle_next.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::StoreThroughput("simulated throttle".to_string()));
        }

        assert!(activities.len() <= 25, "batch exceeds store limit");
        self.inner.batch_sizes.lock().unwrap().push(activities.len());

        let mut map = self.inner.activities.lock().unwrap();
        for activity in activities {
            map.insert(activity.id, activity.clone());
        }
        Ok(())
    }

    async fn query_activities(
        &self,
        athlete_id: &str,
        filter: &ActivityFilter,
    ) -> Result<Vec<Activity>, AppError> {
        let mut results: Vec<Activity> = self
            .inner
            .activities
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.athlete_id == athlete_id)
            .filter(|a| filter.activity_type.is_none_or(|t| a.activity_type == t))
            .filter(|a| filter.is_race.is_none_or(|r| a.is_race == r))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(results)
    }

    async fn count_activities(&self, athlete_id: &str) -> Result<u64, AppError> {
        Ok(self
            .inner
            .activities
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.athlete_id == athlete_id)
            .count() as u64)
    }

    async fn put_sync_run(&self, run: &SyncRun) -> Result<(), AppError> {
        self.inner.runs.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn latest_sync_run(&self, athlete_id: &str) -> Result<Option<SyncRun>, AppError> {
        Ok(self
            .inner
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.athlete_id == athlete_id)
            .next_back()
            .cloned())
    }
}

/// Scripted upstream source: serves pre-built pages and detail records.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct MockSource {
    pages: Arc<Vec<Vec<StravaActivity>>>,
    details: Arc<HashMap<u64, StravaActivity>>,
    detail_calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl MockSource {
    pub fn with_pages(pages: Vec<Vec<StravaActivity>>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    pub fn with_details(details: Vec<StravaActivity>) -> Self {
        Self {
            details: Arc::new(details.into_iter().map(|a| (a.id, a)).collect()),
            ..Self::default()
        }
    }

    pub fn detail_calls(&self) -> u32 {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivitySource for MockSource {
    async fn list_page(
        &self,
        _athlete_id: &str,
        page: u32,
        _per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError> {
        Ok(self
            .pages
            .get((page - 1) as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_detail(
        &self,
        _athlete_id: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(&activity_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("activity {}", activity_id)))
    }
}

/// Encoded polyline with `points` coordinates starting at (38.5, -120.2),
/// stepping one degree north-east per point.
#[allow(dead_code)]
pub fn track_polyline(points: usize) -> String {
    let mut encoded = String::from("_p~iF~ps|U");
    for _ in 1..points {
        encoded.push_str("_ibE_ibE");
    }
    encoded
}

/// A raw upstream activity with a usable GPS track.
#[allow(dead_code)]
pub fn raw_activity(id: u64, name: &str, sport_type: &str) -> StravaActivity {
    StravaActivity {
        id,
        name: name.to_string(),
        sport_type: sport_type.to_string(),
        distance: 10_000.0,
        moving_time: 3600,
        workout_type: None,
        trainer: false,
        manual: false,
        commute: false,
        map: Some(StravaMap {
            polyline: None,
            summary_polyline: Some(track_polyline(5)),
        }),
        start_latlng: Some(vec![38.5, -120.2]),
        start_date: Some(format!("2026-01-{:02}T08:00:00Z", (id % 28) + 1)),
        total_elevation_gain: Some(120.0),
        average_speed: Some(2.8),
    }
}
