// SPDX-License-Identifier: MIT

//! Database layer (Firestore) and the store gateway boundary.

pub mod firestore;

pub use firestore::FirestoreDb;

use crate::error::AppError;
use crate::models::{Activity, ActivityType, SyncRun};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    /// OAuth tokens + athlete snapshot, keyed by athlete_id
    pub const AUTH_RECORDS: &str = "auth_records";
    /// Canonical activities, keyed by activity id
    pub const ACTIVITIES: &str = "activities";
    /// Sync run status records, keyed by run_id
    pub const SYNC_RUNS: &str = "sync_runs";
}

/// Optional filters for activity queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityFilter {
    pub activity_type: Option<ActivityType>,
    pub is_race: Option<bool>,
}

/// Store gateway for activities and sync runs.
///
/// The sync pipeline only talks to this trait, so it can be exercised
/// against an in-memory store in tests. `batch_put_activities` accepts at
/// most 25 items per call (store-imposed limit); callers chunk accordingly.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Upsert a single activity.
    async fn put_activity(&self, activity: &Activity) -> Result<(), AppError>;

    /// Point lookup by activity ID.
    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError>;

    /// Existence check by activity ID.
    async fn activity_exists(&self, activity_id: u64) -> Result<bool, AppError>;

    /// Batched upsert of at most 25 activities.
    async fn batch_put_activities(&self, activities: &[Activity]) -> Result<(), AppError>;

    /// Query an athlete's activities with optional type/race filters,
    /// most recent first.
    async fn query_activities(
        &self,
        athlete_id: &str,
        filter: &ActivityFilter,
    ) -> Result<Vec<Activity>, AppError>;

    /// Count of stored activities for an athlete.
    async fn count_activities(&self, athlete_id: &str) -> Result<u64, AppError>;

    /// Upsert a sync run status record.
    async fn put_sync_run(&self, run: &SyncRun) -> Result<(), AppError>;

    /// Most recently started sync run for an athlete.
    async fn latest_sync_run(&self, athlete_id: &str) -> Result<Option<SyncRun>, AppError>;
}
