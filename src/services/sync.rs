// SPDX-License-Identifier: MIT

//! Activity synchronization pipeline.
//!
//! One invocation walks `started -> fetching -> persisting -> completed|failed`,
//! recording each transition in a durable `SyncRun` document. The pipeline is
//! launched as a detached task from the trigger handler; its outcome is only
//! observable through the run record and the stored activity count.

use crate::db::ActivityStore;
use crate::error::AppError;
use crate::models::{Activity, SyncMode, SyncRun, SyncState};
use crate::services::geocode::CountryResolver;
use crate::services::normalize::{self, View};
use crate::services::strava::StravaActivity;
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Upstream page size.
pub const PAGE_SIZE: u32 = 50;
/// Etiquette delay between upstream pages.
const PAGE_DELAY: Duration = Duration::from_millis(200);

/// Store-imposed maximum batch size.
pub const BATCH_SIZE: usize = 25;
/// Pause after each successful batch write.
const BATCH_DELAY: Duration = Duration::from_millis(500);
/// Pause after each batch when the run is large (sustained-load easing).
const LARGE_RUN_BATCH_DELAY: Duration = Duration::from_millis(1000);
/// Item count above which the longer batch delay applies.
const LARGE_RUN_THRESHOLD: usize = 500;
/// Attempts per batch before a throughput failure aborts the run.
const MAX_BATCH_ATTEMPTS: u32 = 3;

/// Stored tracks longer than this are assumed to come from the detail path.
///
/// There is no explicit origin flag on stored records; the coordinate count
/// is the documented heuristic (summary records are capped at 20 points).
pub const DETAIL_COORD_THRESHOLD: usize = 20;

/// Holds an athlete's slot in the active-sync set for the lifetime of one
/// sync task.
///
/// Releasing on `Drop` rather than after the pipeline body means the slot
/// is freed even when the task panics; otherwise the athlete would stay
/// locked out of syncing until restart.
pub struct SyncGuard {
    active_syncs: Arc<DashMap<String, ()>>,
    athlete_id: String,
}

impl SyncGuard {
    /// Claim the athlete's sync slot, or `None` when a sync is already
    /// running for them.
    pub fn claim(active_syncs: Arc<DashMap<String, ()>>, athlete_id: String) -> Option<Self> {
        if active_syncs.insert(athlete_id.clone(), ()).is_some() {
            return None;
        }
        Some(Self {
            active_syncs,
            athlete_id,
        })
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.active_syncs.remove(&self.athlete_id);
    }
}

/// Upstream activity source (Strava in production, mocks in tests).
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// One page of the athlete's activities; empty means end of pagination.
    async fn list_page(
        &self,
        athlete_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError>;

    /// Fetch a single activity with its full polyline.
    async fn get_detail(
        &self,
        athlete_id: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError>;
}

/// The sync pipeline, generic over its upstream source and store gateway.
pub struct SyncPipeline<A, S> {
    source: A,
    store: S,
    resolver: Arc<CountryResolver>,
}

impl<A: ActivitySource, S: ActivityStore> SyncPipeline<A, S> {
    pub fn new(source: A, store: S, resolver: Arc<CountryResolver>) -> Self {
        Self {
            source,
            store,
            resolver,
        }
    }

    /// Run one sync invocation to completion.
    ///
    /// Never returns an error: failures are recorded on the run record and
    /// logged, since by the time the body executes the triggering request has
    /// already been answered.
    pub async fn run(&self, athlete_id: &str, mode: SyncMode) -> SyncRun {
        let mut run = SyncRun::begin(athlete_id, mode);
        tracing::info!(athlete_id, run_id = %run.run_id, mode = mode.as_str(), "Sync started");

        if let Err(e) = self.store.put_sync_run(&run).await {
            tracing::warn!(error = %e, "Failed to record sync start");
        }

        match self.execute(athlete_id, mode, &mut run).await {
            Ok(()) => {
                run.state = SyncState::Completed;
                tracing::info!(
                    athlete_id,
                    run_id = %run.run_id,
                    fetched = run.fetched,
                    stored = run.stored,
                    skipped = run.skipped,
                    "Sync completed"
                );
            }
            Err(e) => {
                run.state = SyncState::Failed;
                run.error = Some(e.to_string());
                tracing::error!(athlete_id, run_id = %run.run_id, error = %e, "Sync failed");
            }
        }

        run.finished_at = Some(format_utc_rfc3339(chrono::Utc::now()));
        if let Err(e) = self.store.put_sync_run(&run).await {
            tracing::warn!(error = %e, "Failed to record sync outcome");
        }

        run
    }

    async fn execute(
        &self,
        athlete_id: &str,
        mode: SyncMode,
        run: &mut SyncRun,
    ) -> Result<(), AppError> {
        run.state = SyncState::Fetching;
        self.store.put_sync_run(run).await?;

        let raw = self.fetch_all(athlete_id).await?;
        run.fetched = raw.len() as u32;

        let mut normalized = Vec::with_capacity(raw.len());
        for record in &raw {
            if let Some(activity) =
                normalize::normalize(record, athlete_id, View::Summary, &self.resolver).await
            {
                normalized.push(activity);
            }
        }

        run.state = SyncState::Persisting;
        self.store.put_sync_run(run).await?;

        let (stored, skipped) = match mode {
            SyncMode::Full => {
                let stored = self.persist_full(&normalized).await?;
                (stored, 0)
            }
            SyncMode::Incremental => self.persist_incremental(&normalized).await?,
        };

        run.stored = stored;
        run.skipped = skipped;
        Ok(())
    }

    /// Paginate the upstream listing until an empty page.
    ///
    /// Virtual/indoor records are dropped here already; the normalizer
    /// applies its own (authoritative) exclusion policy on top.
    async fn fetch_all(&self, athlete_id: &str) -> Result<Vec<StravaActivity>, AppError> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let batch = self.source.list_page(athlete_id, page, PAGE_SIZE).await?;
            if batch.is_empty() {
                break;
            }

            let fetched = batch.len();
            for raw in batch {
                if normalize::is_virtual(&raw) {
                    tracing::debug!(activity_id = raw.id, "Dropped virtual activity during fetch");
                    continue;
                }
                all.push(raw);
            }

            tracing::debug!(athlete_id, page, fetched, kept = all.len(), "Fetched page");
            page += 1;
            tokio::time::sleep(PAGE_DELAY).await;
        }

        Ok(all)
    }

    /// Full mode: overwrite every normalized record, no existence checks.
    async fn persist_full(&self, activities: &[Activity]) -> Result<u32, AppError> {
        self.write_batches(activities).await?;
        Ok(activities.len() as u32)
    }

    /// Incremental mode: point-lookup each ID, write only the absent ones.
    async fn persist_incremental(
        &self,
        activities: &[Activity],
    ) -> Result<(u32, u32), AppError> {
        let mut fresh = Vec::new();
        let mut skipped = 0u32;

        for activity in activities {
            if self.store.activity_exists(activity.id).await? {
                skipped += 1;
            } else {
                fresh.push(activity.clone());
            }
        }

        self.write_batches(&fresh).await?;
        Ok((fresh.len() as u32, skipped))
    }

    /// Batched upsert: chunks of at most `BATCH_SIZE`, a pause after each
    /// successful batch, and exponential backoff on throughput rejections.
    /// A batch that exhausts its attempts aborts the remaining batches.
    async fn write_batches(&self, activities: &[Activity]) -> Result<(), AppError> {
        if activities.is_empty() {
            return Ok(());
        }

        let delay = if activities.len() > LARGE_RUN_THRESHOLD {
            LARGE_RUN_BATCH_DELAY
        } else {
            BATCH_DELAY
        };

        for chunk in activities.chunks(BATCH_SIZE) {
            let mut attempt = 0u32;
            loop {
                match self.store.batch_put_activities(chunk).await {
                    Ok(()) => break,
                    Err(e) if e.is_throughput_exceeded() => {
                        attempt += 1;
                        if attempt >= MAX_BATCH_ATTEMPTS {
                            return Err(e);
                        }
                        let backoff = Duration::from_secs(1u64 << attempt);
                        tracing::warn!(
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            "Store throttled batch, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }

    /// Detail-fetch path, separate from bulk sync.
    ///
    /// Serves from the store when the stored track is already detail-grade
    /// (more than [`DETAIL_COORD_THRESHOLD`] points); otherwise fetches the
    /// single activity upstream, normalizes it at detail level, stores the
    /// enriched record, and returns it. `Ok(None)` means the activity is
    /// excluded (virtual or insufficient GPS).
    pub async fn activity_detail(
        &self,
        athlete_id: &str,
        activity_id: u64,
    ) -> Result<Option<Activity>, AppError> {
        if let Some(stored) = self.store.get_activity(activity_id).await? {
            if stored.athlete_id == athlete_id
                && stored.coordinates.len() > DETAIL_COORD_THRESHOLD
            {
                return Ok(Some(stored));
            }
        }

        let raw = self.source.get_detail(athlete_id, activity_id).await?;

        match normalize::normalize(&raw, athlete_id, View::Detail, &self.resolver).await {
            Some(activity) => {
                self.store.put_activity(&activity).await?;
                tracing::info!(
                    athlete_id,
                    activity_id,
                    points = activity.coordinates.len(),
                    "Stored detail-enriched activity"
                );
                Ok(Some(activity))
            }
            None => Ok(None),
        }
    }
}
