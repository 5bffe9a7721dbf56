// SPDX-License-Identifier: MIT

//! API routes: sync trigger/status and activity queries.

use crate::db::{ActivityFilter, ActivityStore};
use crate::error::{AppError, Result};
use crate::models::{Activity, ActivityType, SyncMode, SyncState};
use crate::services::normalize::SUMMARY_COORDINATE_LIMIT;
use crate::services::{SyncGuard, SyncPipeline};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/status", get(sync_status))
        .route("/api/activities", get(list_activities))
        .route("/api/activities/{id}", get(get_activity))
}

fn require_athlete_id(athlete_id: Option<String>) -> Result<String> {
    athlete_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("athlete_id is required".to_string()))
}

// ─── Sync Trigger ────────────────────────────────────────────

#[derive(Deserialize)]
struct SyncQuery {
    athlete_id: Option<String>,
    /// "full" or "incremental" (default)
    mode: Option<String>,
}

/// Acknowledgment returned before the pipeline body executes.
#[derive(Serialize)]
pub struct SyncAck {
    pub status: String,
    pub mode: String,
}

/// Trigger a sync for an athlete.
///
/// Fire-and-forget: the pipeline runs as a detached task and this handler
/// answers immediately. Progress is visible only via `/api/sync/status`.
/// A second trigger for the same athlete while one is running is rejected.
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncQuery>,
) -> Result<(StatusCode, Json<SyncAck>)> {
    let athlete_id = require_athlete_id(params.athlete_id)?;

    let mode: SyncMode = match params.mode.as_deref() {
        None => SyncMode::Incremental,
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::BadRequest("mode must be 'full' or 'incremental'".to_string()))?,
    };

    // Unknown athletes cannot sync.
    if state.db.get_auth_record(&athlete_id).await?.is_none() {
        return Err(AppError::Unauthorized);
    }

    // Per-athlete guard against overlapping runs (single-process scope).
    // Released on drop, so a panicking sync task cannot wedge the slot.
    let guard = SyncGuard::claim(Arc::clone(&state.active_syncs), athlete_id.clone())
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "sync already in progress for athlete {}",
                athlete_id
            ))
        })?;

    tracing::info!(athlete_id = %athlete_id, mode = mode.as_str(), "Sync triggered");

    let pipeline = SyncPipeline::new(
        state.strava.clone(),
        state.db.clone(),
        Arc::clone(&state.resolver),
    );
    let task_athlete_id = athlete_id.clone();

    tokio::spawn(async move {
        let _guard = guard;
        pipeline.run(&task_athlete_id, mode).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncAck {
            status: "in_progress".to_string(),
            mode: mode.as_str().to_string(),
        }),
    ))
}

// ─── Sync Status ─────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusQuery {
    athlete_id: Option<String>,
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    /// Latest run state, or "idle" when no sync has ever run.
    pub state: String,
    pub mode: Option<String>,
    pub fetched: u32,
    pub stored: u32,
    pub skipped: u32,
    pub error: Option<String>,
    /// Current number of stored activities for this athlete.
    pub total_activities: u64,
}

/// Coarse sync status: the latest run record plus the stored count.
async fn sync_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<SyncStatusResponse>> {
    let athlete_id = require_athlete_id(params.athlete_id)?;

    let run = state.db.latest_sync_run(&athlete_id).await?;
    let total_activities = state.db.count_activities(&athlete_id).await?;

    let response = match run {
        Some(run) => SyncStatusResponse {
            state: match run.state {
                SyncState::Started => "started",
                SyncState::Fetching => "fetching",
                SyncState::Persisting => "persisting",
                SyncState::Completed => "completed",
                SyncState::Failed => "failed",
            }
            .to_string(),
            mode: Some(run.mode.as_str().to_string()),
            fetched: run.fetched,
            stored: run.stored,
            skipped: run.skipped,
            error: run.error,
            total_activities,
        },
        None => SyncStatusResponse {
            state: "idle".to_string(),
            mode: None,
            fetched: 0,
            stored: 0,
            skipped: 0,
            error: None,
            total_activities,
        },
    };

    Ok(Json(response))
}

// ─── Activities ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ActivitiesQuery {
    athlete_id: Option<String>,
    /// Filter by activity type ("run", "ride", "swim")
    #[serde(rename = "type")]
    activity_type: Option<String>,
    /// Filter by race flag
    race: Option<bool>,
}

#[derive(Serialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<Activity>,
    /// Total stored activities for this athlete (unfiltered).
    pub total: u64,
    /// Number of activities in this response.
    pub returned: u32,
}

/// List an athlete's activities with optional type/race filters.
async fn list_activities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivitiesQuery>,
) -> Result<Json<ActivitiesResponse>> {
    let athlete_id = require_athlete_id(params.athlete_id)?;

    let activity_type = params
        .activity_type
        .as_deref()
        .map(|raw| {
            raw.parse::<ActivityType>().map_err(|_| {
                AppError::BadRequest("type must be 'run', 'ride' or 'swim'".to_string())
            })
        })
        .transpose()?;

    let filter = ActivityFilter {
        activity_type,
        is_race: params.race,
    };

    tracing::debug!(
        athlete_id = %athlete_id,
        activity_type = ?filter.activity_type,
        race = ?filter.is_race,
        "Fetching activities"
    );

    let mut activities = state.db.query_activities(&athlete_id, &filter).await?;
    let total = state.db.count_activities(&athlete_id).await?;

    // List view: cap track length regardless of the record's origin.
    for activity in &mut activities {
        activity.coordinates.truncate(SUMMARY_COORDINATE_LIMIT);
    }

    let returned = activities.len() as u32;
    Ok(Json(ActivitiesResponse {
        activities,
        total,
        returned,
    }))
}

#[derive(Deserialize)]
struct ActivityDetailQuery {
    athlete_id: Option<String>,
}

/// Get a single activity with its full track.
///
/// Served from the store when the stored record is detail-grade; otherwise
/// falls through to the detail-fetch path (upstream fetch + enrich + store).
async fn get_activity(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<u64>,
    Query(params): Query<ActivityDetailQuery>,
) -> Result<Json<Activity>> {
    let athlete_id = require_athlete_id(params.athlete_id)?;

    if state.db.get_auth_record(&athlete_id).await?.is_none() {
        return Err(AppError::Unauthorized);
    }

    let pipeline = SyncPipeline::new(
        state.strava.clone(),
        state.db.clone(),
        Arc::clone(&state.resolver),
    );

    let activity = pipeline
        .activity_detail(&athlete_id, activity_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Activity {}", activity_id)))?;

    if activity.athlete_id != athlete_id {
        return Err(AppError::NotFound(format!("Activity {}", activity_id)));
    }

    Ok(Json(activity))
}
