// SPDX-License-Identifier: MIT

//! Durable sync-run status records.
//!
//! The sync pipeline is fire-and-forget from the caller's perspective; these
//! records are the only way its progress and outcome are observable.

use crate::time_utils::format_utc_rfc3339;
use serde::{Deserialize, Serialize};

/// Sync mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Unconditional overwrite of every fetched activity.
    Full,
    /// Write-only-if-absent.
    Incremental,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            _ => Err(()),
        }
    }
}

/// Pipeline state for a single sync invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Started,
    Fetching,
    Persisting,
    Completed,
    Failed,
}

/// One sync invocation, keyed by athlete + start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    /// Document ID: "{athlete_id}-{start_millis}"
    pub run_id: String,
    pub athlete_id: String,
    pub mode: SyncMode,
    pub state: SyncState,
    /// Activities fetched from upstream (after the fetch-phase filter)
    pub fetched: u32,
    /// Activities written to the store in this run
    pub stored: u32,
    /// Activities skipped as already present (incremental mode only)
    pub skipped: u32,
    /// Failure message when `state` is `Failed`
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl SyncRun {
    /// Start a new run record in the `Started` state.
    pub fn begin(athlete_id: &str, mode: SyncMode) -> Self {
        let now = chrono::Utc::now();
        Self {
            run_id: format!("{}-{}", athlete_id, now.timestamp_millis()),
            athlete_id: athlete_id.to_string(),
            mode,
            state: SyncState::Started,
            fetched: 0,
            stored: 0,
            skipped: 0,
            error: None,
            started_at: format_utc_rfc3339(now),
            finished_at: None,
        }
    }
}
