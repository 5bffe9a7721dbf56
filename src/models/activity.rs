// SPDX-License-Identifier: MIT

//! Canonical activity model for storage and API.

use serde::{Deserialize, Serialize};

/// A single geographic point decoded from a polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// Closed set of activity types we keep. Everything else upstream
/// (yoga, weight training, virtual rides, ...) is excluded before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Run,
    Ride,
    Swim,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Run => "run",
            ActivityType::Ride => "ride",
            ActivityType::Swim => "swim",
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(ActivityType::Run),
            "ride" => Ok(ActivityType::Ride),
            "swim" => Ok(ActivityType::Swim),
            _ => Err(()),
        }
    }
}

/// Stored activity record in Firestore.
///
/// Written once per upstream activity ID (upsert semantics, never mutated in
/// place). Summary-origin records carry at most 20 coordinates; detail-origin
/// records keep the full decoded track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Strava activity ID (also used as document ID)
    pub id: u64,
    /// Owning athlete ID
    pub athlete_id: String,
    /// Activity name/title
    pub name: String,
    /// Mapped activity type (run, ride, swim)
    pub activity_type: ActivityType,
    /// Distance in kilometers, rounded to one decimal
    pub distance_km: f64,
    /// Formatted duration ("MM:SS" or "HH:MM:SS")
    pub duration: String,
    /// Resolved country name (best effort, never empty)
    pub country: String,
    /// Whether this was a race (workout type or name heuristic)
    pub is_race: bool,
    /// Decoded GPS track. Invariant: at least 3 points.
    pub coordinates: Vec<Coordinate>,
    /// Total elevation gain in meters, if reported
    pub elevation_gain: Option<f64>,
    /// Average speed in m/s, if reported
    pub average_speed: Option<f64>,
    /// Activity start timestamp (upstream ISO 8601), if reported
    pub start_date: Option<String>,
    /// When this record was stored (RFC3339)
    pub stored_at: String,
}
