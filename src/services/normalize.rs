// SPDX-License-Identifier: MIT

//! Activity normalization: raw Strava records to canonical stored activities.
//!
//! Normalization either produces an [`Activity`] or excludes the record
//! entirely (virtual/indoor activities, unsupported types, missing GPS).
//! Exclusion is not an error; it is logged and the record is dropped.

use crate::models::{Activity, ActivityType, Coordinate};
use crate::services::geocode::CountryResolver;
use crate::services::polyline;
use crate::services::strava::StravaActivity;
use crate::time_utils::{format_duration, format_utc_rfc3339};

/// Which representation of the activity is being produced.
///
/// The two views share one exclusion policy; `Summary` additionally applies
/// the name-substring heuristics. Keeping a single parameterized policy
/// prevents the historical drift between the two rule sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// List view: summary polyline, coordinates truncated to 20 points.
    Summary,
    /// Detail view: full polyline, all coordinates kept.
    Detail,
}

/// Minimum decoded coordinates for an activity to be stored.
pub const MIN_COORDINATES: usize = 3;

/// Coordinate cap for summary/list records.
pub const SUMMARY_COORDINATE_LIMIT: usize = 20;

/// Name substrings (lowercase) that mark an activity as virtual/indoor.
const VIRTUAL_NAME_MARKERS: &[&str] = &[
    "zwift", "peloton", "virtual", "indoor", "trainer", "treadmill",
];

/// Strava workout-type codes meaning "race" (1 = run race, 11 = ride race).
const RACE_WORKOUT_TYPES: &[i64] = &[1, 11];

/// Map an upstream sport type onto our closed type set.
///
/// Walk, Hike and TrailRun all count as runs; virtual types and anything
/// unrecognized map to `None` (excluded).
pub fn map_activity_type(sport_type: &str) -> Option<ActivityType> {
    match sport_type {
        "Run" | "Walk" | "Hike" | "TrailRun" => Some(ActivityType::Run),
        "Ride" => Some(ActivityType::Ride),
        "Swim" => Some(ActivityType::Swim),
        _ => None,
    }
}

/// Quick virtual/indoor check used by the sync pipeline's fetch phase.
///
/// Redundant with [`exclusion_reason`] but kept as an authoritative second
/// layer: the fetch phase drops these before normalization even runs.
pub fn is_virtual(raw: &StravaActivity) -> bool {
    if raw.trainer || raw.manual {
        return true;
    }
    if matches!(raw.sport_type.as_str(), "VirtualRide" | "VirtualRun") {
        return true;
    }
    let name = raw.name.to_lowercase();
    VIRTUAL_NAME_MARKERS.iter().any(|m| name.contains(m))
}

/// Why a record was excluded, or `None` when it should be stored.
///
/// Checks run in order; the first hit wins. `View::Detail` skips the
/// name-substring heuristics (its historically narrower policy).
pub fn exclusion_reason(raw: &StravaActivity, view: View) -> Option<&'static str> {
    if raw.trainer {
        return Some("trainer flag set");
    }
    if raw.manual {
        return Some("manual entry");
    }
    if matches!(raw.sport_type.as_str(), "VirtualRide" | "VirtualRun") {
        return Some("virtual sport type");
    }
    if view == View::Summary {
        let name = raw.name.to_lowercase();
        if VIRTUAL_NAME_MARKERS.iter().any(|m| name.contains(m)) {
            return Some("virtual name marker");
        }
    }
    if !raw.has_start_coordinate() {
        return Some("missing start coordinate");
    }
    if map_activity_type(&raw.sport_type).is_none() {
        return Some("unsupported sport type");
    }
    if raw.detail_polyline().is_none() {
        return Some("no polyline");
    }
    None
}

/// Whether the activity is a race: workout-type sentinel or name heuristic.
pub fn is_race(raw: &StravaActivity) -> bool {
    let by_code = raw
        .workout_type
        .is_some_and(|w| RACE_WORKOUT_TYPES.contains(&w));
    by_code || raw.name.to_lowercase().contains("race")
}

/// Meters to kilometers, rounded to one decimal place.
pub fn round_km(meters: f64) -> f64 {
    (meters / 100.0).round() / 10.0
}

/// Normalize a raw activity, resolving its country from the first decoded
/// coordinate of the view's polyline. Returns `None` when the record is
/// excluded (including decode failures and tracks under 3 points).
pub async fn normalize(
    raw: &StravaActivity,
    athlete_id: &str,
    view: View,
    resolver: &CountryResolver,
) -> Option<Activity> {
    if let Some(reason) = exclusion_reason(raw, view) {
        tracing::debug!(activity_id = raw.id, reason, "Activity excluded");
        return None;
    }

    let encoded = match view {
        View::Summary => raw.summary_polyline(),
        View::Detail => raw.detail_polyline(),
    }?;

    let mut coordinates = match polyline::decode(encoded) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(activity_id = raw.id, error = %e, "Polyline decode failed, excluding");
            return None;
        }
    };

    if coordinates.len() < MIN_COORDINATES {
        tracing::debug!(
            activity_id = raw.id,
            points = coordinates.len(),
            "Too few GPS points, excluding"
        );
        return None;
    }

    let first: Coordinate = coordinates[0];
    let country = resolver.resolve(first.lat, first.lng).await;

    if view == View::Summary {
        coordinates.truncate(SUMMARY_COORDINATE_LIMIT);
    }

    Some(Activity {
        id: raw.id,
        athlete_id: athlete_id.to_string(),
        name: raw.name.clone(),
        // Safe: exclusion_reason already rejected unmapped types.
        activity_type: map_activity_type(&raw.sport_type)?,
        distance_km: round_km(raw.distance),
        duration: format_duration(raw.moving_time),
        country,
        is_race: is_race(raw),
        coordinates,
        elevation_gain: raw.total_elevation_gain,
        average_speed: raw.average_speed,
        start_date: raw.start_date.clone(),
        stored_at: format_utc_rfc3339(chrono::Utc::now()),
    })
}
