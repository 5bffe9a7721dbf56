// SPDX-License-Identifier: MIT

//! Auth record model: one document per connected athlete.

use serde::{Deserialize, Serialize};

/// Athlete profile snapshot embedded in the auth record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub id: u64,
    pub firstname: String,
    pub lastname: String,
    /// Profile picture URL
    pub profile: Option<String>,
}

/// OAuth tokens and athlete snapshot, keyed by athlete ID.
///
/// At most one record exists per athlete; token refresh rewrites the same
/// document in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Strava athlete ID (also used as document ID)
    pub athlete_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute access-token expiry (epoch seconds)
    pub expires_at: i64,
    /// Athlete profile at connect time
    pub athlete: AthleteProfile,
    /// When the athlete first connected (RFC3339)
    pub created_at: String,
    /// Last token refresh or profile update (RFC3339)
    pub updated_at: String,
}
