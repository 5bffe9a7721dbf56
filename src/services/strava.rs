// SPDX-License-Identifier: MIT

//! Strava API client for fetching activities.
//!
//! Handles:
//! - Paginated activity listing and single-activity fetch
//! - OAuth code exchange
//! - Token refresh when expired (300-second buffer)
//! - Rate limit detection

use crate::error::AppError;
use serde::Deserialize;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://www.strava.com/api/v3".to_string(),
            client_id,
            client_secret,
        }
    }

    /// Get a detailed activity by ID.
    pub async fn get_activity(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// List a page of the athlete's activities.
    ///
    /// Strava signals the end of pagination with an empty array.
    pub async fn list_activities(
        &self,
        access_token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("page", page.to_string()), ("per_page", per_page.to_string())])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post("https://www.strava.com/oauth/token")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(format!("Token refresh request failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchangeResponse, AppError> {
        let response = self
            .http
            .post("https://www.strava.com/oauth/token")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Strava token exchange failed");
            return Err(AppError::StravaApi(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("Failed to parse token response: {}", e)))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!("Strava rate limit hit (429)");
                return Err(AppError::StravaApi(AppError::STRAVA_RATE_LIMIT.to_string()));
            }

            if status.as_u16() == 401 {
                return Err(AppError::StravaApi(AppError::STRAVA_TOKEN_ERROR.to_string()));
            }

            return Err(AppError::StravaApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Token exchange response from Strava OAuth (includes athlete info).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub athlete: StravaAthlete,
}

/// Athlete info from OAuth token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthlete {
    pub id: u64,
    pub firstname: String,
    pub lastname: String,
    pub profile: Option<String>,
}

/// Raw upstream activity, shared by the list and detail endpoints.
///
/// Transient: consumed by the normalizer page by page and discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivity {
    pub id: u64,
    pub name: String,
    pub sport_type: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub moving_time: u64,
    pub workout_type: Option<i64>,
    #[serde(default)]
    pub trainer: bool,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub commute: bool,
    pub map: Option<StravaMap>,
    /// `[lat, lng]`; Strava sends an empty array for GPS-less activities.
    pub start_latlng: Option<Vec<f64>>,
    pub start_date: Option<String>,
    pub total_elevation_gain: Option<f64>,
    pub average_speed: Option<f64>,
}

impl StravaActivity {
    /// The full-resolution polyline, falling back to the summary.
    pub fn detail_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.polyline.as_deref().or(map.summary_polyline.as_deref())
    }

    /// The summary polyline, falling back to the full one.
    pub fn summary_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.summary_polyline.as_deref().or(map.polyline.as_deref())
    }

    /// Whether this activity has a usable start coordinate.
    pub fn has_start_coordinate(&self) -> bool {
        self.start_latlng.as_ref().is_some_and(|c| c.len() >= 2)
    }
}

/// Activity map data with polylines.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaMap {
    pub polyline: Option<String>,
    pub summary_polyline: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::FirestoreDb;
use crate::models::{AthleteProfile, AuthRecord};
use crate::services::sync::ActivitySource;
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// High-level Strava service that manages token lifecycle and API calls.
///
/// Encapsulates:
/// - Auth record retrieval from Firestore
/// - Automatic token refresh when expiring (with 5-minute margin)
/// - In-memory token caching
/// - Per-athlete locking to prevent duplicate refresh calls
/// - All Strava API calls
#[derive(Clone)]
pub struct StravaService {
    client: StravaClient,
    db: FirestoreDb,
    /// In-memory cache of access tokens (shared across requests).
    token_cache: TokenCache,
    /// Per-athlete mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
}

impl StravaService {
    /// Create a new Strava service with shared token cache.
    pub fn new(
        client_id: String,
        client_secret: String,
        db: FirestoreDb,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client: StravaClient::new(client_id, client_secret),
            db,
            token_cache,
            refresh_locks,
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given athlete.
    ///
    /// 1. Check in-memory cache (fast path, no I/O)
    /// 2. Acquire per-athlete lock to prevent duplicate refresh calls
    /// 3. Re-check cache after the lock (another task may have refreshed)
    /// 4. Fetch the auth record from Firestore
    /// 5. If the token is still outside the refresh margin, cache and return
    /// 6. Otherwise refresh with Strava and rewrite the record in place
    pub async fn get_valid_access_token(&self, athlete_id: &str) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();

        if let Some(cached) = self.token_cache.get(athlete_id) {
            if now + TOKEN_REFRESH_MARGIN_SECS < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let lock = self
            .refresh_locks
            .entry(athlete_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting.
        if let Some(cached) = self.token_cache.get(athlete_id) {
            if now + TOKEN_REFRESH_MARGIN_SECS < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let record = self
            .db
            .get_auth_record(athlete_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if now + TOKEN_REFRESH_MARGIN_SECS < record.expires_at {
            self.token_cache.insert(
                athlete_id.to_string(),
                CachedToken {
                    access_token: record.access_token.clone(),
                    expires_at: record.expires_at,
                },
            );
            return Ok(record.access_token);
        }

        tracing::info!(athlete_id, "Access token expired, refreshing");

        let new_tokens = self.client.refresh_token(&record.refresh_token).await?;

        let updated = AuthRecord {
            access_token: new_tokens.access_token.clone(),
            refresh_token: new_tokens.refresh_token,
            expires_at: new_tokens.expires_at,
            updated_at: format_utc_rfc3339(chrono::Utc::now()),
            ..record
        };
        self.db.put_auth_record(&updated).await?;

        self.token_cache.insert(
            athlete_id.to_string(),
            CachedToken {
                access_token: new_tokens.access_token.clone(),
                expires_at: new_tokens.expires_at,
            },
        );

        tracing::info!(athlete_id, "Token refreshed and cached");
        Ok(new_tokens.access_token)
    }

    /// Drop the cached token when Strava rejects it server-side.
    ///
    /// A 401 despite a locally "valid" expiry means the token was revoked
    /// (or the clock is skewed); the next call then goes through a full
    /// refresh instead of replaying the stale cache entry.
    fn invalidate_on_token_error<T>(
        &self,
        athlete_id: &str,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        if let Err(e) = &result {
            if e.is_strava_token_error() {
                tracing::warn!(athlete_id, "Strava rejected access token, dropping cache entry");
                self.token_cache.remove(athlete_id);
            }
        }
        result
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Handle OAuth callback: exchange the code, store the auth record.
    pub async fn handle_oauth_callback(&self, code: &str) -> Result<AuthRecord, AppError> {
        let exchange = self.client.exchange_code(code).await?;
        let athlete_id = exchange.athlete.id.to_string();
        let now = format_utc_rfc3339(chrono::Utc::now());

        let created_at = match self.db.get_auth_record(&athlete_id).await {
            Ok(Some(existing)) => existing.created_at,
            _ => now.clone(),
        };

        let record = AuthRecord {
            athlete_id: athlete_id.clone(),
            access_token: exchange.access_token,
            refresh_token: exchange.refresh_token,
            expires_at: exchange.expires_at,
            athlete: AthleteProfile {
                id: exchange.athlete.id,
                firstname: exchange.athlete.firstname,
                lastname: exchange.athlete.lastname,
                profile: exchange.athlete.profile,
            },
            created_at,
            updated_at: now,
        };

        self.db.put_auth_record(&record).await?;

        tracing::info!(
            athlete_id = %record.athlete_id,
            firstname = %record.athlete.firstname,
            "OAuth callback handled, auth record stored"
        );

        Ok(record)
    }
}

#[async_trait]
impl ActivitySource for StravaService {
    async fn list_page(
        &self,
        athlete_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError> {
        let access_token = self.get_valid_access_token(athlete_id).await?;
        let result = self
            .client
            .list_activities(&access_token, page, per_page)
            .await;
        self.invalidate_on_token_error(athlete_id, result)
    }

    async fn get_detail(
        &self,
        athlete_id: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, AppError> {
        let access_token = self.get_valid_access_token(athlete_id).await?;
        let result = self.client.get_activity(&access_token, activity_id).await;
        self.invalidate_on_token_error(athlete_id, result)
    }
}
