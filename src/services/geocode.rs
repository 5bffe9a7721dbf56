// SPDX-License-Identifier: MIT

//! Country resolution with a tiered fallback chain.
//!
//! Tier 1: Google Geocoding API (precise, needs an API key, 1 call / 100ms).
//! Tier 2: Nominatim reverse geocoding (free, 1 call / 1100ms - hard upstream
//!         policy, descriptive User-Agent required).
//! Tier 3: static coordinate-range table (always succeeds).
//!
//! Resolution never fails: any network error, quota rejection, or empty
//! result falls through to the next tier.

use crate::error::AppError;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const NOMINATIM_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Nominatim requires a descriptive client identifier.
const NOMINATIM_USER_AGENT: &str = "country-tracker/0.1 (activity sync service)";

/// Per-call timeout for both geocoding tiers.
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum interval between Google Geocoding calls, process-wide.
pub const GOOGLE_MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Minimum interval between Nominatim calls, process-wide.
pub const NOMINATIM_MIN_INTERVAL: Duration = Duration::from_millis(1100);

/// Serializes calls to one geocoding tier across all concurrent resolutions.
///
/// `acquire` sleeps off the remaining interval deficit while holding the
/// internal lock and stamps the new last-call time just before returning,
/// so same-tier callers queue rather than burst.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the minimum interval since the previous call has elapsed.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Best-effort country resolver.
///
/// Constructed once and shared (`Arc`) so the per-tier rate-limit state is
/// process-wide.
pub struct CountryResolver {
    /// `None` disables both network tiers (offline mode for tests).
    http: Option<reqwest::Client>,
    google_api_key: Option<String>,
    google_limiter: RateLimiter,
    nominatim_limiter: RateLimiter,
}

impl CountryResolver {
    /// Create a resolver with network tiers enabled.
    ///
    /// Without a Google API key the precise tier is skipped entirely (not
    /// retried per call).
    pub fn new(google_api_key: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(GEOCODE_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client: {}", e)))?;

        Ok(Self {
            http: Some(http),
            google_api_key,
            google_limiter: RateLimiter::new(GOOGLE_MIN_INTERVAL),
            nominatim_limiter: RateLimiter::new(NOMINATIM_MIN_INTERVAL),
        })
    }

    /// Resolver with no network tiers: falls straight to the range table.
    pub fn offline() -> Self {
        Self {
            http: None,
            google_api_key: None,
            google_limiter: RateLimiter::new(GOOGLE_MIN_INTERVAL),
            nominatim_limiter: RateLimiter::new(NOMINATIM_MIN_INTERVAL),
        }
    }

    /// Resolve a country name for the given coordinate.
    ///
    /// Never fails; worst case is the range-table guess.
    pub async fn resolve(&self, lat: f64, lng: f64) -> String {
        if let Some(country) = self.try_google(lat, lng).await {
            return country;
        }
        if let Some(country) = self.try_nominatim(lat, lng).await {
            return country;
        }
        country_from_range(lat, lng).to_string()
    }

    /// Tier 1: Google Geocoding API.
    async fn try_google(&self, lat: f64, lng: f64) -> Option<String> {
        let http = self.http.as_ref()?;
        let key = self.google_api_key.as_deref()?;

        self.google_limiter.acquire().await;

        match self.google_request(http, key, lat, lng).await {
            Ok(Some(country)) => Some(country),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, lat, lng, "Google geocoding failed, falling through");
                None
            }
        }
    }

    async fn google_request(
        &self,
        http: &reqwest::Client,
        key: &str,
        lat: f64,
        lng: f64,
    ) -> Result<Option<String>, AppError> {
        let response = http
            .get(GOOGLE_GEOCODE_URL)
            .query(&[("latlng", format!("{},{}", lat, lng)), ("key", key.to_string())])
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Google geocode request: {}", e)))?;

        let body: GoogleGeocodeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Google geocode parse: {}", e)))?;

        match body.status.as_str() {
            "OK" => Ok(extract_google_country(&body)),
            "OVER_QUERY_LIMIT" => {
                tracing::warn!(lat, lng, "Google geocoding over quota");
                Ok(None)
            }
            "ZERO_RESULTS" => {
                tracing::debug!(lat, lng, "Google geocoding returned no results");
                Ok(None)
            }
            other => {
                tracing::debug!(status = %other, lat, lng, "Unexpected Google geocoding status");
                Ok(None)
            }
        }
    }

    /// Tier 2: Nominatim reverse geocoding.
    async fn try_nominatim(&self, lat: f64, lng: f64) -> Option<String> {
        let http = self.http.as_ref()?;

        self.nominatim_limiter.acquire().await;

        let result = http
            .get(NOMINATIM_REVERSE_URL)
            .header(reqwest::header::USER_AGENT, NOMINATIM_USER_AGENT)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, lat, lng, "Nominatim request failed, falling through");
                return None;
            }
        };

        let body: NominatimResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, lat, lng, "Nominatim parse failed, falling through");
                return None;
            }
        };

        body.address
            .and_then(|a| a.country)
            .filter(|c| !c.is_empty() && c != "Unknown")
    }
}

fn extract_google_country(body: &GoogleGeocodeResponse) -> Option<String> {
    body.results
        .iter()
        .flat_map(|r| r.address_components.iter())
        .find(|c| c.types.iter().any(|t| t == "country"))
        .map(|c| c.long_name.clone())
        .filter(|c| !c.is_empty())
}

#[derive(Debug, Deserialize)]
struct GoogleGeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleGeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GoogleGeocodeResult {
    #[serde(default)]
    address_components: Vec<GoogleAddressComponent>,
}

#[derive(Debug, Deserialize)]
struct GoogleAddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
}

// ─── Tier 3: static coordinate ranges ────────────────────────────────────────

struct Region {
    name: &'static str,
    lat: (f64, f64),
    lng: (f64, f64),
}

/// Coarse bounding boxes. First match wins; overlaps are resolved by order.
const REGIONS: &[Region] = &[
    Region { name: "United States", lat: (24.0, 49.0), lng: (-125.0, -66.0) },
    Region { name: "Canada", lat: (49.0, 70.0), lng: (-141.0, -52.0) },
    Region { name: "Mexico", lat: (14.0, 32.0), lng: (-118.0, -86.0) },
    Region { name: "Brazil", lat: (-34.0, 5.0), lng: (-74.0, -34.0) },
    Region { name: "United Kingdom", lat: (49.9, 61.0), lng: (-8.5, 2.0) },
    Region { name: "France", lat: (42.0, 51.0), lng: (-5.0, 8.2) },
    Region { name: "Spain", lat: (36.0, 43.8), lng: (-9.5, 3.3) },
    Region { name: "Germany", lat: (47.2, 55.0), lng: (5.8, 15.0) },
    Region { name: "Italy", lat: (36.5, 47.0), lng: (6.6, 18.6) },
    Region { name: "Australia", lat: (-44.0, -10.0), lng: (112.0, 154.0) },
    Region { name: "Japan", lat: (30.0, 46.0), lng: (129.0, 146.0) },
    Region { name: "New Zealand", lat: (-47.5, -34.0), lng: (166.0, 179.0) },
];

/// Range-table country guess. Always succeeds.
pub fn country_from_range(lat: f64, lng: f64) -> &'static str {
    REGIONS
        .iter()
        .find(|r| lat >= r.lat.0 && lat <= r.lat.1 && lng >= r.lng.0 && lng <= r.lng.1)
        .map_or("Other", |r| r.name)
}
