// SPDX-License-Identifier: MIT

//! Country-Tracker API Server
//!
//! Syncs activities from Strava, resolves the country each one took place
//! in, and serves the results for the frontend map.

use country_tracker::{
    config::Config,
    db::FirestoreDb,
    services::{CountryResolver, StravaService},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Country-Tracker API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    // Country resolver (shared so geocoding rate limits hold process-wide)
    let resolver = Arc::new(
        CountryResolver::new(config.google_maps_api_key.clone())
            .expect("Failed to initialize country resolver"),
    );
    tracing::info!(
        google_tier = config.google_maps_api_key.is_some(),
        "Country resolver initialized"
    );

    // Shared token cache and refresh locks, reused across all requests
    // within this instance
    let token_cache = std::sync::Arc::new(dashmap::DashMap::new());
    let refresh_locks = std::sync::Arc::new(dashmap::DashMap::new());
    tracing::info!("Token cache initialized");

    // Initialize Strava service
    let strava = StravaService::new(
        config.strava_client_id.clone(),
        config.strava_client_secret.clone(),
        db.clone(),
        token_cache,
        refresh_locks,
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        strava,
        resolver,
        active_syncs: Arc::new(dashmap::DashMap::new()),
    });

    // Build router
    let app = country_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("country_tracker=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
