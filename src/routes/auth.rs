// SPDX-License-Identifier: MIT

//! Strava OAuth authentication routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/strava", get(auth_start))
        .route("/auth/strava/callback", get(auth_callback))
}

/// Start OAuth flow - redirect to Strava authorization.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Redirect {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost:8080");

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    let callback_url = format!("{}://{}/auth/strava/callback", scheme, host);

    let auth_url = format!(
        "https://www.strava.com/oauth/authorize?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope=activity:read_all",
        state.config.strava_client_id,
        urlencoding::encode(&callback_url),
    );

    tracing::info!(
        client_id = %state.config.strava_client_id,
        "Starting OAuth flow, redirecting to Strava"
    );

    Redirect::temporary(&auth_url)
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

/// OAuth callback: exchange the code, store the auth record, bounce to the
/// frontend with the athlete ID.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth flow denied by user");
        return Ok(Redirect::temporary(&format!(
            "{}?error=access_denied",
            state.config.frontend_url
        )));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("code is required".to_string()))?;

    let record = state.strava.handle_oauth_callback(&code).await?;

    Ok(Redirect::temporary(&format!(
        "{}?athlete_id={}",
        state.config.frontend_url, record.athlete_id
    )))
}
