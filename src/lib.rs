// SPDX-License-Identifier: MIT

//! Country-Tracker: sync Strava activities and map them to countries.
//!
//! This crate provides the backend API that ingests activities from Strava,
//! normalizes them (type mapping, unit conversion, country resolution), and
//! persists them in Firestore for filtered retrieval.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use dashmap::DashMap;
use db::FirestoreDb;
use services::{CountryResolver, StravaService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub strava: StravaService,
    /// Shared so the per-tier geocoding rate limits hold process-wide.
    pub resolver: Arc<CountryResolver>,
    /// Athletes with a sync currently running (per-athlete overlap guard).
    pub active_syncs: Arc<DashMap<String, ()>>,
}
