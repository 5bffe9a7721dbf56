// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod activity;
pub mod sync;
pub mod user;

pub use activity::{Activity, ActivityType, Coordinate};
pub use sync::{SyncMode, SyncRun, SyncState};
pub use user::{AthleteProfile, AuthRecord};
