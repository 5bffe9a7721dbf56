// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod geocode;
pub mod normalize;
pub mod polyline;
pub mod strava;
pub mod sync;

pub use geocode::{CountryResolver, RateLimiter};
pub use strava::StravaService;
pub use sync::{ActivitySource, SyncGuard, SyncPipeline};
