// SPDX-License-Identifier: MIT

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Auth records (OAuth tokens + athlete snapshot)
//! - Activities (canonical normalized records)
//! - Sync runs (durable pipeline status)

use crate::db::{collections, ActivityFilter, ActivityStore};
use crate::error::AppError;
use crate::models::{Activity, AuthRecord, SyncRun};
use async_trait::async_trait;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // Unauthenticated connection for the emulator to avoid local
        // credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Map a raw Firestore error, distinguishing throttling from the rest.
    fn map_db_error(e: impl std::fmt::Display) -> AppError {
        let msg = e.to_string();
        if msg.contains("ResourceExhausted") || msg.contains("RESOURCE_EXHAUSTED") {
            AppError::StoreThroughput(msg)
        } else {
            AppError::Database(msg)
        }
    }

    // ─── Auth Record Operations ──────────────────────────────────

    /// Get the auth record for an athlete.
    pub async fn get_auth_record(&self, athlete_id: &str) -> Result<Option<AuthRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::AUTH_RECORDS)
            .obj()
            .one(athlete_id)
            .await
            .map_err(Self::map_db_error)
    }

    /// Create or replace the auth record (one per athlete, refreshed in place).
    pub async fn put_auth_record(&self, record: &AuthRecord) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::AUTH_RECORDS)
            .document_id(&record.athlete_id)
            .object(record)
            .execute()
            .await
            .map_err(Self::map_db_error)?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for FirestoreDb {
    async fn put_activity(&self, activity: &Activity) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(activity.id.to_string())
            .object(activity)
            .execute()
            .await
            .map_err(Self::map_db_error)?;
        Ok(())
    }

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(&activity_id.to_string())
            .await
            .map_err(Self::map_db_error)
    }

    async fn activity_exists(&self, activity_id: u64) -> Result<bool, AppError> {
        Ok(self.get_activity(activity_id).await?.is_some())
    }

    async fn batch_put_activities(&self, activities: &[Activity]) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for activity in activities {
            client
                .fluent()
                .update()
                .in_col(collections::ACTIVITIES)
                .document_id(activity.id.to_string())
                .object(activity)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add activity to transaction: {}", e))
                })?;
        }

        transaction.commit().await.map_err(Self::map_db_error)?;
        Ok(())
    }

    async fn query_activities(
        &self,
        athlete_id: &str,
        filter: &ActivityFilter,
    ) -> Result<Vec<Activity>, AppError> {
        let athlete_id = athlete_id.to_string();
        let filter = *filter;

        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| {
                q.for_all([
                    q.field("athlete_id").eq(athlete_id.clone()),
                    filter
                        .activity_type
                        .and_then(|t| q.field("activity_type").eq(t.as_str())),
                    filter.is_race.and_then(|r| q.field("is_race").eq(r)),
                ])
            })
            .order_by([(
                "start_date",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .obj()
            .query()
            .await
            .map_err(Self::map_db_error)
    }

    async fn count_activities(&self, athlete_id: &str) -> Result<u64, AppError> {
        // No cheap server-side count without aggregate queries; the per-athlete
        // activity sets are small enough to count by query.
        let activities = self
            .query_activities(athlete_id, &ActivityFilter::default())
            .await?;
        Ok(activities.len() as u64)
    }

    async fn put_sync_run(&self, run: &SyncRun) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SYNC_RUNS)
            .document_id(&run.run_id)
            .object(run)
            .execute()
            .await
            .map_err(Self::map_db_error)?;
        Ok(())
    }

    async fn latest_sync_run(&self, athlete_id: &str) -> Result<Option<SyncRun>, AppError> {
        let athlete_id = athlete_id.to_string();

        let mut runs: Vec<SyncRun> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SYNC_RUNS)
            .filter(move |q| q.for_all([q.field("athlete_id").eq(athlete_id.clone())]))
            .order_by([(
                "started_at",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(Self::map_db_error)?;

        Ok(if runs.is_empty() {
            None
        } else {
            Some(runs.remove(0))
        })
    }
}
