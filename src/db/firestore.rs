// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Credentials (OAuth tokens for both providers)
//! - Sync watermarks (per-user progress)
//! - Pending registrations (between the two OAuth flows)

use crate::db::{collections, CredentialStore};
use crate::error::AppError;
use crate::models::{PendingRegistration, Provider, SyncWatermark, TokenPair, UserCredential};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::{paths, FirestoreConsistencySelector, FirestoreTransaction};

/// Attempts at storing rotated tokens before giving up.
const TOKEN_WRITE_ATTEMPTS: u32 = 3;

const TOKEN_WRITE_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

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

    async fn get_by_id<T>(&self, collection: &str, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> serde::Deserialize<'de> + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Read a document as part of `transaction`.
    ///
    /// The read is registered with the transaction, so the commit fails if
    /// the document changed in between.
    async fn get_in_transaction<T>(
        &self,
        transaction: &FirestoreTransaction<'_>,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, AppError>
    where
        T: for<'de> serde::Deserialize<'de> + Send,
    {
        let reader = self
            .get_client()?
            .clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ));

        reader
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read in transaction: {}", e)))
    }

    /// One transactional attempt at storing a provider's rotated tokens.
    async fn write_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: &TokenPair,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let existing: Option<UserCredential> = self
            .get_in_transaction(&transaction, collections::CREDENTIALS, user_id)
            .await?;
        let Some(mut credential) = existing else {
            let _ = transaction.rollback().await;
            return Err(AppError::NotFound(format!("Credential for user {}", user_id)));
        };

        credential.set_tokens(provider, tokens.clone(), Utc::now());

        // Only this provider's fields; the other pair may be rotating concurrently
        let fields = match provider {
            Provider::Fitbit => paths!(UserCredential::{
                fitbit_access_token,
                fitbit_refresh_token,
                fitbit_token_refreshed_at
            }),
            Provider::Strava => paths!(UserCredential::{
                strava_access_token,
                strava_refresh_token,
                strava_token_refreshed_at
            }),
        };

        client
            .fluent()
            .update()
            .fields(fields)
            .in_col(collections::CREDENTIALS)
            .document_id(user_id)
            .object(&credential)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add credential to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FirestoreDb {
    // ─── Credential Operations ───────────────────────────────────

    async fn get_credential(&self, user_id: &str) -> Result<Option<UserCredential>, AppError> {
        self.get_by_id(collections::CREDENTIALS, user_id).await
    }

    async fn update_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: &TokenPair,
    ) -> Result<(), AppError> {
        // The old refresh token is already spent; the new pair must land
        let mut attempt = 1;
        loop {
            match self.write_tokens(user_id, provider, tokens).await {
                Ok(()) => {
                    tracing::debug!(user_id, provider = %provider, "Stored refreshed tokens");
                    return Ok(());
                }
                Err(AppError::Database(message)) if attempt < TOKEN_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        user_id,
                        provider = %provider,
                        attempt,
                        error = %message,
                        "Token write failed, retrying"
                    );
                    tokio::time::sleep(TOKEN_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn register_user(&self, credential: &UserCredential) -> Result<bool, AppError> {
        let client = self.get_client()?;
        let user_id = credential.user_id.as_str();

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let existing: Option<SyncWatermark> = self
            .get_in_transaction(&transaction, collections::WATERMARKS, user_id)
            .await?;

        client
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(user_id)
            .object(credential)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add credential to transaction: {}", e))
            })?;

        let is_new = existing.is_none();
        if is_new {
            let watermark = SyncWatermark::initial(user_id, Utc::now());
            client
                .fluent()
                .update()
                .in_col(collections::WATERMARKS)
                .document_id(user_id)
                .object(&watermark)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add watermark to transaction: {}", e))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::info!(user_id, is_new, "User registered");
        Ok(is_new)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for collection in [collections::WATERMARKS, collections::CREDENTIALS] {
            client
                .fluent()
                .delete()
                .from(collection)
                .document_id(user_id)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!(
                        "Failed to add deletion to transaction for {}: {}",
                        collection, e
                    ))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit user deletion: {}", e)))?;

        tracing::info!(user_id, "User credential and watermark deleted");
        Ok(())
    }

    // ─── Watermark Operations ────────────────────────────────────

    async fn get_watermark(&self, user_id: &str) -> Result<Option<SyncWatermark>, AppError> {
        self.get_by_id(collections::WATERMARKS, user_id).await
    }

    async fn advance_watermark(
        &self,
        user_id: &str,
        to: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<SyncWatermark> = self
            .get_in_transaction(&transaction, collections::WATERMARKS, user_id)
            .await?;

        let mut watermark = match current {
            Some(w) => w,
            None => {
                // Deleted while the sync pass was running
                tracing::warn!(user_id, "Watermark missing, not advancing");
                let _ = transaction.rollback().await;
                return Ok(false);
            }
        };

        if to <= watermark.last_synced_activity_time {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        watermark.last_synced_activity_time = to;
        watermark.updated_at = Utc::now();

        client
            .fluent()
            .update()
            .in_col(collections::WATERMARKS)
            .document_id(user_id)
            .object(&watermark)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add watermark to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(true)
    }

    // ─── Pending Registration Operations ─────────────────────────

    async fn save_pending_registration(
        &self,
        pending: &PendingRegistration,
    ) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PENDING_REGISTRATIONS)
            .document_id(&pending.user_id)
            .object(pending)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn take_pending_registration(
        &self,
        user_id: &str,
    ) -> Result<Option<PendingRegistration>, AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let pending: Option<PendingRegistration> = self
            .get_in_transaction(&transaction, collections::PENDING_REGISTRATIONS, user_id)
            .await?;

        if pending.is_none() {
            let _ = transaction.rollback().await;
            return Ok(None);
        }

        client
            .fluent()
            .delete()
            .from(collections::PENDING_REGISTRATIONS)
            .document_id(user_id)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add deletion to transaction: {}", e))
            })?;

        // A concurrent take of the same entry fails here
        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(pending)
    }
}
