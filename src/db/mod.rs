// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential store (Firestore in production, in-memory for tests and local runs).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{PendingRegistration, Provider, SyncWatermark, TokenPair, UserCredential};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const CREDENTIALS: &str = "credentials";
    /// Sync watermarks (keyed by user_id, 1:1 with credentials)
    pub const WATERMARKS: &str = "sync_watermarks";
    /// Fitbit tokens waiting for the Strava half of registration
    pub const PENDING_REGISTRATIONS: &str = "pending_registrations";
}

/// Durable per-user credentials and sync watermark.
///
/// Every operation is short and scoped to one user; none is held open
/// across a remote call.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` means the user has not finished registering.
    async fn get_credential(&self, user_id: &str) -> Result<Option<UserCredential>, AppError>;

    /// Replace one provider's token pair and stamp its refresh time.
    async fn update_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: &TokenPair,
    ) -> Result<(), AppError>;

    /// Create the credential and its initial watermark together.
    ///
    /// If the user already exists, only the tokens are replaced and the
    /// existing watermark is kept. Returns `true` for a new user.
    async fn register_user(&self, credential: &UserCredential) -> Result<bool, AppError>;

    /// Delete the credential and its watermark together.
    async fn delete_user(&self, user_id: &str) -> Result<(), AppError>;

    async fn get_watermark(&self, user_id: &str) -> Result<Option<SyncWatermark>, AppError>;

    /// Move the watermark forward to `to`. Never moves it backwards.
    ///
    /// Returns `true` if the stored value changed.
    async fn advance_watermark(&self, user_id: &str, to: DateTime<Utc>)
        -> Result<bool, AppError>;

    async fn save_pending_registration(
        &self,
        pending: &PendingRegistration,
    ) -> Result<(), AppError>;

    /// Read and delete a pending registration.
    async fn take_pending_registration(
        &self,
        user_id: &str,
    ) -> Result<Option<PendingRegistration>, AppError>;
}
