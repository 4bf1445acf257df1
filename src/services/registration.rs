// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-step registration: Fitbit first, then Strava.
//!
//! The Fitbit half leaves a pending registration behind. The Strava half
//! consumes it, subscribes to the user's Fitbit activity notifications, and
//! only then creates the credential and watermark.

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{PendingRegistration, UserCredential};
use crate::services::fitbit::{FitbitClient, SubscriptionStatus};
use crate::services::oauth_state::STATE_MAX_AGE_MINUTES;
use crate::services::strava::StravaClient;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct RegistrationService {
    fitbit: FitbitClient,
    strava: StravaClient,
    store: Arc<dyn CredentialStore>,
    subscriber_id: String,
    fitbit_redirect_uri: String,
}

impl RegistrationService {
    pub fn new(
        fitbit: FitbitClient,
        strava: StravaClient,
        store: Arc<dyn CredentialStore>,
        subscriber_id: String,
        fitbit_redirect_uri: String,
    ) -> Self {
        Self {
            fitbit,
            strava,
            store,
            subscriber_id,
            fitbit_redirect_uri,
        }
    }

    /// Exchange the Fitbit code and park the tokens. Returns the Fitbit user ID.
    pub async fn complete_fitbit(&self, code: &str, code_verifier: &str) -> Result<String, AppError> {
        let grant = self
            .fitbit
            .exchange_code(code, code_verifier, &self.fitbit_redirect_uri)
            .await?;

        self.store
            .save_pending_registration(&PendingRegistration {
                user_id: grant.user_id.clone(),
                fitbit_tokens: grant.tokens,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(user_id = %grant.user_id, "Fitbit authorization complete");
        Ok(grant.user_id)
    }

    /// Exchange the Strava code and finish registering `user_id`.
    ///
    /// Returns `true` for a new user, `false` when an existing user
    /// re-authorized.
    pub async fn complete_strava(&self, user_id: &str, code: &str) -> Result<bool, AppError> {
        let strava_tokens = self.strava.exchange_code(code).await?;

        let pending = self
            .store
            .take_pending_registration(user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Pending registration for user {}", user_id))
            })?;

        // Already deleted by the take
        if pending.is_expired(Utc::now(), Duration::minutes(STATE_MAX_AGE_MINUTES)) {
            tracing::warn!(
                user_id,
                created_at = %pending.created_at,
                "Pending registration expired"
            );
            return Err(AppError::NotFound(format!(
                "Pending registration for user {} expired",
                user_id
            )));
        }

        let status = self
            .fitbit
            .create_subscription(
                &pending.fitbit_tokens.access_token,
                user_id,
                &self.subscriber_id,
            )
            .await?;
        match status {
            SubscriptionStatus::Created => tracing::info!(user_id, "Fitbit subscription created"),
            SubscriptionStatus::AlreadyExists => {
                tracing::info!(user_id, "Fitbit subscription already exists")
            }
        }

        let credential = UserCredential::new(
            user_id.to_string(),
            pending.fitbit_tokens,
            strava_tokens,
            Utc::now(),
        );
        let is_new = self.store.register_user(&credential).await?;

        tracing::info!(user_id, is_new, "Registration complete");
        Ok(is_new)
    }
}
