// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-token lifecycle shared by the Fitbit and Strava services.
//!
//! Tokens are used as stored until the provider rejects one. On rejection the
//! refresh token is exchanged once, the new pair is persisted, and the call is
//! repeated a single time. Refreshes for the same user and provider are
//! serialized with a per-key mutex so concurrent tasks do not burn the
//! refresh token twice.

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{Provider, TokenPair};
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared refresh locks, keyed by provider and user.
pub type RefreshLocks = Arc<DashMap<(Provider, String), Arc<Mutex<()>>>>;

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    fn provider(&self) -> Provider;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError>;
}

/// Wraps provider calls with transparent refresh-on-401.
#[derive(Clone)]
pub struct TokenManager {
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn CredentialStore>,
    refresh_locks: RefreshLocks,
}

impl TokenManager {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn CredentialStore>,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            refresher,
            store,
            refresh_locks,
        }
    }

    pub fn provider(&self) -> Provider {
        self.refresher.provider()
    }

    /// Current stored access token for `user_id`.
    pub async fn access_token(&self, user_id: &str) -> Result<String, AppError> {
        let credential = self
            .store
            .get_credential(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential for user {}", user_id)))?;
        Ok(credential.access_token(self.provider()).to_string())
    }

    /// Run `call` with the user's access token, refreshing and retrying once
    /// if the provider rejects it.
    ///
    /// A second rejection is returned as-is; there is no further retry.
    pub async fn invoke<T, F, Fut>(&self, user_id: &str, call: F) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let access_token = self.access_token(user_id).await?;

        match call(access_token.clone()).await {
            Err(e) if e.is_auth_failure() => {
                tracing::info!(
                    user_id,
                    provider = %self.provider(),
                    "Access token rejected, refreshing"
                );
                let refreshed = self.refresh(user_id, &access_token).await?;

                let result = call(refreshed).await;
                if let Err(e) = &result {
                    if e.is_auth_failure() {
                        tracing::error!(
                            user_id,
                            provider = %self.provider(),
                            "Access token rejected again after refresh"
                        );
                    }
                }
                result
            }
            other => other,
        }
    }

    /// Replace the rejected access token and return the new one.
    ///
    /// If another task already replaced `rejected_token` while we waited for
    /// the lock, its result is reused without another exchange.
    pub async fn refresh(&self, user_id: &str, rejected_token: &str) -> Result<String, AppError> {
        let provider = self.provider();

        let lock = self
            .refresh_locks
            .entry((provider, user_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let credential = self
            .store
            .get_credential(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Credential for user {}", user_id)))?;

        let current = credential.access_token(provider);
        if current != rejected_token {
            tracing::debug!(user_id, provider = %provider, "Tokens already refreshed by another task");
            return Ok(current.to_string());
        }

        let tokens = self
            .refresher
            .refresh(credential.refresh_token(provider))
            .await
            .map_err(|e| match e {
                AppError::CredentialRefresh { .. } => e,
                other => AppError::CredentialRefresh {
                    provider,
                    message: other.to_string(),
                },
            })?;

        self.store.update_tokens(user_id, provider, &tokens).await?;

        tracing::info!(user_id, provider = %provider, "Tokens refreshed and stored");
        Ok(tokens.access_token)
    }
}
