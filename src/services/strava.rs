// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client and the upload destination built on it.
//!
//! Handles:
//! - Newest activity lookup (bounds the reconciliation window)
//! - TCX file upload
//! - Authorization code exchange and token refresh

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{Provider, TokenPair};
use crate::services::http::{check_response, check_response_json, transport_error};
use crate::services::sync::ActivityDestination;
use crate::services::token::{RefreshLocks, TokenManager, TokenRefresher};
use crate::time_utils::parse_provider_time;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

const STRAVA_API_URL: &str = "https://www.strava.com/api/v3";
const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Authorization page users are redirected to.
pub const STRAVA_AUTHORIZE_URL: &str = "https://www.strava.com/oauth/authorize";

/// Scopes requested during authorization.
pub const STRAVA_SCOPES: &str = "activity:read_all,activity:write";

/// External ID attached to an upload so Strava can reject duplicates.
pub fn external_id(source_activity_id: u64) -> String {
    format!("fitbit-{}.tcx", source_activity_id)
}

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: STRAVA_API_URL.to_string(),
            token_url: STRAVA_TOKEN_URL.to_string(),
            client_id,
            client_secret,
        }
    }

    /// Point the client at a different host (local test servers).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        self.base_url = format!("{}/api/v3", base_url);
        self.token_url = format!("{}/oauth/token", base_url);
        self
    }

    /// The athlete's newest activity, if any.
    pub async fn latest_activity(
        &self,
        access_token: &str,
    ) -> Result<Option<StravaActivitySummary>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("page", "1"), ("per_page", "1")])
            .send()
            .await
            .map_err(transport_error(Provider::Strava))?;

        let activities: Vec<StravaActivitySummary> =
            check_response_json(Provider::Strava, response).await?;
        Ok(activities.into_iter().next())
    }

    /// Upload a TCX document.
    ///
    /// Strava answers `201 Created` once the upload is accepted for
    /// processing. Any other status is a failure. The receipt body is
    /// informational; `None` means it could not be read.
    pub async fn upload_tcx(
        &self,
        access_token: &str,
        external_id: &str,
        tcx: Vec<u8>,
    ) -> Result<Option<UploadReceipt>, AppError> {
        let url = format!("{}/uploads", self.base_url);

        let file = Part::bytes(tcx)
            .file_name(external_id.to_string())
            .mime_str("application/xml")
            .map_err(transport_error(Provider::Strava))?;
        let form = Form::new()
            .part("file", file)
            .text("data_type", "tcx")
            .text("external_id", external_id.to_string());

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error(Provider::Strava))?;

        let status = response.status();
        let response = check_response(Provider::Strava, response).await?;
        if status != StatusCode::CREATED {
            return Err(AppError::upstream(
                Provider::Strava,
                format!("upload not created (HTTP {})", status),
            ));
        }

        match response.json::<UploadReceipt>().await {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) => {
                tracing::debug!(external_id, error = %e, "Upload created, receipt unreadable");
                Ok(None)
            }
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(transport_error(Provider::Strava))?;

        let token: StravaTokenResponse = check_response_json(Provider::Strava, response).await?;
        token.into_pair()
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::CredentialRefresh {
                provider: Provider::Strava,
                message: e.to_string(),
            })?;

        let token: StravaTokenResponse = check_response_json(Provider::Strava, response)
            .await
            .map_err(|e| AppError::CredentialRefresh {
                provider: Provider::Strava,
                message: e.to_string(),
            })?;
        token.into_pair()
    }
}

#[async_trait]
impl TokenRefresher for StravaClient {
    fn provider(&self) -> Provider {
        Provider::Strava
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        self.refresh_token(refresh_token).await
    }
}

/// Token response from Strava's OAuth endpoint.
#[derive(Debug, Deserialize)]
struct StravaTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl StravaTokenResponse {
    fn into_pair(self) -> Result<TokenPair, AppError> {
        match (self.access_token, self.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(TokenPair {
                    access_token,
                    refresh_token,
                })
            }
            _ => Err(AppError::upstream(
                Provider::Strava,
                "token response missing access_token or refresh_token",
            )),
        }
    }
}

/// Summary activity for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub start_date: String,
}

impl StravaActivitySummary {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        parse_provider_time(&self.start_date)
    }
}

/// Upload status returned by `POST /uploads`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub id: Option<u64>,
    pub external_id: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - upload destination with token management
// ─────────────────────────────────────────────────────────────────────────────

/// Strava as the sync engine's upload destination.
#[derive(Clone)]
pub struct StravaService {
    client: StravaClient,
    tokens: TokenManager,
}

impl StravaService {
    pub fn new(
        client: StravaClient,
        store: Arc<dyn CredentialStore>,
        refresh_locks: RefreshLocks,
    ) -> Self {
        let tokens = TokenManager::new(Arc::new(client.clone()), store, refresh_locks);
        Self { client, tokens }
    }
}

#[async_trait]
impl ActivityDestination for StravaService {
    async fn latest_activity_start(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest = self
            .tokens
            .invoke(user_id, |token| async move {
                self.client.latest_activity(&token).await
            })
            .await?;

        match latest {
            None => Ok(None),
            Some(activity) => activity.start_time().map(Some).ok_or_else(|| {
                AppError::upstream(
                    Provider::Strava,
                    format!("unparseable start_date {:?}", activity.start_date),
                )
            }),
        }
    }

    async fn upload_tcx(
        &self,
        user_id: &str,
        source_activity_id: u64,
        tcx: Vec<u8>,
    ) -> Result<(), AppError> {
        let external_id = external_id(source_activity_id);
        let receipt = self
            .tokens
            .invoke(user_id, |token| {
                let tcx = tcx.clone();
                let external_id = external_id.as_str();
                async move { self.client.upload_tcx(&token, external_id, tcx).await }
            })
            .await?;

        tracing::debug!(
            user_id,
            upload_id = ?receipt.as_ref().and_then(|r| r.id),
            status = ?receipt.as_ref().and_then(|r| r.status.as_deref()),
            "Strava accepted upload"
        );
        Ok(())
    }
}
