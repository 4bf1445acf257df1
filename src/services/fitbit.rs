// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit Web API client and the activity source built on it.
//!
//! Handles:
//! - Activity log listing (most recent, and everything after a bound)
//! - TCX export of a single activity
//! - Authorization code exchange (PKCE) and token refresh
//! - Activity subscription for webhook delivery

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{ActivityCategory, ActivityDescriptor, Provider, TokenPair};
use crate::services::http::{check_response, check_response_json, transport_error};
use crate::services::sync::ActivitySource;
use crate::services::token::{RefreshLocks, TokenManager, TokenRefresher};
use crate::time_utils::{format_fitbit_datetime, parse_provider_time};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

const FITBIT_API_URL: &str = "https://api.fitbit.com";
const FITBIT_TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// Authorization page users are redirected to.
pub const FITBIT_AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";

/// Scopes requested during authorization.
pub const FITBIT_SCOPES: &str = "activity location profile";

/// Upper bound on pages followed for one "activities after" query.
const MAX_PAGES: usize = 10;

const PAGE_SIZE: u32 = 100;

/// `beforeDate` is a calendar date in the user's zone; look far enough ahead
/// that "today" is always included.
const MOST_RECENT_LOOKAHEAD_DAYS: i64 = 7;

/// `afterDate` is wall-clock time in the user's zone, which is unknown here.
/// Query a day early so every UTC offset is covered, then filter exactly.
const AFTER_DATE_SLACK_HOURS: i64 = 24;

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: FITBIT_API_URL.to_string(),
            token_url: FITBIT_TOKEN_URL.to_string(),
            client_id,
            client_secret,
        }
    }

    /// Point the client at a different API host (local test servers).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        self.base_url = base_url.to_string();
        self.token_url = format!("{}/oauth2/token", base_url);
        self
    }

    /// The newest activity log entry, if any.
    pub async fn most_recent_activity(
        &self,
        access_token: &str,
    ) -> Result<Option<FitbitActivity>, AppError> {
        let before = (Utc::now() + Duration::days(MOST_RECENT_LOOKAHEAD_DAYS))
            .format("%Y-%m-%d")
            .to_string();
        let url = format!("{}/1/user/-/activities/list.json", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("beforeDate", before.as_str()),
                ("sort", "desc"),
                ("offset", "0"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(transport_error(Provider::Fitbit))?;

        let list: ActivityList = check_response_json(Provider::Fitbit, response).await?;
        Ok(list.activities.into_iter().next())
    }

    /// Every activity that started strictly after `after`, oldest first.
    ///
    /// Follows `pagination.next` up to a fixed page limit.
    pub async fn activities_after(
        &self,
        access_token: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<FitbitActivity>, AppError> {
        let url = format!("{}/1/user/-/activities/list.json", self.base_url);
        let after_param =
            format_fitbit_datetime(after - Duration::hours(AFTER_DATE_SLACK_HOURS));
        let limit = PAGE_SIZE.to_string();

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("afterDate", after_param.as_str()),
                ("sort", "asc"),
                ("offset", "0"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error(Provider::Fitbit))?;

        let mut page: ActivityList = check_response_json(Provider::Fitbit, response).await?;
        let mut activities = Vec::new();
        let mut pages = 1;

        loop {
            activities.append(&mut page.activities);

            let next = match page.pagination.and_then(|p| p.next) {
                Some(next) if !next.is_empty() => next,
                _ => break,
            };

            if pages >= MAX_PAGES {
                tracing::warn!(pages, "Activity listing truncated at page limit");
                break;
            }

            let response = self
                .http
                .get(&next)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(transport_error(Provider::Fitbit))?;
            page = check_response_json(Provider::Fitbit, response).await?;
            pages += 1;
        }

        // Drop the slack window and the bound itself
        activities.retain(|a| a.start_time().map(|t| t > after).unwrap_or(false));
        Ok(activities)
    }

    /// Raw TCX document for one activity.
    pub async fn activity_tcx(&self, access_token: &str, log_id: u64) -> Result<Vec<u8>, AppError> {
        let url = format!("{}/1/user/-/activities/{}.tcx", self.base_url, log_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error(Provider::Fitbit))?;

        let bytes = check_response(Provider::Fitbit, response)
            .await?
            .bytes()
            .await
            .map_err(transport_error(Provider::Fitbit))?;
        Ok(bytes.to_vec())
    }

    /// Subscribe to the user's activity notifications.
    ///
    /// `subscription_id` must be unique across the subscriber; the Fitbit user
    /// ID is used. `200` means the subscription already existed.
    pub async fn create_subscription(
        &self,
        access_token: &str,
        subscription_id: &str,
        subscriber_id: &str,
    ) -> Result<SubscriptionStatus, AppError> {
        let url = format!(
            "{}/1/user/-/activities/apiSubscriptions/{}.json",
            self.base_url,
            urlencoding::encode(subscription_id)
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .header("X-Fitbit-Subscriber-Id", subscriber_id)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(transport_error(Provider::Fitbit))?;

        match response.status() {
            StatusCode::CREATED => Ok(SubscriptionStatus::Created),
            StatusCode::OK => Ok(SubscriptionStatus::AlreadyExists),
            _ => {
                check_response(Provider::Fitbit, response).await?;
                Err(AppError::upstream(
                    Provider::Fitbit,
                    "unexpected subscription response",
                ))
            }
        }
    }

    /// Exchange an authorization code (with its PKCE verifier) for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<FitbitGrant, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(transport_error(Provider::Fitbit))?;

        let token: FitbitTokenResponse = check_response_json(Provider::Fitbit, response).await?;
        token.into_grant()
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AppError::CredentialRefresh {
                provider: Provider::Fitbit,
                message: e.to_string(),
            })?;

        let token: FitbitTokenResponse = check_response_json(Provider::Fitbit, response)
            .await
            .map_err(|e| AppError::CredentialRefresh {
                provider: Provider::Fitbit,
                message: e.to_string(),
            })?;

        Ok(token.into_grant()?.tokens)
    }
}

#[async_trait]
impl TokenRefresher for FitbitClient {
    fn provider(&self) -> Provider {
        Provider::Fitbit
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        self.refresh_token(refresh_token).await
    }
}

/// Whether a subscription call created a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Created,
    AlreadyExists,
}

#[derive(Debug, Deserialize)]
struct ActivityList {
    #[serde(default)]
    activities: Vec<FitbitActivity>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next: Option<String>,
}

/// One entry of the activity log list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitbitActivity {
    pub log_id: u64,
    pub activity_name: String,
    pub start_time: String,
    /// `auto_detected`, `manual`, `mobile_run`, `tracker`
    #[serde(default)]
    pub log_type: String,
    #[serde(default)]
    pub has_gps: bool,
    pub source: Option<DeviceSource>,
}

/// Device that recorded the activity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSource {
    #[serde(default)]
    pub tracker_features: Vec<String>,
}

impl FitbitActivity {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        parse_provider_time(&self.start_time)
    }

    fn has_positional_data(&self) -> bool {
        self.has_gps
            || self
                .source
                .as_ref()
                .map(|s| s.tracker_features.iter().any(|f| f == "GPS"))
                .unwrap_or(false)
    }

    /// Convert to the provider-neutral descriptor.
    pub fn to_descriptor(&self) -> Result<ActivityDescriptor, AppError> {
        let start_time = self.start_time().ok_or_else(|| {
            AppError::upstream(
                Provider::Fitbit,
                format!("unparseable startTime {:?}", self.start_time),
            )
        })?;

        Ok(ActivityDescriptor {
            id: self.log_id,
            start_time,
            category: ActivityCategory::from_fitbit_name(&self.activity_name),
            has_positional_data: self.has_positional_data(),
            is_tracker_recorded: self.log_type == "tracker",
        })
    }
}

#[derive(Debug, Deserialize)]
struct FitbitTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<String>,
}

impl FitbitTokenResponse {
    fn into_grant(self) -> Result<FitbitGrant, AppError> {
        match (self.access_token, self.refresh_token, self.user_id) {
            (Some(access_token), Some(refresh_token), Some(user_id))
                if !access_token.is_empty() && !refresh_token.is_empty() && !user_id.is_empty() =>
            {
                Ok(FitbitGrant {
                    user_id,
                    tokens: TokenPair {
                        access_token,
                        refresh_token,
                    },
                })
            }
            _ => Err(AppError::upstream(
                Provider::Fitbit,
                "token response missing access_token, refresh_token or user_id",
            )),
        }
    }
}

/// Tokens granted for a Fitbit user.
#[derive(Debug, Clone)]
pub struct FitbitGrant {
    pub user_id: String,
    pub tokens: TokenPair,
}

// ─────────────────────────────────────────────────────────────────────────────
// FitbitService - activity source with token management
// ─────────────────────────────────────────────────────────────────────────────

/// Fitbit as the sync engine's activity source.
#[derive(Clone)]
pub struct FitbitService {
    client: FitbitClient,
    tokens: TokenManager,
}

impl FitbitService {
    pub fn new(
        client: FitbitClient,
        store: Arc<dyn CredentialStore>,
        refresh_locks: RefreshLocks,
    ) -> Self {
        let tokens = TokenManager::new(Arc::new(client.clone()), store, refresh_locks);
        Self { client, tokens }
    }
}

#[async_trait]
impl ActivitySource for FitbitService {
    async fn latest_activity(&self, user_id: &str) -> Result<Option<ActivityDescriptor>, AppError> {
        let latest = self
            .tokens
            .invoke(user_id, |token| async move {
                self.client.most_recent_activity(&token).await
            })
            .await?;
        latest.map(|a| a.to_descriptor()).transpose()
    }

    async fn activities_after(
        &self,
        user_id: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<ActivityDescriptor>, AppError> {
        let activities = self
            .tokens
            .invoke(user_id, |token| async move {
                self.client.activities_after(&token, after).await
            })
            .await?;
        activities.iter().map(FitbitActivity::to_descriptor).collect()
    }

    async fn export_tcx(&self, user_id: &str, activity_id: u64) -> Result<Vec<u8>, AppError> {
        self.tokens
            .invoke(user_id, |token| async move {
                self.client.activity_tcx(&token, activity_id).await
            })
            .await
    }
}
