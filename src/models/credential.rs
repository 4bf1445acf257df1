// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user credential and sync progress records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two platforms this service bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Source of activities.
    Fitbit,
    /// Destination for uploads.
    Strava,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Fitbit => "fitbit",
            Provider::Strava => "strava",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Fitbit => "Fitbit",
            Provider::Strava => "Strava",
        })
    }
}

/// An access/refresh token pair. The two rotate together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// OAuth credentials for both providers, stored in Firestore.
///
/// Exists only once the user has authorized both Fitbit and Strava.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCredential {
    /// Fitbit user ID (also used as document ID)
    pub user_id: String,
    pub fitbit_access_token: String,
    pub fitbit_refresh_token: String,
    pub strava_access_token: String,
    pub strava_refresh_token: String,
    pub fitbit_token_refreshed_at: DateTime<Utc>,
    pub strava_token_refreshed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserCredential {
    /// Build a credential from freshly exchanged token pairs.
    pub fn new(user_id: String, fitbit: TokenPair, strava: TokenPair, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            fitbit_access_token: fitbit.access_token,
            fitbit_refresh_token: fitbit.refresh_token,
            strava_access_token: strava.access_token,
            strava_refresh_token: strava.refresh_token,
            fitbit_token_refreshed_at: now,
            strava_token_refreshed_at: now,
            created_at: now,
        }
    }

    pub fn access_token(&self, provider: Provider) -> &str {
        match provider {
            Provider::Fitbit => &self.fitbit_access_token,
            Provider::Strava => &self.strava_access_token,
        }
    }

    pub fn refresh_token(&self, provider: Provider) -> &str {
        match provider {
            Provider::Fitbit => &self.fitbit_refresh_token,
            Provider::Strava => &self.strava_refresh_token,
        }
    }

    /// Replace one provider's token pair and stamp the refresh time.
    pub fn set_tokens(&mut self, provider: Provider, tokens: TokenPair, now: DateTime<Utc>) {
        match provider {
            Provider::Fitbit => {
                self.fitbit_access_token = tokens.access_token;
                self.fitbit_refresh_token = tokens.refresh_token;
                self.fitbit_token_refreshed_at = now;
            }
            Provider::Strava => {
                self.strava_access_token = tokens.access_token;
                self.strava_refresh_token = tokens.refresh_token;
                self.strava_token_refreshed_at = now;
            }
        }
    }
}

/// Sync progress for one user (1:1 with [`UserCredential`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub user_id: String,
    /// Start time of the most recent Fitbit activity already handled.
    /// Never moves backwards.
    pub last_synced_activity_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    /// Watermark for a newly registered user: far enough in the past that
    /// every future activity counts as new.
    pub fn initial(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            last_synced_activity_time: watermark_epoch(),
            updated_at: now,
        }
    }
}

/// 2000-01-01T00:00:00Z
pub fn watermark_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fitbit tokens held between the Fitbit and Strava authorization steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRegistration {
    /// Fitbit user ID (also used as document ID)
    pub user_id: String,
    pub fitbit_tokens: TokenPair,
    pub created_at: DateTime<Utc>,
}

impl PendingRegistration {
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.created_at > max_age
    }
}
