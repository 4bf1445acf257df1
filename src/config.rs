// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Cloud Run injects secrets as environment variables via secret bindings,
//! so everything is read from the environment once at startup.

use std::env;

/// Cloud Tasks queue that carries per-user sync tasks.
pub const SYNC_QUEUE_NAME: &str = "activity-sync";

/// Accepted range for `SYNC_HORIZON_HOURS` (one hour to one year).
const SYNC_HORIZON_RANGE: std::ops::RangeInclusive<i64> = 1..=8760;

/// How reconciliation tasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Google Cloud Tasks (production).
    CloudTasks,
    /// In-process tokio workers (local development).
    Local,
}

/// Where credentials and watermarks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    /// Process memory; lost on restart.
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Fitbit OAuth client ID
    pub fitbit_client_id: String,
    /// Strava OAuth client ID
    pub strava_client_id: String,
    /// Fitbit subscriber ID used when registering subscriptions
    pub fitbit_subscriber_id: String,
    /// Public base URL of this service (OAuth callbacks, task targets)
    pub api_url: String,
    /// Where the browser lands once registration completes
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region hosting the task queue
    pub gcp_region: String,
    /// Service account whose ID token Cloud Tasks attaches to sync tasks
    pub tasks_service_account: String,
    /// Server port
    pub port: u16,
    /// Trailing window that bounds backfill, in hours
    pub sync_horizon_hours: i64,
    pub dispatch_mode: DispatchMode,
    pub storage_backend: StorageBackend,
    /// Worker count for `DispatchMode::Local`
    pub local_workers: usize,

    // --- Secrets ---
    /// Fitbit OAuth client secret (also keys webhook signatures)
    pub fitbit_client_secret: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Code Fitbit echoes back during subscriber verification
    pub fitbit_verification_code: String,
    /// HMAC key for OAuth `state` parameters (raw bytes)
    pub oauth_state_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let gcp_project_id =
            env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string());

        let config = Self {
            fitbit_client_id: required("FITBIT_CLIENT_ID")?,
            strava_client_id: required("STRAVA_CLIENT_ID")?,
            fitbit_subscriber_id: env::var("FITBIT_SUBSCRIBER_ID")
                .unwrap_or_else(|_| "1".to_string()),
            api_url: env::var("API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: gcp_project_id.clone(),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            tasks_service_account: env::var("TASKS_SERVICE_ACCOUNT")
                .unwrap_or_else(|_| default_service_account(&gcp_project_id)),
            port: parsed("PORT", 8080)?,
            sync_horizon_hours: parsed("SYNC_HORIZON_HOURS", 72)?,
            dispatch_mode: match env::var("TASK_DISPATCH").as_deref() {
                Ok("local") => DispatchMode::Local,
                Ok("cloud-tasks") | Err(_) => DispatchMode::CloudTasks,
                Ok(_) => return Err(ConfigError::Invalid("TASK_DISPATCH")),
            },
            storage_backend: match env::var("STORAGE_BACKEND").as_deref() {
                Ok("memory") => StorageBackend::Memory,
                Ok("firestore") | Err(_) => StorageBackend::Firestore,
                Ok(_) => return Err(ConfigError::Invalid("STORAGE_BACKEND")),
            },
            local_workers: parsed("LOCAL_WORKERS", 4)?,

            fitbit_client_secret: required("FITBIT_CLIENT_SECRET")?,
            strava_client_secret: required("STRAVA_CLIENT_SECRET")?,
            fitbit_verification_code: required("FITBIT_VERIFICATION_CODE")?,
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SYNC_HORIZON_RANGE.contains(&self.sync_horizon_hours) {
            return Err(ConfigError::Invalid("SYNC_HORIZON_HOURS"));
        }
        Ok(())
    }

    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            fitbit_client_id: "test_fitbit_id".to_string(),
            strava_client_id: "test_strava_id".to_string(),
            fitbit_subscriber_id: "1".to_string(),
            api_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            tasks_service_account: default_service_account("test-project"),
            port: 8080,
            sync_horizon_hours: 72,
            dispatch_mode: DispatchMode::Local,
            storage_backend: StorageBackend::Memory,
            local_workers: 2,
            fitbit_client_secret: "test_fitbit_secret".to_string(),
            strava_client_secret: "test_strava_secret".to_string(),
            fitbit_verification_code: "test_verification_code".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
        }
    }

    pub fn sync_horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sync_horizon_hours)
    }

    /// Fitbit OAuth redirect URI registered with the app.
    pub fn fitbit_callback_url(&self) -> String {
        format!("{}/auth/fitbit/callback", self.api_url)
    }

    /// Strava OAuth redirect URI registered with the app.
    pub fn strava_callback_url(&self) -> String {
        format!("{}/auth/strava/callback", self.api_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::test_default()
    }
}

fn default_service_account(project_id: &str) -> String {
    format!("fitbit-strava-sync@{}.iam.gserviceaccount.com", project_id)
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
