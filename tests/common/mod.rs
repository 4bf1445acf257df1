// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fitbit_strava_sync::config::Config;
use fitbit_strava_sync::db::{CredentialStore, FirestoreDb, MemoryStore};
use fitbit_strava_sync::error::{AppError, Result};
use fitbit_strava_sync::models::{
    ActivityCategory, ActivityDescriptor, Provider, TokenPair, UserCredential,
};
use fitbit_strava_sync::routes::create_router;
use fitbit_strava_sync::services::{
    ActivityDestination, ActivitySource, FitbitClient, GoogleOidcVerifier, StravaClient,
    SyncUserPayload, TaskDispatcher,
};
use fitbit_strava_sync::AppState;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed instant used across scenarios.
#[allow(dead_code)]
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn token_pair(prefix: &str) -> TokenPair {
    TokenPair {
        access_token: format!("{}_access", prefix),
        refresh_token: format!("{}_refresh", prefix),
    }
}

/// Register `user_id` with placeholder tokens.
#[allow(dead_code)]
pub async fn register(store: &dyn CredentialStore, user_id: &str) {
    store
        .register_user(&UserCredential::new(
            user_id.to_string(),
            token_pair("fb"),
            token_pair("st"),
            Utc::now(),
        ))
        .await
        .unwrap();
}

/// A GPS-tracked run starting at `start`.
#[allow(dead_code)]
pub fn run(id: u64, start: DateTime<Utc>) -> ActivityDescriptor {
    ActivityDescriptor {
        id,
        start_time: start,
        category: ActivityCategory::Run,
        has_positional_data: true,
        is_tracker_recorded: true,
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Records dispatched payloads instead of running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingDispatcher {
    pub fn users(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch_sync(&self, payload: SyncUserPayload) -> Result<()> {
        self.dispatched.lock().unwrap().push(payload.user_id);
        Ok(())
    }
}

// ─── Activity source / destination fakes ────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    pub activities: Mutex<Vec<ActivityDescriptor>>,
    pub failing_exports: Mutex<HashSet<u64>>,
    pub unavailable: AtomicBool,
    pub latest_calls: AtomicUsize,
    pub window_calls: AtomicUsize,
    pub export_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn with(activities: Vec<ActivityDescriptor>) -> Arc<Self> {
        let source = Self::default();
        *source.activities.lock().unwrap() = activities;
        Arc::new(source)
    }

    pub fn push(&self, activity: ActivityDescriptor) {
        self.activities.lock().unwrap().push(activity);
    }

    pub fn fail_export(&self, id: u64) {
        self.failing_exports.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    async fn latest_activity(&self, _user_id: &str) -> Result<Option<ActivityDescriptor>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::upstream(Provider::Fitbit, "HTTP 503"));
        }
        Ok(self
            .activities
            .lock()
            .unwrap()
            .iter()
            .max_by_key(|a| a.start_time)
            .cloned())
    }

    async fn activities_after(
        &self,
        _user_id: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<ActivityDescriptor>> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        let mut window: Vec<_> = self
            .activities
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.start_time > after)
            .cloned()
            .collect();
        window.sort_by_key(|a| a.start_time);
        Ok(window)
    }

    async fn export_tcx(&self, _user_id: &str, activity_id: u64) -> Result<Vec<u8>> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_exports.lock().unwrap().contains(&activity_id) {
            return Err(AppError::upstream(Provider::Fitbit, "HTTP 500"));
        }
        Ok(format!("<TrainingCenterDatabase id=\"{}\"/>", activity_id).into_bytes())
    }
}

#[derive(Default)]
pub struct FakeDestination {
    pub latest: Mutex<Option<DateTime<Utc>>>,
    pub uploads: Mutex<Vec<u64>>,
    pub rejecting: AtomicBool,
}

#[allow(dead_code)]
impl FakeDestination {
    pub fn with_latest(latest: Option<DateTime<Utc>>) -> Arc<Self> {
        let destination = Self::default();
        *destination.latest.lock().unwrap() = latest;
        Arc::new(destination)
    }

    pub fn uploaded(&self) -> Vec<u64> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityDestination for FakeDestination {
    async fn latest_activity_start(&self, _user_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.latest.lock().unwrap())
    }

    async fn upload_tcx(&self, _user_id: &str, source_activity_id: u64, tcx: Vec<u8>) -> Result<()> {
        assert!(!tcx.is_empty());
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(AppError::upstream(Provider::Strava, "upload not created (HTTP 200)"));
        }
        self.uploads.lock().unwrap().push(source_activity_id);
        Ok(())
    }
}

// ─── Cloud Tasks ID tokens ───────────────────────────────────────────────────

const TASKS_TEST_KID: &str = "tasks-test-key";

/// Verifier trusting the key pair in `tests/fixtures` instead of Google's.
#[allow(dead_code)]
pub fn test_task_verifier(config: &Config) -> GoogleOidcVerifier {
    let key = DecodingKey::from_rsa_pem(include_bytes!("../fixtures/tasks_oidc_public.pem"))
        .expect("Failed to load test public key");
    GoogleOidcVerifier::with_static_key(config, TASKS_TEST_KID, key)
}

/// ID token for `email`, addressed to `audience`, signed with the test key.
#[allow(dead_code)]
pub fn tasks_token_for(audience: &str, email: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": "https://accounts.google.com",
        "aud": audience,
        "sub": "109876543210",
        "email": email,
        "email_verified": true,
        "iat": now,
        "exp": now + 3600
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TASKS_TEST_KID.to_string());
    let key = EncodingKey::from_rsa_pem(include_bytes!("../fixtures/tasks_oidc_private.pem"))
        .expect("Failed to load test private key");
    encode(&header, &claims, &key).expect("Failed to sign test token")
}

/// ID token as Cloud Tasks mints it for the sync queue.
#[allow(dead_code)]
pub fn tasks_token(config: &Config) -> String {
    tasks_token_for(&config.api_url, &config.tasks_service_account)
}

// ─── App fixtures ────────────────────────────────────────────────────────────

/// Router wired to an in-memory store and a recording dispatcher.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub dispatcher: Arc<RecordingDispatcher>,
}

/// Create a test app whose provider clients talk to `provider_url`.
#[allow(dead_code)]
pub fn create_test_app_with_provider(provider_url: &str) -> TestApp {
    let config = Config::test_default();
    let store = MemoryStore::new();
    let fitbit = FitbitClient::new(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
    )
    .with_base_url(provider_url);
    let strava = StravaClient::new(
        config.strava_client_id.clone(),
        config.strava_client_secret.clone(),
    )
    .with_base_url(provider_url);

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut state = AppState::new(config, Arc::new(store.clone()), fitbit, strava);
    state.dispatcher = dispatcher.clone();
    state.task_verifier = Arc::new(test_task_verifier(&state.config));
    let state = Arc::new(state);

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        dispatcher,
    }
}

/// Create a test app with no reachable providers.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with_provider("http://127.0.0.1:9")
}

/// Serve `router` on an ephemeral local port and return its base URL.
#[allow(dead_code)]
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
