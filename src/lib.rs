// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fitbit-Strava Sync: copy GPS-tracked Fitbit activities to Strava
//!
//! This crate provides the webhook receiver, OAuth registration flow and
//! per-user reconciliation that uploads each new Fitbit activity to Strava
//! exactly once.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::{Config, DispatchMode};
use db::CredentialStore;
use services::{
    FitbitClient, FitbitService, GoogleOidcVerifier, LocalDispatcher, RefreshLocks, RegistrationService,
    StravaClient, StravaService, SyncEngine, TaskDispatcher, TasksService,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CredentialStore>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub sync_engine: Arc<SyncEngine>,
    pub registration: RegistrationService,
    /// Authenticates Cloud Tasks deliveries to `/tasks/*`
    pub task_verifier: Arc<GoogleOidcVerifier>,
}

impl AppState {
    /// Wire the services around `store` and the two provider clients.
    ///
    /// The dispatcher follows `config.dispatch_mode`.
    pub fn new(
        config: Config,
        store: Arc<dyn CredentialStore>,
        fitbit: FitbitClient,
        strava: StravaClient,
    ) -> Self {
        // Shared across both providers; keys include the provider
        let refresh_locks: RefreshLocks = Arc::new(dashmap::DashMap::new());

        let sync_engine = Arc::new(SyncEngine::new(
            Arc::new(FitbitService::new(
                fitbit.clone(),
                Arc::clone(&store),
                Arc::clone(&refresh_locks),
            )),
            Arc::new(StravaService::new(
                strava.clone(),
                Arc::clone(&store),
                refresh_locks,
            )),
            Arc::clone(&store),
            config.sync_horizon(),
        ));

        let dispatcher: Arc<dyn TaskDispatcher> = match config.dispatch_mode {
            DispatchMode::CloudTasks => Arc::new(TasksService::new(&config)),
            DispatchMode::Local => Arc::new(LocalDispatcher::new(
                Arc::clone(&sync_engine),
                config.local_workers,
            )),
        };

        let registration = RegistrationService::new(
            fitbit,
            strava,
            Arc::clone(&store),
            config.fitbit_subscriber_id.clone(),
            config.fitbit_callback_url(),
        );

        let task_verifier = Arc::new(GoogleOidcVerifier::new(&config));

        Self {
            config,
            store,
            dispatcher,
            sync_engine,
            registration,
            task_verifier,
        }
    }
}
