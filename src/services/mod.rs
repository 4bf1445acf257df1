// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod fitbit;
pub mod google_oidc;
mod http;
pub mod ingest;
pub mod oauth_state;
pub mod registration;
pub mod signature;
pub mod strava;
pub mod sync;
pub mod tasks;
pub mod token;

pub use fitbit::{FitbitClient, FitbitService};
pub use google_oidc::{GoogleOidcVerifier, OidcError, TaskCaller};
pub use registration::RegistrationService;
pub use strava::{StravaClient, StravaService};
pub use sync::{ActivityDestination, ActivitySource, SyncEngine, SyncOutcome, SyncReport};
pub use tasks::{LocalDispatcher, SyncUserPayload, TaskDispatcher, TasksService};
pub use token::{RefreshLocks, TokenManager, TokenRefresher};
