// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes, called by Cloud Tasks.

use crate::error::AppError;
use crate::middleware::tasks_auth::require_tasks_auth;
use crate::services::tasks::{SyncUserPayload, SYNC_USER_PATH};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::sync::Arc;

/// Task routes, reachable only with the sync queue's ID token.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(SYNC_USER_PATH, post(sync_user))
        .route_layer(middleware::from_fn_with_state(state, require_tasks_auth))
}

/// Run one reconciliation pass.
///
/// Upstream failures are logged and acknowledged so the queue does not retry;
/// the next notification for the user picks the work up again. Store
/// failures return 500 so the task is redelivered.
async fn sync_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SyncUserPayload>,
) -> Response {
    tracing::info!(user_id = %payload.user_id, "Sync task received");

    match state.sync_engine.reconcile(&payload.user_id).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e @ AppError::Database(_)) => e.into_response(),
        Err(e) => {
            tracing::warn!(
                user_id = %payload.user_id,
                error = %e,
                "Sync pass aborted"
            );
            StatusCode::OK.into_response()
        }
    }
}
