// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks request guard.
//!
//! Deliveries from the sync queue carry its name in `X-CloudTasks-QueueName`
//! and a Google-signed ID token for our task service account.

use crate::config::SYNC_QUEUE_NAME;
use crate::services::OidcError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header Cloud Tasks sets to the name of the delivering queue.
pub const QUEUE_NAME_HEADER: &str = "x-cloudtasks-queuename";

/// Require the sync queue's name header and a valid task ID token on
/// `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let queue_name_header = request.headers().get(QUEUE_NAME_HEADER);
    let is_valid_queue = queue_name_header
        .and_then(|h| h.to_str().ok())
        .map(|name| name == SYNC_QUEUE_NAME)
        .unwrap_or(false);

    if !is_valid_queue {
        tracing::warn!(
            header = ?queue_name_header,
            "Blocked tasks request with invalid queue header"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let caller = state
        .task_verifier
        .verify(request.headers().get(header::AUTHORIZATION))
        .await
        .map_err(|err| match err {
            OidcError::Forbidden(reason) => {
                tracing::warn!(reason = %reason, "Blocked tasks request: invalid ID token");
                StatusCode::FORBIDDEN
            }
            OidcError::Transient(reason) => {
                tracing::error!(reason = %reason, "Could not verify tasks ID token");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    tracing::debug!(email = %caller.email, subject = %caller.subject, "Task caller verified");

    Ok(next.run(request).await)
}
