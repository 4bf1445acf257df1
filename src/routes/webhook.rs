// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Fitbit subscription notifications.

use crate::error::{AppError, Result};
use crate::services::{ingest, signature};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/fitbit", get(verify).post(handle_notifications))
}

/// Fitbit subscriber verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    verify: Option<String>,
}

/// Subscriber verification handshake (GET).
///
/// Fitbit calls this twice when a subscriber is added: once with the right
/// code (expects 204) and once with a wrong one (expects 404).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> StatusCode {
    match params.verify {
        Some(code) if code == state.config.fitbit_verification_code => {
            tracing::info!("Fitbit subscriber verified");
            StatusCode::NO_CONTENT
        }
        _ => {
            tracing::warn!("Fitbit subscriber verification failed: wrong code");
            StatusCode::NOT_FOUND
        }
    }
}

/// Receive a notification batch (POST).
///
/// The signature covers the raw body, so it is read as bytes before any
/// parsing. Sync tasks are dispatched before responding but never awaited.
async fn handle_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let provided = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    if !signature::verify(&body, provided, &state.config.fitbit_client_secret) {
        tracing::warn!(
            has_header = provided.is_some(),
            bytes = body.len(),
            "Rejected notification with invalid signature"
        );
        return Err(AppError::InvalidSignature);
    }

    let result = ingest::dispatch_batch(state.dispatcher.as_ref(), &body).await;
    if !result.is_complete_success() {
        tracing::error!(failed = ?result.failed, "Some sync tasks were not dispatched");
    }

    Ok(StatusCode::NO_CONTENT)
}
