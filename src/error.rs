// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::Provider;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// OAuth completion failed (bad state, failed exchange, missing fields).
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The provider rejected our access token.
    #[error("{0} rejected the access token")]
    ProviderUnauthorized(Provider),

    #[error("{provider} API error: {message}")]
    Upstream { provider: Provider, message: String },

    #[error("{provider} token refresh failed: {message}")]
    CredentialRefresh { provider: Provider, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for an upstream failure from `provider`.
    pub fn upstream(provider: Provider, message: impl Into<String>) -> Self {
        AppError::Upstream {
            provider,
            message: message.into(),
        }
    }

    /// True if the error means the access token was rejected and a refresh
    /// may fix it.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::ProviderUnauthorized(_))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidSignature => (StatusCode::BAD_REQUEST, "invalid_signature", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::ProviderUnauthorized(provider) => {
                tracing::warn!(provider = %provider, "Provider rejected credentials");
                (StatusCode::BAD_GATEWAY, "upstream_unauthorized", None)
            }
            AppError::Upstream { provider, message } => {
                tracing::warn!(provider = %provider, error = %message, "Upstream error");
                (StatusCode::BAD_GATEWAY, "upstream_error", None)
            }
            AppError::CredentialRefresh { provider, message } => {
                tracing::error!(provider = %provider, error = %message, "Credential refresh failed");
                (StatusCode::BAD_GATEWAY, "credential_refresh_failed", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
