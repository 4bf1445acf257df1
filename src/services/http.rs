// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Response classification shared by the provider clients.

use crate::error::AppError;
use crate::models::Provider;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Pass through a successful response; map everything else to an error.
///
/// `401` becomes [`AppError::ProviderUnauthorized`] so the token manager can
/// refresh and retry. Everything else is an upstream failure.
pub(crate) async fn check_response(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::ProviderUnauthorized(provider));
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(provider = %provider, "Rate limit hit (429)");
        return Err(AppError::upstream(provider, "rate limit exceeded"));
    }

    Err(AppError::upstream(
        provider,
        format!("HTTP {}: {}", status, body),
    ))
}

/// Check response and parse JSON body.
pub(crate) async fn check_response_json<T: DeserializeOwned>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T, AppError> {
    check_response(provider, response)
        .await?
        .json()
        .await
        .map_err(|e| AppError::upstream(provider, format!("JSON parse error: {}", e)))
}

/// Map a transport failure (DNS, TLS, timeout) to an upstream error.
pub(crate) fn transport_error(provider: Provider) -> impl Fn(reqwest::Error) -> AppError {
    move |e| AppError::upstream(provider, e.to_string())
}
