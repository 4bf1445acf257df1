// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth registration routes: Fitbit (PKCE) first, then Strava.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::Provider;
use crate::services::fitbit::{FITBIT_AUTHORIZE_URL, FITBIT_SCOPES};
use crate::services::oauth_state::{code_challenge, generate_code_verifier, sign_state, verify_state};
use crate::services::strava::{STRAVA_AUTHORIZE_URL, STRAVA_SCOPES};
use crate::AppState;

/// Cookie holding the PKCE verifier between `/auth/fitbit` and its callback.
pub const VERIFIER_COOKIE: &str = "fitbit_pkce_verifier";

const COOKIE_PATH: &str = "/auth";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/fitbit", get(fitbit_start))
        .route("/auth/fitbit/callback", get(fitbit_callback))
        .route("/auth/strava/callback", get(strava_callback))
}

/// Query parameters delivered to either callback.
#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    /// Strava reports the scopes the user actually granted.
    #[serde(default)]
    scope: Option<String>,
}

impl CallbackParams {
    /// Code and state, or 401 if the provider reported an error or either
    /// is missing.
    fn code_and_state(&self, provider: Provider) -> Result<(&str, &str)> {
        if let Some(error) = &self.error {
            tracing::warn!(provider = %provider, error = %error, "Authorization denied by provider");
            return Err(AppError::Unauthorized);
        }
        match (self.code.as_deref(), self.state.as_deref()) {
            (Some(code), Some(state)) if !code.is_empty() => Ok((code, state)),
            _ => {
                tracing::warn!(provider = %provider, "Callback without code or state");
                Err(AppError::Unauthorized)
            }
        }
    }
}

/// Start registration: redirect to Fitbit with a PKCE challenge.
async fn fitbit_start(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let verifier = generate_code_verifier();
    let oauth_state = sign_state(Provider::Fitbit, "", Utc::now(), &state.config.oauth_state_key)?;

    let auth_url = format!(
        "{}?client_id={}&response_type=code&code_challenge={}&code_challenge_method=S256&scope={}&redirect_uri={}&state={}",
        FITBIT_AUTHORIZE_URL,
        urlencoding::encode(&state.config.fitbit_client_id),
        code_challenge(&verifier),
        urlencoding::encode(FITBIT_SCOPES),
        urlencoding::encode(&state.config.fitbit_callback_url()),
        oauth_state
    );

    let cookie = Cookie::build((VERIFIER_COOKIE, verifier))
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(state.config.api_url.starts_with("https://"))
        .same_site(SameSite::Lax);

    tracing::info!(
        client_id = %state.config.fitbit_client_id,
        "Starting registration, redirecting to Fitbit"
    );

    Ok((jar.add(cookie), Redirect::temporary(&auth_url)))
}

/// Fitbit callback: exchange the code, park the tokens, continue to Strava.
async fn fitbit_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect)> {
    let (code, oauth_state) = params.code_and_state(Provider::Fitbit)?;

    if verify_state(oauth_state, Provider::Fitbit, Utc::now(), &state.config.oauth_state_key)
        .is_none()
    {
        return Err(AppError::Unauthorized);
    }

    let verifier = jar
        .get(VERIFIER_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| {
            tracing::warn!("Fitbit callback without PKCE verifier cookie");
            AppError::Unauthorized
        })?;

    let user_id = state
        .registration
        .complete_fitbit(code, &verifier)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Fitbit code exchange failed");
            AppError::Unauthorized
        })?;

    let strava_state = sign_state(
        Provider::Strava,
        &user_id,
        Utc::now(),
        &state.config.oauth_state_key,
    )?;

    let auth_url = format!(
        "{}?client_id={}&response_type=code&approval_prompt=auto&scope={}&redirect_uri={}&state={}",
        STRAVA_AUTHORIZE_URL,
        urlencoding::encode(&state.config.strava_client_id),
        urlencoding::encode(STRAVA_SCOPES),
        urlencoding::encode(&state.config.strava_callback_url()),
        strava_state
    );

    tracing::info!(user_id = %user_id, "Redirecting to Strava");

    let jar = jar.remove(Cookie::build(VERIFIER_COOKIE).path(COOKIE_PATH));
    Ok((jar, Redirect::temporary(&auth_url)))
}

/// Strava callback: exchange the code, subscribe, and create the credential.
async fn strava_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let (code, oauth_state) = params.code_and_state(Provider::Strava)?;

    let user_id = verify_state(
        oauth_state,
        Provider::Strava,
        Utc::now(),
        &state.config.oauth_state_key,
    )
    .filter(|subject| !subject.is_empty())
    .ok_or(AppError::Unauthorized)?;

    if let Some(scope) = &params.scope {
        if !scope.split(',').any(|s| s == "activity:write") {
            tracing::warn!(user_id = %user_id, scope = %scope, "Strava upload scope not granted");
            return Err(AppError::Unauthorized);
        }
    }

    let is_new = state
        .registration
        .complete_strava(&user_id, code)
        .await
        .map_err(|e| {
            tracing::warn!(user_id = %user_id, error = %e, "Strava registration failed");
            AppError::Unauthorized
        })?;

    tracing::info!(user_id = %user_id, is_new, "User registered");

    Ok(Redirect::temporary(&format!(
        "{}/registered",
        state.config.frontend_url
    )))
}
