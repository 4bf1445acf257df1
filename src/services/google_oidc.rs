// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Verification of the Google-signed ID token Cloud Tasks attaches to each
//! sync task delivery.
//!
//! The service also serves the public webhook and OAuth callbacks, so it
//! allows unauthenticated invocation and has to check task callers itself.

use crate::config::Config;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: &[&str] = &["https://accounts.google.com", "accounts.google.com"];
const CERTS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_KEYS_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Why a task caller was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    /// The token is missing or was not issued to our queue. Answer 403.
    Forbidden(String),
    /// Google's signing keys could not be fetched. Answer 500 so the task is
    /// redelivered.
    Transient(String),
}

/// Claims of an ID token that passed verification.
#[derive(Debug, Clone)]
pub struct TaskCaller {
    pub email: String,
    pub subject: String,
}

enum KeySource {
    /// Google's published certificates, cached by `Cache-Control: max-age`.
    Google {
        http: reqwest::Client,
        cache: RwLock<Option<CachedKeys>>,
        refresh: Mutex<()>,
    },
    /// One fixed key, for local runs and tests.
    Static { kid: String, key: Arc<DecodingKey> },
}

struct CachedKeys {
    by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Checks that a `/tasks/*` request came from our own Cloud Tasks queue.
pub struct GoogleOidcVerifier {
    audience: String,
    service_account: String,
    keys: KeySource,
}

impl GoogleOidcVerifier {
    /// Verifier expecting tokens minted for `config.api_url` on behalf of
    /// `config.tasks_service_account`.
    pub fn new(config: &Config) -> Self {
        Self {
            audience: config.api_url.trim_end_matches('/').to_string(),
            service_account: config.tasks_service_account.clone(),
            keys: KeySource::Google {
                http: reqwest::Client::new(),
                cache: RwLock::new(None),
                refresh: Mutex::new(()),
            },
        }
    }

    /// Verifier that trusts a single RSA public key instead of Google's.
    pub fn with_static_key(config: &Config, kid: impl Into<String>, key: DecodingKey) -> Self {
        Self {
            keys: KeySource::Static {
                kid: kid.into(),
                key: Arc::new(key),
            },
            ..Self::new(config)
        }
    }

    /// Verify the `Authorization: Bearer` ID token of a task delivery.
    pub async fn verify(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<TaskCaller, OidcError> {
        let token = bearer_token(authorization)?;

        let header = decode_header(token)
            .map_err(|e| OidcError::Forbidden(format!("invalid JWT header: {}", e)))?;
        if header.alg != Algorithm::RS256 {
            return Err(OidcError::Forbidden(format!("unexpected alg {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| OidcError::Forbidden("missing kid".to_string()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(GOOGLE_ISSUERS);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<IdTokenClaims>(token, key.as_ref(), &validation)
            .map_err(|e| OidcError::Forbidden(format!("JWT rejected: {}", e)))?
            .claims;

        if claims.email.as_deref() != Some(self.service_account.as_str()) {
            return Err(OidcError::Forbidden(format!(
                "unexpected caller {:?}",
                claims.email
            )));
        }
        if claims.email_verified != Some(true) {
            return Err(OidcError::Forbidden("email not verified".to_string()));
        }

        Ok(TaskCaller {
            email: self.service_account.clone(),
            subject: claims.sub,
        })
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        let (http, cache, refresh) = match &self.keys {
            KeySource::Static { kid: known, key } if known == kid => return Ok(Arc::clone(key)),
            KeySource::Static { .. } => {
                return Err(OidcError::Forbidden(format!("unknown kid {}", kid)))
            }
            KeySource::Google {
                http,
                cache,
                refresh,
            } => (http, cache, refresh),
        };

        if let Some(key) = cached_key(cache, kid).await {
            return Ok(key);
        }

        // Google rotates keys; a miss forces one refetch
        let _guard = refresh.lock().await;
        if let Some(key) = cached_key(cache, kid).await {
            return Ok(key);
        }
        let fresh = fetch_google_keys(http).await?;
        let key = fresh.by_kid.get(kid).cloned();
        *cache.write().await = Some(fresh);

        key.ok_or_else(|| OidcError::Forbidden(format!("kid {} not among Google's keys", kid)))
    }
}

async fn cached_key(cache: &RwLock<Option<CachedKeys>>, kid: &str) -> Option<Arc<DecodingKey>> {
    cache
        .read()
        .await
        .as_ref()
        .filter(|keys| keys.expires_at > Instant::now())
        .and_then(|keys| keys.by_kid.get(kid).cloned())
}

async fn fetch_google_keys(http: &reqwest::Client) -> Result<CachedKeys, OidcError> {
    let response = http
        .get(GOOGLE_CERTS_URL)
        .timeout(CERTS_TIMEOUT)
        .send()
        .await
        .map_err(|e| OidcError::Transient(format!("certs request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(OidcError::Transient(format!(
            "certs request returned {}",
            response.status()
        )));
    }

    let ttl = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(max_age)
        .unwrap_or(DEFAULT_KEYS_TTL);

    let jwks: Jwks = response
        .json()
        .await
        .map_err(|e| OidcError::Transient(format!("invalid certs JSON: {}", e)))?;

    let by_kid: HashMap<_, _> = jwks
        .keys
        .into_iter()
        .filter(|jwk| jwk.kty == "RSA" && matches!(jwk.alg.as_deref(), None | Some("RS256")))
        .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => Some((jwk.kid, Arc::new(key))),
            Err(e) => {
                tracing::warn!(kid = %jwk.kid, error = %e, "Skipping unusable Google key");
                None
            }
        })
        .collect();

    if by_kid.is_empty() {
        return Err(OidcError::Transient("no usable RSA keys".to_string()));
    }

    tracing::debug!(keys = by_kid.len(), ttl_secs = ttl.as_secs(), "Refreshed Google keys");
    Ok(CachedKeys {
        by_kid,
        expires_at: Instant::now() + ttl,
    })
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
}

fn bearer_token(authorization: Option<&HeaderValue>) -> Result<&str, OidcError> {
    authorization
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| OidcError::Forbidden("missing bearer token".to_string()))
}

/// `max-age` from a `Cache-Control` value.
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim_matches('"').parse().ok())
        .map(Duration::from_secs)
}
