// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Response hardening headers.

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Headers set on every response. No endpoint serves a page, so nothing may
/// be framed, sniffed or loaded.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
    // Authorization codes travel in callback URLs
    ("referrer-policy", "no-referrer"),
];

/// Paths whose responses carry OAuth redirects or the PKCE cookie.
const AUTH_PREFIX: &str = "/auth/";

/// Add security headers to all responses, and `Cache-Control: no-store` to
/// the registration flow.
pub async fn add_security_headers(req: Request, next: Next) -> Response {
    let is_auth = req.uri().path().starts_with(AUTH_PREFIX);
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    for &(name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    if is_auth {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    response
}
