// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit webhook signature verification.
//!
//! Fitbit signs each notification body with HMAC-SHA1 keyed by
//! `<client_secret>&` and sends the base64 digest in `X-Fitbit-Signature`.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the notification signature.
pub const SIGNATURE_HEADER: &str = "x-fitbit-signature";

/// Compute the base64 signature Fitbit would send for `body`.
pub fn sign(body: &[u8], shared_secret: &str) -> Result<String, AppError> {
    let key = format!("{}&", shared_secret);
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check `signature` against the HMAC of the unmodified `body`.
///
/// A missing header is simply a mismatch.
pub fn verify(body: &[u8], signature: Option<&str>, shared_secret: &str) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    match sign(body, shared_secret) {
        Ok(expected) => expected.as_bytes().ct_eq(signature.as_bytes()).into(),
        Err(_) => false,
    }
}
