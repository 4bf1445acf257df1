// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Anti-forgery `state` values and PKCE helpers for the two OAuth flows.
//!
//! A state value is `flow|subject|timestamp_hex|signature_hex`, signed with
//! HMAC-SHA256 and base64url-encoded. `flow` names the provider whose
//! callback will receive it; `subject` carries the Fitbit user ID into the
//! Strava flow and is empty for the Fitbit flow.

use crate::error::AppError;
use crate::models::Provider;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// How long a state value stays valid.
pub const STATE_MAX_AGE_MINUTES: i64 = 15;

const VERIFIER_LEN: usize = 64;

/// Build a signed state value for `flow`.
pub fn sign_state(
    flow: Provider,
    subject: &str,
    now: DateTime<Utc>,
    key: &[u8],
) -> Result<String, AppError> {
    let payload = format!("{}|{}|{:x}", flow.as_str(), subject, now.timestamp_millis());

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let signed = format!("{}|{}", payload, signature);
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify a state value and return its subject.
///
/// `None` if the encoding, signature, flow or age is wrong.
pub fn verify_state(
    state: &str,
    expected_flow: Provider,
    now: DateTime<Utc>,
    key: &[u8],
) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;

    let (payload, signature_hex) = decoded.rsplit_once('|')?;
    let signature = hex::decode(signature_hex).ok()?;

    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(payload.as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::warn!("OAuth state signature mismatch");
        return None;
    }

    let (head, timestamp_hex) = payload.rsplit_once('|')?;
    let (flow, subject) = head.split_once('|')?;

    if flow != expected_flow.as_str() {
        tracing::warn!(flow, expected = expected_flow.as_str(), "OAuth state for wrong flow");
        return None;
    }

    let issued_ms = i64::from_str_radix(timestamp_hex, 16).ok()?;
    let issued = DateTime::<Utc>::from_timestamp_millis(issued_ms)?;
    let age = now.signed_duration_since(issued);
    if age < Duration::zero() || age > Duration::minutes(STATE_MAX_AGE_MINUTES) {
        tracing::warn!(age_secs = age.num_seconds(), "OAuth state expired");
        return None;
    }

    Some(subject.to_string())
}

/// Random PKCE code verifier.
pub fn generate_code_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// S256 code challenge for `verifier`.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY: &[u8] = b"state_signing_key";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn round_trip_returns_subject() {
        let state = sign_state(Provider::Strava, "ABC123", t0(), KEY).unwrap();

        let subject = verify_state(&state, Provider::Strava, t0() + Duration::minutes(1), KEY);

        assert_eq!(subject.as_deref(), Some("ABC123"));
    }

    #[test]
    fn empty_subject_is_allowed() {
        let state = sign_state(Provider::Fitbit, "", t0(), KEY).unwrap();

        assert_eq!(
            verify_state(&state, Provider::Fitbit, t0(), KEY).as_deref(),
            Some("")
        );
    }

    #[test]
    fn wrong_flow_is_rejected() {
        let state = sign_state(Provider::Fitbit, "", t0(), KEY).unwrap();

        assert_eq!(verify_state(&state, Provider::Strava, t0(), KEY), None);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let state = sign_state(Provider::Strava, "ABC123", t0(), KEY).unwrap();

        assert_eq!(
            verify_state(&state, Provider::Strava, t0(), b"other_key"),
            None
        );
    }

    #[test]
    fn expired_state_is_rejected() {
        let state = sign_state(Provider::Strava, "ABC123", t0(), KEY).unwrap();
        let later = t0() + Duration::minutes(STATE_MAX_AGE_MINUTES + 1);

        assert_eq!(verify_state(&state, Provider::Strava, later, KEY), None);
    }

    #[test]
    fn tampered_subject_is_rejected() {
        let state = sign_state(Provider::Strava, "ABC123", t0(), KEY).unwrap();
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&state).unwrap()).unwrap();
        let forged = URL_SAFE_NO_PAD.encode(decoded.replace("ABC123", "EVE999"));

        assert_eq!(verify_state(&forged, Provider::Strava, t0(), KEY), None);
    }

    #[test]
    fn malformed_state_is_rejected() {
        assert_eq!(verify_state("!!!", Provider::Fitbit, t0(), KEY), None);
        let encoded = URL_SAFE_NO_PAD.encode("fitbit|deadbeef");
        assert_eq!(verify_state(&encoded, Provider::Fitbit, t0(), KEY), None);
    }

    #[test]
    fn verifier_is_alphanumeric() {
        let verifier = generate_code_verifier();

        assert_eq!(verifier.len(), VERIFIER_LEN);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn challenge_matches_rfc7636_example() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
