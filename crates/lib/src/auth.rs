//! HMAC request authentication.
//!
//! The caller signs the exact request body with HMAC-SHA256 using a shared, base64-encoded
//! key and sends `Authorization: HMAC <base64 digest>`. The digest is recomputed here and
//! compared in constant time. There is no nonce or timestamp: an identical body and digest
//! pair is accepted every time it is presented.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SCHEME_PREFIX: &str = "HMAC ";

/// Base64-encoded HMAC key. Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Decode the key bytes.
    pub fn decode(&self) -> Result<Vec<u8>, AuthError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.0.as_bytes())
            .map_err(|_| AuthError::BadSecretEncoding)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    MissingHeader,
    DigestMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized,
    Unauthorized(UnauthorizedReason),
}

impl AuthDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthDecision::Authorized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The configured key is not base64; a deployment fault.
    #[error("failed to decode shared secret")]
    BadSecretEncoding,

    /// The digest supplied by the caller is not base64.
    #[error("failed to decode digest from Authorization header")]
    BadDigestEncoding,
}

/// Decide whether `body` was signed with `secret`.
///
/// Order matters: a missing header is refused before any hashing, and the secret is
/// decoded before the caller's digest so configuration faults surface first.
pub fn authenticate(
    headers: &HeaderMap,
    body: &[u8],
    secret: &SharedSecret,
) -> Result<AuthDecision, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(AuthDecision::Unauthorized(UnauthorizedReason::MissingHeader));
    };
    let computed = mac_bytes(body, secret)?;

    // Non-ASCII header bytes can never be valid base64.
    let value = value.to_str().map_err(|_| AuthError::BadDigestEncoding)?;
    let claimed = value.strip_prefix(SCHEME_PREFIX).unwrap_or(value);
    let claimed = base64::engine::general_purpose::STANDARD
        .decode(claimed.as_bytes())
        .map_err(|_| AuthError::BadDigestEncoding)?;

    if digests_match(&computed, &claimed) {
        Ok(AuthDecision::Authorized)
    } else {
        Ok(AuthDecision::Unauthorized(UnauthorizedReason::DigestMismatch))
    }
}

/// Base64 HMAC-SHA256 of `body`, as a caller would put after `HMAC ` in the header.
pub fn compute_digest(body: &[u8], secret: &SharedSecret) -> Result<String, AuthError> {
    let mac = mac_bytes(body, secret)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac))
}

fn mac_bytes(body: &[u8], secret: &SharedSecret) -> Result<Vec<u8>, AuthError> {
    let key = secret.decode()?;
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| AuthError::BadSecretEncoding)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Slices of different lengths compare unequal.
fn digests_match(computed: &[u8], claimed: &[u8]) -> bool {
    computed.ct_eq(claimed).into()
}
