//! Credential type and claim inspection.
//!
//! Credentials are opaque, server-issued bearer tokens of the form
//! `header.claims.signature`. Only the claims segment is read here, and no
//! signature verification takes place: the claims are trusted as issued.
//!
//! Every inspection is fail-closed. A token that cannot be decoded, or whose
//! claims carry no `exp`, is reported as expired.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Number of dot-separated segments in a well-formed credential
const SEGMENT_COUNT: usize = 3;

/// Standard alphabet, padding optional, lenient on trailing bits.
/// URL-safe input is translated to the standard alphabet before decoding.
const CLAIMS_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Reasons a credential could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Malformed credential: expected 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("Malformed credential: claims segment is not valid base64url")]
    Base64,

    #[error("Malformed credential: claims segment is not valid JSON")]
    Json,

    #[error("Malformed credential: claims segment is not a JSON object")]
    NotAnObject,
}

/// An opaque bearer credential.
///
/// `Debug` is redacted so credentials never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    pub fn claims(&self) -> Option<Claims> {
        decode(&self.0)
    }

    pub fn is_expired(&self) -> bool {
        is_expired(&self.0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired_at(&self.0, now)
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        expiry(&self.0)
    }

    pub fn time_remaining(&self) -> Duration {
        time_remaining(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted, {} bytes>)", self.0.len())
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Decoded claims map of a credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Raw claim lookup
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `exp` in seconds since the epoch. Fractional values are truncated.
    pub fn exp(&self) -> Option<i64> {
        match self.0.get("exp")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// `exp` in milliseconds since the epoch, keeping any fractional second
    pub fn exp_millis(&self) -> Option<i64> {
        match self.0.get("exp")? {
            Value::Number(n) => match n.as_i64() {
                Some(secs) => secs.checked_mul(1000),
                None => n.as_f64().map(|f| (f * 1000.0) as i64),
            },
            _ => None,
        }
    }

    /// Absolute expiry instant derived from `exp`
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.exp_millis()?).single()
    }

    /// Subject identifier: `user_id` if present, otherwise `sub`.
    /// Numeric ids are rendered as strings.
    pub fn subject_id(&self) -> Option<String> {
        ["user_id", "sub"]
            .iter()
            .filter_map(|name| self.0.get(*name))
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn subject_role(&self) -> Option<&str> {
        self.0.get("role").and_then(Value::as_str)
    }

    /// `token_type` claim (`access` / `refresh` for most issuers)
    pub fn token_type(&self) -> Option<&str> {
        self.0.get("token_type").and_then(Value::as_str)
    }
}

/// Decode the claims segment, reporting why decoding failed.
pub fn try_decode(token: &str) -> Result<Claims, CredentialError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != SEGMENT_COUNT {
        return Err(CredentialError::SegmentCount(segments.len()));
    }

    let translated: String = segments[1]
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = CLAIMS_ENGINE
        .decode(translated.as_bytes())
        .map_err(|_| CredentialError::Base64)?;

    match serde_json::from_slice::<Value>(&bytes).map_err(|_| CredentialError::Json)? {
        Value::Object(map) => Ok(Claims(map)),
        _ => Err(CredentialError::NotAnObject),
    }
}

/// Decode the claims segment. Returns `None` on any malformed input.
pub fn decode(token: &str) -> Option<Claims> {
    match try_decode(token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "Credential could not be decoded");
            None
        }
    }
}

/// Expiry instant, if the credential decodes and carries `exp`
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    decode(token)?.expires_at()
}

/// Expired at `now`? The boundary is inclusive: a credential whose expiry
/// equals `now` is already expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Some(expires_at) => now >= expires_at,
        None => true,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// Time left before expiry at `now`, never negative
pub fn time_remaining_at(token: &str, now: DateTime<Utc>) -> Duration {
    match expiry(token) {
        Some(expires_at) if expires_at > now => expires_at - now,
        _ => Duration::zero(),
    }
}

pub fn time_remaining(token: &str) -> Duration {
    time_remaining_at(token, Utc::now())
}
