//! Webhook signature verification.
//!
//! HMAC-SHA256 over the raw request body, with constant-time comparison.
//! Two schemes cover the providers we receive from: a plain prefixed digest
//! (GitHub's `X-Hub-Signature-256: sha256=<hex>`) and a timestamp-bound
//! digest (Slack's `v0:<ts>:<body>` base string with a tolerance window).

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::errors::{IntegrationResult, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Default timestamp tolerance (5 minutes).
const DEFAULT_TIMESTAMP_TOLERANCE_SECS: u64 = 300;

/// Provider-specific signature scheme.
pub enum SignatureScheme {
    /// `<prefix><hex(hmac_sha256(secret, body))>` carried in one header.
    HmacSha256 {
        header: String,
        prefix: String,
        secret: SecretString,
    },
    /// `<version>=<hex(hmac_sha256(secret, "<version>:<ts>:<body>"))>` with
    /// the timestamp in a second header, bound to a tolerance window.
    TimestampedHmacSha256 {
        signature_header: String,
        timestamp_header: String,
        version: String,
        tolerance: Duration,
        secret: SecretString,
    },
}

impl SignatureScheme {
    /// Plain prefixed HMAC scheme (GitHub style).
    pub fn hmac_sha256(
        header: impl Into<String>,
        prefix: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self::HmacSha256 {
            header: header.into(),
            prefix: prefix.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Timestamp-bound HMAC scheme (Slack style).
    pub fn timestamped_hmac_sha256(
        signature_header: impl Into<String>,
        timestamp_header: impl Into<String>,
        version: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self::TimestampedHmacSha256 {
            signature_header: signature_header.into(),
            timestamp_header: timestamp_header.into(),
            version: version.into(),
            tolerance: Duration::from_secs(DEFAULT_TIMESTAMP_TOLERANCE_SECS),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Set the timestamp tolerance (timestamped scheme only).
    pub fn with_tolerance(mut self, new_tolerance: Duration) -> Self {
        if let Self::TimestampedHmacSha256 { tolerance, .. } = &mut self {
            *tolerance = new_tolerance;
        }
        self
    }

    /// Verify a delivery against the raw, unparsed body.
    pub fn verify(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> IntegrationResult<()> {
        match self {
            Self::HmacSha256 {
                header,
                prefix,
                secret,
            } => {
                let provided = required_header(headers, header)?;
                let provided = provided.strip_prefix(prefix.as_str()).ok_or_else(|| {
                    warn!(header, "signature missing expected prefix");
                    WebhookError::InvalidSignature
                })?;

                let expected = hmac_hex(secret, body);
                verify_hex(provided, &expected)
            }
            Self::TimestampedHmacSha256 {
                signature_header,
                timestamp_header,
                version,
                tolerance,
                secret,
            } => {
                let provided = required_header(headers, signature_header)?;
                let timestamp = required_header(headers, timestamp_header)?;

                let ts: i64 = timestamp.parse().map_err(|_| {
                    WebhookError::InvalidPayload {
                        message: format!("invalid timestamp: {timestamp}"),
                    }
                })?;
                verify_timestamp(ts, *tolerance)?;

                let prefix = format!("{version}=");
                let provided = provided.strip_prefix(prefix.as_str()).ok_or_else(|| {
                    warn!(header = signature_header, "signature missing version prefix");
                    WebhookError::InvalidSignature
                })?;

                let mut base = format!("{version}:{timestamp}:").into_bytes();
                base.extend_from_slice(body);
                let expected = hmac_hex(secret, &base);
                verify_hex(provided, &expected)
            }
        }
    }
}

impl std::fmt::Debug for SignatureScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HmacSha256 { header, .. } => f
                .debug_struct("HmacSha256")
                .field("header", header)
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::TimestampedHmacSha256 {
                signature_header,
                timestamp_header,
                ..
            } => f
                .debug_struct("TimestampedHmacSha256")
                .field("signature_header", signature_header)
                .field("timestamp_header", timestamp_header)
                .field("secret", &"[REDACTED]")
                .finish(),
        }
    }
}

fn required_header<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| WebhookError::MissingHeader {
            header: name.to_string(),
        })
}

fn hmac_hex(secret: &SecretString, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_hex(provided: &str, expected: &str) -> IntegrationResult<()> {
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        warn!("signature verification failed");
        Err(WebhookError::InvalidSignature.into())
    }
}

fn verify_timestamp(timestamp: i64, tolerance: Duration) -> Result<(), WebhookError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    if (now - timestamp).abs() > tolerance.as_secs() as i64 {
        warn!(timestamp, now, "webhook timestamp outside tolerance");
        return Err(WebhookError::ExpiredTimestamp { timestamp });
    }
    Ok(())
}

/// Compute a prefixed HMAC-SHA256 signature (used by tests and senders).
pub fn compute_signature(secret: &str, prefix: &str, body: &[u8]) -> String {
    let secret = SecretString::new(secret.to_string());
    format!("{prefix}{}", hmac_hex(&secret, body))
}

/// Compute a timestamp-bound signature over `<version>:<ts>:<body>`.
pub fn compute_timestamped_signature(
    secret: &str,
    version: &str,
    timestamp: i64,
    body: &[u8],
) -> String {
    let secret = SecretString::new(secret.to_string());
    let mut base = format!("{version}:{timestamp}:").into_bytes();
    base.extend_from_slice(body);
    format!("{version}={}", hmac_hex(&secret, &base))
}
