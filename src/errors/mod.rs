//! Integration Error Types
//!
//! One error hierarchy for the whole integration core, with classifiers
//! that drive retry, circuit breaking, and re-authorization decisions.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// HTTP status codes that are worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Root error type for the integration core.
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<IntegrationError>,
    },

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl IntegrationError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Api(_) => "INT_API",
            Self::Transport(_) => "INT_TRANSPORT",
            Self::CircuitOpen { .. } => "INT_CIRCUIT_OPEN",
            Self::RateLimited { .. } => "INT_RATE_LIMITED",
            Self::RetriesExhausted { .. } => "INT_RETRIES_EXHAUSTED",
            Self::Token(_) => "INT_TOKEN",
            Self::Webhook(_) => "INT_WEBHOOK",
            Self::Sync(_) => "INT_SYNC",
            Self::Storage(_) => "INT_STORAGE",
            Self::Protocol(_) => "INT_PROTOCOL",
            Self::Configuration { .. } => "INT_CONFIG",
        }
    }

    /// Check if the error is transient and worth retrying.
    ///
    /// Retryable: timeouts, connection failures, 408/429 and 5xx statuses.
    /// Never retryable: other 4xx, signature/auth failures, open circuit.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::Transport(e) => e.is_retryable(),
            Self::CircuitOpen { .. } => false,
            Self::RateLimited { .. } => true,
            Self::RetriesExhausted { .. } => false,
            _ => false,
        }
    }

    /// Get retry-after duration if the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(e) => e.retry_after(),
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::CircuitOpen { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Check if the error requires restarting the OAuth2 flow.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::ReauthorizationRequired { .. })
                | Self::Token(TokenError::NoRefreshToken)
        )
    }
}

/// Non-success HTTP response from a remote API.
#[derive(Error, Debug)]
#[error("HTTP {status}: {body}")]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Response headers (lowercased names).
    pub headers: HashMap<String, String>,
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        RETRYABLE_STATUS_CODES.contains(&self.status)
    }

    /// Retry-After header in seconds, if present.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Transport-level failure (no HTTP response received).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("DNS resolution failed: {host}")]
    DnsFailed { host: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        // All transport failures are transient from the caller's view.
        true
    }
}

/// Token lifecycle error.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("No token stored for key: {key}")]
    NotFound { key: String },

    #[error("Token expired")]
    Expired,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String },

    #[error("Re-authorization required: {message}")]
    ReauthorizationRequired { message: String },
}

/// Webhook receipt error.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Unknown webhook provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("Missing required header: {header}")]
    MissingHeader { header: String },

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance: {timestamp}")]
    ExpiredTimestamp { timestamp: i64 },

    #[error("Invalid webhook payload: {message}")]
    InvalidPayload { message: String },

    #[error("Processor failed for event {event_id}: {message}")]
    ProcessorFailed { event_id: String, message: String },
}

/// Sync pass error.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch changes from {origin}: {message}")]
    FetchFailed { origin: String, message: String },

    #[error("Failed to apply change {id}: {message}")]
    ApplyFailed { id: String, message: String },

    #[error("Checkpoint store failed: {message}")]
    CheckpointFailed { message: String },
}

/// Collaborator persistence error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },
}

/// Response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Result type for integration operations.
pub type IntegrationResult<T> = Result<T, IntegrationError>;

/// OAuth2 error response body from a token endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Map a token endpoint failure to a domain error.
///
/// `invalid_grant` means the refresh token was revoked or consumed; the
/// caller must restart the authorization flow.
pub fn map_token_endpoint_error(status: u16, body: &str) -> IntegrationError {
    if let Ok(response) = serde_json::from_str::<OAuth2ErrorResponse>(body) {
        let description = response
            .error_description
            .clone()
            .unwrap_or_else(|| response.error.clone());
        return match response.error.as_str() {
            "invalid_grant" => IntegrationError::Token(TokenError::ReauthorizationRequired {
                message: description,
            }),
            _ => IntegrationError::Token(TokenError::RefreshFailed {
                message: description,
            }),
        };
    }

    if RETRYABLE_STATUS_CODES.contains(&status) {
        IntegrationError::Api(ApiError {
            status,
            body: body.to_string(),
            headers: HashMap::new(),
        })
    } else {
        IntegrationError::Token(TokenError::RefreshFailed {
            message: format!("HTTP {status}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16) -> IntegrationError {
        IntegrationError::Api(ApiError {
            status,
            body: String::new(),
            headers: HashMap::new(),
        })
    }

    #[test]
    fn test_retryable_statuses() {
        for status in RETRYABLE_STATUS_CODES {
            assert!(api_error(status).is_retryable(), "status {status}");
        }
        assert!(!api_error(404).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(400).is_retryable());
    }

    #[test]
    fn test_transport_is_retryable() {
        let error = IntegrationError::Transport(TransportError::Timeout {
            timeout: Duration::from_secs(30),
        });
        assert!(error.is_retryable());
    }

    #[test]
    fn test_circuit_open_not_retryable() {
        let error = IntegrationError::CircuitOpen { retry_after: None };
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_retry_after_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "17".to_string());
        let error = IntegrationError::Api(ApiError {
            status: 429,
            body: String::new(),
            headers,
        });
        assert_eq!(error.retry_after(), Some(Duration::from_secs(17)));
    }

    #[test]
    fn test_invalid_grant_needs_reauth() {
        let body = r#"{"error":"invalid_grant","error_description":"revoked"}"#;
        let error = map_token_endpoint_error(400, body);
        assert!(error.needs_reauth());
    }

    #[test]
    fn test_other_token_error_does_not_need_reauth() {
        let body = r#"{"error":"invalid_request"}"#;
        let error = map_token_endpoint_error(400, body);
        assert!(!error.needs_reauth());
    }
}
