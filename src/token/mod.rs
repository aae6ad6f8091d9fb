//! OAuth2 Token Lifecycle
//!
//! Token set types, storage collaborator, and the manager that keeps access
//! tokens fresh with single-flight refresh.

pub mod manager;
pub mod storage;

pub use manager::{OAuth2TokenManager, TokenManagerConfig};
pub use storage::{InMemoryTokenStorage, TokenStorage};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A stored OAuth2 credential pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// Access token expiry as epoch milliseconds; `None` = never expires.
    pub expires_at: Option<u64>,
    /// Granted scope.
    pub scope: Option<String>,
    /// When this set was first stored (epoch ms).
    pub created_at: u64,
    /// When this set was last updated (epoch ms).
    pub updated_at: u64,
}

impl TokenSet {
    /// Whether the access token is expired or expires within `skew_ms`.
    pub fn expires_within(&self, skew_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms() + skew_ms >= expires_at,
            None => false,
        }
    }
}

/// Token endpoint response (RFC 6749 Section 5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert to a stored token set, stamping expiry from `expires_in`.
    pub fn into_token_set(self) -> TokenSet {
        let now = now_ms();
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.map(|secs| now + secs * 1000),
            scope: self.scope,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_within_skew() {
        let now = now_ms();
        let set = TokenSet {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: Some(now + 30_000),
            scope: None,
            created_at: now,
            updated_at: now,
        };

        assert!(set.expires_within(60_000));
        assert!(!set.expires_within(1_000));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let now = now_ms();
        let set = TokenSet {
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
            created_at: now,
            updated_at: now,
        };

        assert!(!set.expires_within(u64::MAX / 2));
    }

    #[test]
    fn test_response_into_token_set() {
        let response = TokenResponse {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("rt".to_string()),
            scope: Some("read".to_string()),
        };

        let set = response.into_token_set();
        assert_eq!(set.access_token, "at");
        assert!(set.expires_at.unwrap() > now_ms());
    }
}
