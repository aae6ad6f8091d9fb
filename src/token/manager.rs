//! Token Manager
//!
//! Keeps access tokens valid: authorization-code exchange, expiry checks
//! against a skew margin, and single-flight refresh so concurrent readers
//! never issue duplicate refresh requests (some providers invalidate the
//! prior refresh token on use).

use base64::Engine;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{
    map_token_endpoint_error, IntegrationError, IntegrationResult, ProtocolError, TokenError,
};
use crate::token::storage::TokenStorage;
use crate::token::{TokenResponse, TokenSet};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Authorization endpoint for the redirect URL.
    pub authorization_endpoint: String,
    /// Token endpoint for exchange and refresh.
    pub token_endpoint: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret, sent via HTTP Basic.
    pub client_secret: SecretString,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Margin before expiry at which a token counts as expiring.
    pub refresh_skew: Duration,
    /// Timeout for token endpoint calls.
    pub timeout: Duration,
}

impl TokenManagerConfig {
    /// Create a configuration with a 60s skew and 30s timeout.
    pub fn new(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            refresh_skew: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the refresh skew margin.
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }
}

/// OAuth2 token manager with per-key single-flight refresh.
pub struct OAuth2TokenManager<T: HttpTransport, S: TokenStorage> {
    config: TokenManagerConfig,
    transport: Arc<T>,
    storage: Arc<S>,
    /// Per-key refresh guards; concurrent readers of an expiring token
    /// serialize here and re-check storage once admitted.
    refresh_guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: HttpTransport, S: TokenStorage> OAuth2TokenManager<T, S> {
    /// Create a token manager.
    pub fn new(config: TokenManagerConfig, transport: Arc<T>, storage: Arc<S>) -> Self {
        Self {
            config,
            transport,
            storage,
            refresh_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Build the authorization URL for the user redirect.
    pub fn authorization_url(&self, state: &str, scopes: &[&str]) -> String {
        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("state", state.to_string()),
        ];
        if !scopes.is_empty() {
            params.push(("scope", scopes.join(" ")));
        }

        let query = serde_urlencoded::to_string(params).unwrap_or_default();
        format!("{}?{}", self.config.authorization_endpoint, query)
    }

    /// Exchange an authorization code for tokens and persist them.
    pub async fn exchange_code(&self, key: &str, code: &str) -> IntegrationResult<TokenSet> {
        let body = serde_urlencoded::to_string([
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .unwrap_or_default();

        let response = self.token_endpoint_call(body).await?;
        let token_set = response.into_token_set();
        self.storage.store(key, token_set.clone()).await?;
        debug!(key, "authorization code exchanged");
        Ok(token_set)
    }

    /// Get a valid access token for `key`, refreshing if it is expired or
    /// within the skew margin. Never returns an expired token.
    pub async fn get_valid_token(&self, key: &str) -> IntegrationResult<TokenSet> {
        let skew_ms = self.config.refresh_skew.as_millis() as u64;

        let stored = self
            .storage
            .retrieve(key)
            .await?
            .ok_or_else(|| IntegrationError::Token(TokenError::NotFound {
                key: key.to_string(),
            }))?;

        if !stored.expires_within(skew_ms) {
            return Ok(stored);
        }

        // Single flight: one refresh per key; the rest wait here and then
        // re-read what the winner stored.
        let guard = self.refresh_guard(key);
        let _held = guard.lock().await;

        if let Some(current) = self.storage.retrieve(key).await? {
            if !current.expires_within(skew_ms) {
                return Ok(current);
            }
            self.refresh(key, current).await
        } else {
            Err(IntegrationError::Token(TokenError::NotFound {
                key: key.to_string(),
            }))
        }
    }

    /// Delete tokens for a key (logout / revocation).
    pub async fn delete_tokens(&self, key: &str) -> IntegrationResult<bool> {
        self.storage.delete(key).await
    }

    fn refresh_guard(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_guards
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn refresh(&self, key: &str, stored: TokenSet) -> IntegrationResult<TokenSet> {
        let refresh_token = stored
            .refresh_token
            .clone()
            .ok_or(IntegrationError::Token(TokenError::NoRefreshToken))?;

        let body = serde_urlencoded::to_string([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ])
        .unwrap_or_default();

        let result = self.token_endpoint_call(body).await;

        let mut response = match result {
            Ok(response) => response,
            Err(error) => {
                if error.needs_reauth() {
                    warn!(key, "refresh token rejected, clearing stored tokens");
                    let _ = self.storage.delete(key).await;
                }
                return Err(error);
            }
        };

        // Providers may omit the refresh token on rotation; keep the prior one.
        if response.refresh_token.is_none() {
            response.refresh_token = Some(refresh_token);
        }

        let mut token_set = response.into_token_set();
        token_set.created_at = stored.created_at;
        self.storage.store(key, token_set.clone()).await?;
        debug!(key, "access token refreshed");
        Ok(token_set)
    }

    async fn token_endpoint_call(&self, body: String) -> IntegrationResult<TokenResponse> {
        let credentials = format!(
            "{}:{}",
            self.config.client_id,
            self.config.client_secret.expose_secret()
        );
        let basic = base64::engine::general_purpose::STANDARD.encode(credentials);

        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert("authorization".to_string(), format!("Basic {basic}"));

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.config.token_endpoint.clone(),
            headers,
            body: Some(body),
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;

        if response.status != 200 {
            return Err(map_token_endpoint_error(response.status, &response.body));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            IntegrationError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }
}
