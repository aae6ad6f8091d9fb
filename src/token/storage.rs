//! Token Storage
//!
//! Persistence collaborator for token sets. Production deployments back this
//! with an encrypted store; the in-memory implementation serves tests and
//! single-process use.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::IntegrationResult;
use crate::token::TokenSet;

/// Token persistence interface (for dependency injection).
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Store tokens under a key, replacing any existing set.
    async fn store(&self, key: &str, tokens: TokenSet) -> IntegrationResult<()>;

    /// Retrieve tokens for a key.
    async fn retrieve(&self, key: &str) -> IntegrationResult<Option<TokenSet>>;

    /// Delete tokens for a key; returns whether anything was removed.
    async fn delete(&self, key: &str) -> IntegrationResult<bool>;
}

/// In-memory token storage.
#[derive(Default)]
pub struct InMemoryTokenStorage {
    tokens: Mutex<HashMap<String, TokenSet>>,
}

impl InMemoryTokenStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored token sets.
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn store(&self, key: &str, tokens: TokenSet) -> IntegrationResult<()> {
        self.tokens.lock().insert(key.to_string(), tokens);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> IntegrationResult<Option<TokenSet>> {
        Ok(self.tokens.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> IntegrationResult<bool> {
        Ok(self.tokens.lock().remove(key).is_some())
    }
}
