//! Webhook Receiving
//!
//! Inbound delivery pipeline: signature verification over the raw body,
//! payload parsing, exactly-once dispatch to a registered processor, and an
//! HTTP-shaped response the embedding server can return directly.
//!
//! Providers are registered up front; an unregistered provider name is
//! rejected rather than falling through to a default handler.

pub mod store;
pub mod verifier;

pub use store::{ClaimOutcome, EventStore, InMemoryEventStore};
pub use verifier::SignatureScheme;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::errors::{IntegrationResult, WebhookError};

/// A verified, deduplicated inbound event handed to a processor.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Registered provider name the delivery arrived under.
    pub provider: String,
    /// Provider-assigned event id, extracted from the payload.
    pub event_id: String,
    /// Raw request body as received.
    pub raw_payload: Vec<u8>,
    /// Parsed JSON payload.
    pub payload: serde_json::Value,
    /// When this process received the delivery.
    pub received_at: DateTime<Utc>,
}

/// Application hook invoked once per unique event.
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    async fn process(&self, event: &WebhookEvent) -> IntegrationResult<()>;
}

/// HTTP-shaped outcome of handling a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: &'static str,
}

impl WebhookResponse {
    fn processed() -> Self {
        Self {
            status: 200,
            body: "processed",
        }
    }

    fn already_processed() -> Self {
        Self {
            status: 200,
            body: "already_processed",
        }
    }

    fn unknown_provider() -> Self {
        Self {
            status: 400,
            body: "unknown_provider",
        }
    }

    fn invalid_signature() -> Self {
        Self {
            status: 401,
            body: "invalid_signature",
        }
    }

    fn malformed_payload() -> Self {
        Self {
            status: 400,
            body: "malformed_payload",
        }
    }

    fn processor_failure() -> Self {
        Self {
            status: 500,
            body: "processor_failure",
        }
    }
}

/// Per-provider registration: how to verify, where the event id lives, and
/// who handles the event.
pub struct ProviderRegistration {
    scheme: SignatureScheme,
    /// JSON pointer to the event id within the payload (e.g. `/event_id`).
    event_id_pointer: String,
    processor: Arc<dyn WebhookProcessor>,
}

impl ProviderRegistration {
    pub fn new(
        scheme: SignatureScheme,
        event_id_pointer: impl Into<String>,
        processor: Arc<dyn WebhookProcessor>,
    ) -> Self {
        Self {
            scheme,
            event_id_pointer: event_id_pointer.into(),
            processor,
        }
    }
}

/// Builder for [`WebhookReceiver`].
pub struct WebhookReceiverBuilder {
    providers: HashMap<String, ProviderRegistration>,
    store: Arc<dyn EventStore>,
}

impl WebhookReceiverBuilder {
    /// Register a provider by name. Re-registering a name replaces the
    /// earlier registration.
    pub fn provider(mut self, name: impl Into<String>, registration: ProviderRegistration) -> Self {
        self.providers.insert(name.into(), registration);
        self
    }

    pub fn build(self) -> WebhookReceiver {
        WebhookReceiver {
            providers: self.providers,
            store: self.store,
        }
    }
}

/// Inbound webhook dispatcher.
pub struct WebhookReceiver {
    providers: HashMap<String, ProviderRegistration>,
    store: Arc<dyn EventStore>,
}

impl WebhookReceiver {
    pub fn builder(store: Arc<dyn EventStore>) -> WebhookReceiverBuilder {
        WebhookReceiverBuilder {
            providers: HashMap::new(),
            store,
        }
    }

    /// Registered provider names.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Handle one delivery. Never returns `Err`; every failure mode maps to
    /// an HTTP-shaped response so redelivery behavior stays predictable.
    #[instrument(skip(self, headers, raw_body))]
    pub async fn handle_webhook(
        &self,
        provider: &str,
        headers: &HashMap<String, String>,
        raw_body: &[u8],
    ) -> WebhookResponse {
        let registration = match self.providers.get(provider) {
            Some(registration) => registration,
            None => {
                warn!(provider, "delivery for unregistered provider");
                return WebhookResponse::unknown_provider();
            }
        };

        // Signature covers the raw bytes; parse only after verification.
        if let Err(e) = registration.scheme.verify(headers, raw_body) {
            warn!(provider, error = %e, "signature verification rejected delivery");
            return WebhookResponse::invalid_signature();
        }

        let payload: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(provider, error = %e, "unparseable webhook payload");
                return WebhookResponse::malformed_payload();
            }
        };

        let event_id = match payload
            .pointer(&registration.event_id_pointer)
            .and_then(|v| v.as_str())
        {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!(
                    provider,
                    pointer = %registration.event_id_pointer,
                    "payload missing event id"
                );
                return WebhookResponse::malformed_payload();
            }
        };

        match self.store.claim(provider, &event_id).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyProcessed) | Ok(ClaimOutcome::InFlight) => {
                debug!(provider, event_id, "duplicate delivery acknowledged");
                return WebhookResponse::already_processed();
            }
            Err(e) => {
                error!(provider, event_id, error = %e, "event store claim failed");
                return WebhookResponse::processor_failure();
            }
        }

        // The guard releases the claim if this future is dropped before the
        // outcome settles, so a cancelled delivery stays redeliverable.
        let claim = ClaimGuard::new(self.store.clone(), provider, &event_id);

        let event = WebhookEvent {
            provider: provider.to_string(),
            event_id: event_id.clone(),
            raw_payload: raw_body.to_vec(),
            payload,
            received_at: Utc::now(),
        };

        match registration.processor.process(&event).await {
            Ok(()) => match self.store.mark_processed(provider, &event_id).await {
                Ok(()) => {
                    claim.disarm();
                    debug!(provider, event_id, "webhook processed");
                    WebhookResponse::processed()
                }
                Err(e) => {
                    // Guard drop releases the claim for redelivery.
                    error!(provider, event_id, error = %e, "failed to record processed event");
                    WebhookResponse::processor_failure()
                }
            },
            Err(e) => {
                claim.disarm();
                let failure = WebhookError::ProcessorFailed {
                    event_id: event_id.clone(),
                    message: e.to_string(),
                };
                error!(provider, event_id, error = %failure, "webhook processor failed");
                // Release so the provider's redelivery can retry the event.
                if let Err(release_err) =
                    self.store.release(provider, &event_id, &e.to_string()).await
                {
                    error!(provider, event_id, error = %release_err, "failed to release claim");
                }
                WebhookResponse::processor_failure()
            }
        }
    }
}

/// Holds an in-flight event claim while the processor runs.
///
/// If the delivery future is dropped before `disarm` (the embedding server
/// cancelled the request), the claim is released in a background task so the
/// provider's redelivery can claim and process the event.
struct ClaimGuard {
    store: Arc<dyn EventStore>,
    provider: String,
    event_id: String,
    armed: bool,
}

impl ClaimGuard {
    fn new(store: Arc<dyn EventStore>, provider: &str, event_id: &str) -> Self {
        Self {
            store,
            provider: provider.to_string(),
            event_id: event_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Release is async; spawn it so drop stays non-blocking.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let provider = std::mem::take(&mut self.provider);
            let event_id = std::mem::take(&mut self.event_id);
            handle.spawn(async move {
                let _ = store
                    .release(&provider, &event_id, "delivery interrupted before completion")
                    .await;
            });
        }
    }
}
