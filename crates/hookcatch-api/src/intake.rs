//! Webhook intake: authenticate, deduplicate, persist, enqueue.
//!
//! [`IntakeService::receive`] is the whole acceptance path for
//! `POST /webhooks/{provider}`. Steps run strictly in order and each one
//! short-circuits:
//!
//! 1. Provider lookup (`UnknownProvider`, 404)
//! 2. Signature check over the raw bytes (`InvalidSignature`, 401)
//! 3. Metadata extraction
//! 4. Existing `delivery_id` means a `duplicate` acknowledgement, nothing
//!    written or enqueued
//! 5. Strict JSON parse (`MalformedPayload`, 400)
//! 6. Insert as `pending`, then enqueue one immediate work item
//!
//! An enqueue failure after a successful insert is logged and the request
//! is still accepted; the engine sweeper requeues `pending` rows that were
//! never picked up.

use std::{collections::HashMap, sync::Arc, time::Duration};

use hookcatch_core::{Clock, CoreError, HookCatchError, NewDelivery};
use hookcatch_delivery::{DeliveryStore, InsertOutcome, JobQueue};
use http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::providers::ProviderRegistry;

/// Request headers that are never persisted.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// What intake did with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IntakeOutcome {
    /// New delivery stored and queued.
    Accepted {
        /// Provider-assigned delivery identifier.
        delivery_id: String,
    },
    /// Delivery identifier already known; nothing changed.
    Duplicate {
        /// Provider-assigned delivery identifier.
        delivery_id: String,
    },
}

impl IntakeOutcome {
    /// Provider-assigned delivery identifier.
    pub fn delivery_id(&self) -> &str {
        match self {
            Self::Accepted { delivery_id } | Self::Duplicate { delivery_id } => delivery_id,
        }
    }
}

/// Acceptance path shared by the HTTP handler and tests.
#[derive(Clone)]
pub struct IntakeService {
    providers: ProviderRegistry,
    store: Arc<dyn DeliveryStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl IntakeService {
    /// Creates the service.
    pub fn new(
        providers: ProviderRegistry,
        store: Arc<dyn DeliveryStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { providers, store, queue, clock }
    }

    /// Accepts one webhook request.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider`, `InvalidSignature` or `MalformedPayload`
    /// for rejected requests, `Database` if the store fails.
    #[instrument(
        name = "intake",
        skip(self, body, headers),
        fields(provider = %provider, body_len = body.len())
    )]
    pub async fn receive(
        &self,
        provider: &str,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<IntakeOutcome, HookCatchError> {
        let verifier = self.providers.get(provider)?;

        verifier.verify(body, headers).map_err(|err| {
            warn!(reason = %err, "webhook signature rejected");
            HookCatchError::InvalidSignature { reason: err.to_string() }
        })?;

        let metadata = verifier.extract_metadata(body, headers);
        debug!(
            delivery_id = %metadata.delivery_id,
            event_type = %metadata.event_type,
            "webhook authenticated"
        );

        if self.store.find_by_delivery_id(&metadata.delivery_id).await?.is_some() {
            info!(delivery_id = %metadata.delivery_id, "duplicate delivery acknowledged");
            return Ok(IntakeOutcome::Duplicate { delivery_id: metadata.delivery_id });
        }

        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(|_| HookCatchError::MalformedPayload)?;

        let new = NewDelivery {
            provider: verifier.kind(),
            delivery_id: metadata.delivery_id.clone(),
            event_type: metadata.event_type,
            payload,
            headers: stored_headers(headers),
        };

        let delivery = match self.store.insert_delivery(new, self.clock.now_utc()).await {
            Ok(InsertOutcome::Created(delivery)) => delivery,
            Ok(InsertOutcome::Duplicate) | Err(CoreError::Duplicate(_)) => {
                info!(delivery_id = %metadata.delivery_id, "concurrent duplicate delivery acknowledged");
                return Ok(IntakeOutcome::Duplicate { delivery_id: metadata.delivery_id });
            },
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self.queue.enqueue(delivery.id, Duration::ZERO).await {
            warn!(
                id = %delivery.id,
                error = %err,
                "enqueue failed, delivery left pending for the sweeper"
            );
        }

        info!(
            id = %delivery.id,
            delivery_id = %delivery.delivery_id,
            event_type = %delivery.event_type,
            "webhook accepted"
        );
        Ok(IntakeOutcome::Accepted { delivery_id: delivery.delivery_id })
    }
}

/// Request headers as persisted: lower-cased names, credentials dropped.
///
/// Repeated headers keep their last value; non-UTF-8 values are skipped.
pub fn stored_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
