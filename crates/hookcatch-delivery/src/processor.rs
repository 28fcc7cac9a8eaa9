//! Business dispatch keyed on `(provider, event_type)`.
//!
//! Unmapped combinations complete as a no-op: the event is acknowledged but
//! nothing acts on it.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use hookcatch_core::{Delivery, DeliveryStatus, ProviderKind};
use tracing::{debug, info};

use crate::{
    error::{DeliveryError, Result},
    handlers::ROUTES,
};

/// Business logic for one kind of event.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Acts on a delivery. Any error counts as a failed attempt.
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Routes deliveries to their handlers.
pub struct DeliveryProcessor {
    routes: HashMap<(ProviderKind, String), Arc<dyn WebhookHandler>>,
}

impl DeliveryProcessor {
    /// Processor with no routes; every delivery completes trivially.
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Processor wired with the built-in handler table.
    pub fn with_default_handlers() -> Self {
        let mut processor = Self::new();
        for (provider, event_type, kind) in ROUTES {
            processor.register(*provider, *event_type, kind.build());
        }
        processor
    }

    /// Routes `provider:event_type` to `handler`, replacing any existing route.
    pub fn register(
        &mut self,
        provider: ProviderKind,
        event_type: impl Into<String>,
        handler: Arc<dyn WebhookHandler>,
    ) -> &mut Self {
        self.routes.insert((provider, event_type.into()), handler);
        self
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Runs the handler for a claimed delivery.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the delivery is `processing`, and
    /// `Handler` when the handler fails.
    pub async fn process(&self, delivery: &Delivery) -> Result<()> {
        if delivery.status != DeliveryStatus::Processing {
            return Err(DeliveryError::invalid_state(delivery.id, delivery.status));
        }

        let key = (delivery.provider, delivery.event_type.clone());
        let Some(handler) = self.routes.get(&key) else {
            info!(
                delivery_id = %delivery.id,
                event_key = %delivery.event_key(),
                "no handler registered, acknowledging"
            );
            return Ok(());
        };

        debug!(delivery_id = %delivery.id, handler = handler.name(), "dispatching delivery");

        handler
            .handle(delivery)
            .await
            .map_err(|error| DeliveryError::handler(handler.name(), error))
    }
}

impl Default for DeliveryProcessor {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}
