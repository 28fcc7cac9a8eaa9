//! Stripe event handlers.

use async_trait::async_trait;
use hookcatch_core::Delivery;
use serde_json::Value;
use tracing::info;

use super::{as_object, field_or_unknown};
use crate::processor::WebhookHandler;

fn data_object(payload: &Value) -> Option<&Value> {
    payload.get("data").and_then(|d| d.get("object"))
}

/// Logs amount, currency and status of a payment intent.
pub struct PaymentHandler;

#[async_trait]
impl WebhookHandler for PaymentHandler {
    fn name(&self) -> &'static str {
        "stripe_payment"
    }

    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        as_object(&delivery.payload)?;
        let object = data_object(&delivery.payload);
        let currency = field_or_unknown(object.and_then(|o| o.get("currency"))).to_uppercase();

        info!(
            delivery_id = %delivery.id,
            event_type = %delivery.event_type,
            amount = %field_or_unknown(object.and_then(|o| o.get("amount"))),
            %currency,
            status = %field_or_unknown(object.and_then(|o| o.get("status"))),
            "stripe payment event"
        );
        Ok(())
    }
}

/// Logs plan and status of a subscription change.
pub struct SubscriptionHandler;

impl SubscriptionHandler {
    /// `plan.id`, falling back to the first subscription item's plan.
    fn plan_id(object: Option<&Value>) -> String {
        let direct = object.and_then(|o| o.pointer("/plan/id"));
        let from_items = object.and_then(|o| o.pointer("/items/data/0/plan/id"));
        field_or_unknown(direct.or(from_items))
    }
}

#[async_trait]
impl WebhookHandler for SubscriptionHandler {
    fn name(&self) -> &'static str {
        "stripe_subscription"
    }

    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        as_object(&delivery.payload)?;
        let object = data_object(&delivery.payload);

        info!(
            delivery_id = %delivery.id,
            event_type = %delivery.event_type,
            plan = %Self::plan_id(object),
            status = %field_or_unknown(object.and_then(|o| o.get("status"))),
            "stripe subscription event"
        );
        Ok(())
    }
}
