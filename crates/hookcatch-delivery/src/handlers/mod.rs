//! Built-in business handlers and the static routing table.
//!
//! Handlers only log what they find; payload fields that are missing are
//! reported as `unknown` rather than failing the attempt.

use std::sync::Arc;

use hookcatch_core::ProviderKind;
use serde_json::{Map, Value};

use crate::processor::WebhookHandler;

pub mod github;
pub mod stripe;

/// Handler implementations known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// GitHub `push`.
    GitHubPush,
    /// GitHub `pull_request`.
    GitHubPullRequest,
    /// Stripe payment intent outcomes.
    StripePayment,
    /// Stripe subscription lifecycle.
    StripeSubscription,
}

impl HandlerKind {
    /// Instantiates the handler.
    pub fn build(self) -> Arc<dyn WebhookHandler> {
        match self {
            Self::GitHubPush => Arc::new(github::PushHandler),
            Self::GitHubPullRequest => Arc::new(github::PullRequestHandler),
            Self::StripePayment => Arc::new(stripe::PaymentHandler),
            Self::StripeSubscription => Arc::new(stripe::SubscriptionHandler),
        }
    }
}

/// `(provider, event_type) -> handler` routes.
pub const ROUTES: &[(ProviderKind, &str, HandlerKind)] = &[
    (ProviderKind::GitHub, "push", HandlerKind::GitHubPush),
    (ProviderKind::GitHub, "pull_request", HandlerKind::GitHubPullRequest),
    (ProviderKind::Stripe, "payment_intent.succeeded", HandlerKind::StripePayment),
    (ProviderKind::Stripe, "payment_intent.payment_failed", HandlerKind::StripePayment),
    (ProviderKind::Stripe, "customer.subscription.created", HandlerKind::StripeSubscription),
    (ProviderKind::Stripe, "customer.subscription.updated", HandlerKind::StripeSubscription),
    (ProviderKind::Stripe, "customer.subscription.deleted", HandlerKind::StripeSubscription),
];

fn as_object(payload: &Value) -> anyhow::Result<&Map<String, Value>> {
    payload.as_object().ok_or_else(|| anyhow::anyhow!("payload is not a JSON object"))
}

/// Renders a scalar field for logging, `unknown` if absent.
fn field_or_unknown(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn routes_are_unique() {
        for (i, (provider, event_type, _)) in ROUTES.iter().enumerate() {
            assert!(
                !ROUTES[i + 1..].iter().any(|(p, e, _)| p == provider && e == event_type),
                "duplicate route {provider}:{event_type}"
            );
        }
    }

    #[test]
    fn missing_fields_render_as_unknown() {
        assert_eq!(field_or_unknown(Some(&json!("main"))), "main");
        assert_eq!(field_or_unknown(Some(&json!(42))), "42");
        assert_eq!(field_or_unknown(Some(&Value::Null)), "unknown");
        assert_eq!(field_or_unknown(None), "unknown");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(as_object(&json!([1, 2])).is_err());
        assert!(as_object(&json!({})).is_ok());
    }
}
