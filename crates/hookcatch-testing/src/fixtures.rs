//! Signed request builders, payloads and delivery fixtures.

use std::collections::HashMap;

use axum::body::Body;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hookcatch_core::{Delivery, DeliveryId, DeliveryStatus, NewDelivery, ProviderKind};
use http::Request;
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// `X-Hub-Signature-256` value for `body`.
pub fn sign_github(body: &[u8], secret: &str) -> String {
    format!("sha256={}", hmac_hex(secret, body))
}

/// `X-Signature-256` value for `body`.
pub fn sign_generic(body: &[u8], secret: &str) -> String {
    format!("sha256={}", hmac_hex(secret, body))
}

/// `Stripe-Signature` value for `body` signed at `timestamp`.
pub fn sign_stripe(body: &[u8], timestamp: i64, secret: &str) -> String {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(body);
    format!("t={timestamp},v1={}", hmac_hex(secret, &signed))
}

/// GitHub `push` payload.
pub fn github_push_payload() -> Value {
    json!({
        "ref": "refs/heads/main",
        "repository": { "full_name": "acme/widgets" },
        "commits": [{ "id": "abc123" }, { "id": "def456" }],
    })
}

/// GitHub `pull_request` payload.
pub fn github_pull_request_payload() -> Value {
    json!({
        "action": "opened",
        "pull_request": { "number": 42, "title": "Add webhooks" },
    })
}

/// Stripe event envelope around a payment intent.
pub fn stripe_payment_payload(id: &str, event_type: &str) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "data": {
            "object": { "amount": 2000, "currency": "usd", "status": "succeeded" }
        },
    })
}

/// Generic payload naming its event.
pub fn generic_payload(event: &str) -> Value {
    json!({ "event": event, "data": { "order_id": 7 } })
}

/// Builds HTTP requests for `POST /webhooks/{provider}`.
pub struct WebhookRequest {
    provider: String,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl WebhookRequest {
    /// Request to `provider` with `body` and no headers.
    pub fn new(provider: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { provider: provider.into(), body: body.into(), headers: Vec::new() }
    }

    /// Signed GitHub request.
    pub fn github(body: &Value, secret: &str, delivery_id: &str, event: &str) -> Self {
        let body = body.to_string();
        let signature = sign_github(body.as_bytes(), secret);
        Self::new("github", body)
            .header("X-Hub-Signature-256", signature)
            .header("X-GitHub-Delivery", delivery_id)
            .header("X-GitHub-Event", event)
    }

    /// Signed Stripe request.
    pub fn stripe(body: &Value, secret: &str, timestamp: i64) -> Self {
        let body = body.to_string();
        let signature = sign_stripe(body.as_bytes(), timestamp, secret);
        Self::new("stripe", body).header("Stripe-Signature", signature)
    }

    /// Signed generic request.
    pub fn generic(body: &Value, secret: &str, delivery_id: &str) -> Self {
        let body = body.to_string();
        let signature = sign_generic(body.as_bytes(), secret);
        Self::new("generic", body)
            .header("X-Signature-256", signature)
            .header("X-Delivery-Id", delivery_id)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Headers as a map, for calling intake directly.
    pub fn header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (name, value) in &self.headers {
            let name = http::HeaderName::try_from(name.as_str()).expect("valid header name");
            let value = http::HeaderValue::try_from(value.as_str()).expect("valid header value");
            map.append(name, value);
        }
        map
    }

    /// Builds the axum request.
    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/webhooks/{}", self.provider))
            .header("content-type", "application/json");
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(Body::from(self.body)).expect("valid request")
    }
}

/// Builder for stored deliveries in arbitrary states.
pub struct DeliveryBuilder {
    new: NewDelivery,
    status: DeliveryStatus,
    attempts: i32,
    error_message: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl DeliveryBuilder {
    /// Pending GitHub push with a unique delivery id.
    pub fn new() -> Self {
        Self {
            new: NewDelivery {
                provider: ProviderKind::GitHub,
                delivery_id: format!("gh-{}", Uuid::new_v4().simple()),
                event_type: "push".to_string(),
                payload: github_push_payload(),
                headers: HashMap::new(),
            },
            status: DeliveryStatus::Pending,
            attempts: 0,
            error_message: None,
            next_attempt_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Sets provider and event type.
    #[must_use]
    pub fn event(mut self, provider: ProviderKind, event_type: impl Into<String>) -> Self {
        self.new.provider = provider;
        self.new.event_type = event_type.into();
        self
    }

    /// Sets the provider-assigned identifier.
    #[must_use]
    pub fn delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.new.delivery_id = delivery_id.into();
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.new.payload = payload;
        self
    }

    /// Sets status and attempt count.
    #[must_use]
    pub fn state(mut self, status: DeliveryStatus, attempts: i32) -> Self {
        self.status = status;
        self.attempts = attempts;
        self
    }

    /// Sets the last error.
    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Sets the backoff deadline.
    #[must_use]
    pub fn next_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    /// Sets creation time; `updated_at` follows unless set separately.
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Sets the last state change.
    #[must_use]
    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Builds the delivery.
    pub fn build(self) -> Delivery {
        let mut delivery = Delivery::from_new(DeliveryId::new(), self.new, self.created_at);
        delivery.status = self.status;
        delivery.attempts = self.attempts;
        delivery.error_message = self.error_message;
        delivery.next_attempt_at = self.next_attempt_at;
        delivery.updated_at = self.updated_at.unwrap_or(self.created_at);
        delivery
    }
}

impl Default for DeliveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
