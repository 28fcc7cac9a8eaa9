use hookcatch_core::{DeliveryMetadata, ProviderKind};
use http::HeaderMap;

use super::{
    body_object, generated_delivery_id, header_value, string_field, WebhookProvider, UNKNOWN_EVENT,
};
use crate::crypto::{hmac_sha256_hex, timing_safe_eq, SignatureError};

const SIGNATURE_HEADER: &str = "x-signature-256";
const DELIVERY_HEADER: &str = "x-delivery-id";

/// Any sender using `X-Signature-256: sha256=<hex>` over the raw body.
///
/// Delivery id comes from `X-Delivery-Id`; the event type from the body's
/// `event` field, then `type`.
#[derive(Clone)]
pub struct GenericProvider {
    secret: String,
}

impl GenericProvider {
    /// Creates the provider with its shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl WebhookProvider for GenericProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Generic
    }

    fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), SignatureError> {
        let provided =
            header_value(headers, SIGNATURE_HEADER).ok_or(SignatureError::MissingHeader)?;
        let expected = format!("sha256={}", hmac_sha256_hex(&self.secret, body)?);

        if timing_safe_eq(&expected, provided) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    fn extract_metadata(&self, body: &[u8], headers: &HeaderMap) -> DeliveryMetadata {
        let payload = body_object(body);
        let event_type = string_field(&payload, "event")
            .or_else(|| string_field(&payload, "type"))
            .unwrap_or(UNKNOWN_EVENT);

        DeliveryMetadata {
            delivery_id: header_value(headers, DELIVERY_HEADER)
                .map_or_else(generated_delivery_id, str::to_string),
            event_type: event_type.to_string(),
        }
    }
}
