use hookcatch_core::{DeliveryMetadata, ProviderKind};
use http::HeaderMap;

use super::{generated_delivery_id, header_value, WebhookProvider, UNKNOWN_EVENT};
use crate::crypto::{hmac_sha256_hex, timing_safe_eq, SignatureError};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const DELIVERY_HEADER: &str = "x-github-delivery";
const EVENT_HEADER: &str = "x-github-event";

/// GitHub: `X-Hub-Signature-256: sha256=<hex>` over the raw body.
///
/// Delivery id and event type come from the `X-GitHub-Delivery` and
/// `X-GitHub-Event` headers.
#[derive(Clone)]
pub struct GitHubProvider {
    secret: String,
}

impl GitHubProvider {
    /// Creates the provider with its shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl WebhookProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
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

    fn extract_metadata(&self, _body: &[u8], headers: &HeaderMap) -> DeliveryMetadata {
        DeliveryMetadata {
            delivery_id: header_value(headers, DELIVERY_HEADER)
                .map_or_else(generated_delivery_id, str::to_string),
            event_type: header_value(headers, EVENT_HEADER).unwrap_or(UNKNOWN_EVENT).to_string(),
        }
    }
}
