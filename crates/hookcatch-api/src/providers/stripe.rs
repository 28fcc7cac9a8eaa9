use std::{collections::HashMap, sync::Arc, time::Duration};

use hookcatch_core::{Clock, DeliveryMetadata, ProviderKind};
use http::HeaderMap;

use super::{
    body_object, generated_delivery_id, header_value, string_field, WebhookProvider, UNKNOWN_EVENT,
};
use crate::crypto::{verify_hex_digest, SignatureError};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe: `Stripe-Signature: t=<unix>,v1=<hex>` where the digest covers
/// `"{t}.{body}"`.
///
/// Timestamps further than the tolerance from the clock are rejected to
/// bound replay. Delivery id and event type are the body's `id` and `type`.
#[derive(Clone)]
pub struct StripeProvider {
    secret: String,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl StripeProvider {
    /// Creates the provider.
    pub fn new(secret: impl Into<String>, tolerance: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { secret: secret.into(), tolerance, clock }
    }
}

/// Splits on `,`, then on the first `=`; the last occurrence of a key wins.
fn parse_signature_header(header: &str) -> HashMap<&str, &str> {
    header
        .split(',')
        .filter_map(|item| {
            let item = item.trim();
            match item.split_once('=') {
                Some((key, value)) => Some((key, value)),
                None if !item.is_empty() => Some((item, "")),
                None => None,
            }
        })
        .collect()
}

impl WebhookProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn verify(&self, body: &[u8], headers: &HeaderMap) -> Result<(), SignatureError> {
        let header = header_value(headers, SIGNATURE_HEADER).ok_or(SignatureError::MissingHeader)?;
        let elements = parse_signature_header(header);

        let timestamp = elements.get("t").copied().filter(|t| !t.trim().is_empty());
        let signature = elements.get("v1").copied().filter(|s| !s.trim().is_empty());
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(SignatureError::InvalidFormat);
        };

        let ts: i64 = timestamp.trim().parse().map_err(|_| SignatureError::InvalidTimestamp)?;
        let skew = (i128::from(self.clock.unix_timestamp()) - i128::from(ts)).unsigned_abs();
        if skew > u128::from(self.tolerance.as_secs()) {
            return Err(SignatureError::TimestampOutsideTolerance);
        }

        let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + body.len());
        signed_payload.extend_from_slice(timestamp.as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(body);

        verify_hex_digest(&self.secret, &signed_payload, signature)
    }

    fn extract_metadata(&self, body: &[u8], _headers: &HeaderMap) -> DeliveryMetadata {
        let payload = body_object(body);
        DeliveryMetadata {
            delivery_id: string_field(&payload, "id")
                .map_or_else(generated_delivery_id, str::to_string),
            event_type: string_field(&payload, "type").unwrap_or(UNKNOWN_EVENT).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use hookcatch_core::TestClock;
    use http::HeaderValue;

    use super::*;
    use crate::crypto::hmac_sha256_hex;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
    const NOW: u64 = 1_700_000_000;

    fn provider(secret: &str) -> StripeProvider {
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(NOW));
        StripeProvider::new(secret, Duration::from_secs(300), Arc::new(clock))
    }

    fn header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn sign(timestamp: u64, body: &[u8]) -> HeaderMap {
        let mut payload = format!("{timestamp}.").into_bytes();
        payload.extend_from_slice(body);
        let digest = hmac_sha256_hex("whsec", &payload).unwrap();
        header(&format!("t={timestamp},v1={digest}"))
    }

    #[test]
    fn accepts_fresh_signature() {
        assert_eq!(provider("whsec").verify(BODY, &sign(NOW, BODY)), Ok(()));
        assert_eq!(provider("whsec").verify(BODY, &sign(NOW - 300, BODY)), Ok(()));
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let provider = provider("whsec");
        assert_eq!(
            provider.verify(BODY, &sign(NOW - 600, BODY)),
            Err(SignatureError::TimestampOutsideTolerance)
        );
        assert_eq!(
            provider.verify(BODY, &sign(NOW + 301, BODY)),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn header_format_errors() {
        let provider = provider("whsec");
        assert_eq!(provider.verify(BODY, &HeaderMap::new()), Err(SignatureError::MissingHeader));
        assert_eq!(provider.verify(BODY, &header("v1=abc")), Err(SignatureError::InvalidFormat));
        assert_eq!(provider.verify(BODY, &header("t=123")), Err(SignatureError::InvalidFormat));
        assert_eq!(provider.verify(BODY, &header("t=,v1=abc")), Err(SignatureError::InvalidFormat));
        assert_eq!(
            provider.verify(BODY, &header("t=abc,v1=abc")),
            Err(SignatureError::InvalidTimestamp)
        );
        assert_eq!(
            provider.verify(BODY, &header(&format!("t={NOW},v1=invalid"))),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn last_occurrence_of_a_key_wins() {
        let parsed = parse_signature_header("t=1, v1=first ,v1=second=x,junk");
        assert_eq!(parsed.get("t"), Some(&"1"));
        assert_eq!(parsed.get("v1"), Some(&"second=x"));
        assert_eq!(parsed.get("junk"), Some(&""));
    }

    #[test]
    fn unconfigured_secret_rejects() {
        assert_eq!(
            provider("").verify(BODY, &sign(NOW, BODY)),
            Err(SignatureError::SecretNotConfigured)
        );
    }

    #[test]
    fn metadata_from_body() {
        let metadata = provider("whsec").extract_metadata(BODY, &HeaderMap::new());
        assert_eq!(metadata.delivery_id, "evt_1");
        assert_eq!(metadata.event_type, "payment_intent.succeeded");

        let fallback = provider("whsec").extract_metadata(b"[]", &HeaderMap::new());
        assert_eq!(fallback.event_type, "unknown");
        assert!(uuid::Uuid::parse_str(&fallback.delivery_id).is_ok());
    }

    #[test]
    fn real_clock_signature_round_trip() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let provider = StripeProvider::new(
            "whsec",
            Duration::from_secs(300),
            Arc::new(hookcatch_core::RealClock::new()),
        );
        assert_eq!(provider.verify(BODY, &sign(now, BODY)), Ok(()));
    }
}
