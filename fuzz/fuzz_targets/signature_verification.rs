//! Fuzz target for provider signature verification.
//!
//! Arbitrary bodies and signature headers must be rejected or accepted
//! without panicking, for every provider.
//!
//! Run with:
//! cargo +nightly fuzz run signature_verification -- -max_total_time=600

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use hookcatch_api::{ProviderRegistry, ProviderSecrets};
use hookcatch_core::TestClock;
use http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    provider: u8,
    body: &'a [u8],
    signature: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let secrets = ProviderSecrets {
        github: "fuzz-github".to_string(),
        stripe: "whsec_fuzz".to_string(),
        generic: "fuzz-generic".to_string(),
        stripe_tolerance: Duration::from_secs(300),
    };
    let registry = ProviderRegistry::from_secrets(secrets, Arc::new(TestClock::new()));

    let (name, header) = match input.provider % 3 {
        0 => ("github", "x-hub-signature-256"),
        1 => ("stripe", "stripe-signature"),
        _ => ("generic", "x-signature-256"),
    };
    let Ok(provider) = registry.get(name) else {
        return;
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(input.signature) {
        headers.insert(header, value);
    }

    // A random signature matching a real HMAC is not a realistic outcome.
    assert!(provider.verify(input.body, &headers).is_err());
});
