//! Fuzz target for delivery metadata extraction.
//!
//! Extraction runs on verified but otherwise untrusted bodies and must
//! always produce a non-empty delivery id and event type.
//!
//! Run with:
//! cargo +nightly fuzz run metadata_extraction -- -max_total_time=600

#![no_main]

use std::sync::Arc;

use hookcatch_api::{ProviderRegistry, ProviderSecrets};
use hookcatch_core::TestClock;
use http::HeaderMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|body: &[u8]| {
    let registry =
        ProviderRegistry::from_secrets(ProviderSecrets::default(), Arc::new(TestClock::new()));

    for name in ["github", "stripe", "generic"] {
        let Ok(provider) = registry.get(name) else {
            continue;
        };
        let metadata = provider.extract_metadata(body, &HeaderMap::new());
        assert!(!metadata.delivery_id.is_empty());
        assert!(!metadata.event_type.is_empty());
    }
});
