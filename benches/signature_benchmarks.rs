//! Benchmarks for the intake hot path: signature checks and acceptance.

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hookcatch_api::ProviderRegistry;
use hookcatch_core::{Clock, TestClock};
use hookcatch_testing::{
    fixtures::{sign_github, sign_stripe},
    TestEnv, WebhookRequest, GITHUB_SECRET, STRIPE_SECRET,
};
use http::{HeaderMap, HeaderValue};
use serde_json::json;
use tokio::runtime::Runtime;
use tower::ServiceExt;

fn payload_of(size: usize) -> Vec<u8> {
    json!({ "ref": "refs/heads/main", "blob": "x".repeat(size) }).to_string().into_bytes()
}

fn bench_signature_verification(c: &mut Criterion) {
    let clock = Arc::new(TestClock::new());
    let registry = ProviderRegistry::from_secrets(TestEnv::secrets(), clock.clone());
    let github = registry.get("github").expect("github registered");
    let stripe = registry.get("stripe").expect("stripe registered");

    let mut group = c.benchmark_group("signature");
    for size in [256, 4 * 1024, 64 * 1024, 1024 * 1024] {
        let body = payload_of(size);
        group.throughput(Throughput::Bytes(body.len() as u64));

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-hub-signature-256",
            HeaderValue::from_str(&sign_github(&body, GITHUB_SECRET)).expect("ascii header"),
        );
        group.bench_with_input(BenchmarkId::new("github", size), &body, |b, body| {
            b.iter(|| github.verify(black_box(body), black_box(&headers)));
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            HeaderValue::from_str(&sign_stripe(&body, clock.unix_timestamp(), STRIPE_SECRET))
                .expect("ascii header"),
        );
        group.bench_with_input(BenchmarkId::new("stripe", size), &body, |b, body| {
            b.iter(|| stripe.verify(black_box(body), black_box(&headers)));
        });
    }
    group.finish();
}

fn bench_intake_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let env = TestEnv::new();
    let app = env.router();
    let payload = json!({ "ref": "refs/heads/main", "commits": [] });
    let mut counter = 0u64;

    c.bench_function("intake/github_accept", |b| {
        b.to_async(&rt).iter(|| {
            counter += 1;
            let request =
                WebhookRequest::github(&payload, GITHUB_SECRET, &format!("bench-{counter}"), "push")
                    .build();
            let app = app.clone();
            async move { app.oneshot(request).await.expect("router is infallible") }
        });
    });

    c.bench_function("intake/github_duplicate", |b| {
        b.to_async(&rt).iter(|| {
            let request =
                WebhookRequest::github(&payload, GITHUB_SECRET, "bench-dup", "push").build();
            let app = app.clone();
            async move { app.oneshot(request).await.expect("router is infallible") }
        });
    });
}

criterion_group!(benches, bench_signature_verification, bench_intake_round_trip);
criterion_main!(benches);
