//! Operator API tests: authentication, listing, inspection and replay.

use std::{sync::Arc, time::Duration};

use axum::{body::Body, http::StatusCode, Router};
use hookcatch_core::{Clock, DeliveryId, DeliveryStatus, ProviderKind};
use hookcatch_delivery::{storage::mock::MockOperation, DeliveryProcessor};
use hookcatch_testing::{DeliveryBuilder, FailingHandler, TestEnv, JWT_SECRET};
use http::Request;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn token_with(claims: Value, secret: &str) -> String {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[tokio::test]
async fn admin_routes_require_bearer_token() {
    let env = TestEnv::new();
    let app = env.router();

    for uri in ["/webhooks/deliveries", "/webhooks/dead_letters"] {
        let (status, body) = call(&app, get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["error"]["code"], "E1005");
        assert_eq!(body["error"]["message"], "Unauthorized: missing bearer token");
    }
}

#[tokio::test]
async fn token_signed_with_wrong_secret_is_rejected() {
    let env = TestEnv::new();
    let token = token_with(json!({ "sub": "ops" }), "not-the-secret");

    let (status, body) = call(&env.router(), get("/webhooks/deliveries", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Unauthorized: invalid token");
}

#[tokio::test]
async fn expired_token_is_rejected_against_service_clock() {
    let env = TestEnv::new();
    let token = token_with(json!({ "sub": "ops", "exp": env.unix_now() + 60 }), JWT_SECRET);
    let app = env.router();

    let (status, _) = call(&app, get("/webhooks/deliveries", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    env.advance(Duration::from_secs(61));
    let (status, body) = call(&app, get("/webhooks/deliveries", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Unauthorized: token expired");
}

#[tokio::test]
async fn intake_and_health_are_public() {
    let env = TestEnv::new();
    let app = env.router();

    let (status, body) = call(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["database"]["status"], "up");
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());

    let (status, body) = call(&app, get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, body) = call(&app, get("/live", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn health_reports_store_outage() {
    let env = TestEnv::new();
    env.store.inject_failure(MockOperation::HealthCheck, "connection refused").await;

    let (status, body) = call(&env.router(), get("/health", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["components"]["database"]["status"], "down");
}

#[tokio::test]
async fn deliveries_are_listed_newest_first_in_pages_of_25() {
    let env = TestEnv::new();
    let start = env.clock.now_utc();
    for i in 0..30 {
        let created = start + chrono::Duration::seconds(i);
        env.seed(DeliveryBuilder::new().delivery_id(format!("gh-{i}")).created_at(created).build())
            .await;
    }
    let token = env.admin_token();
    let app = env.router();

    let (status, body) = call(&app, get("/webhooks/deliveries", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveries"].as_array().unwrap().len(), 25);
    assert_eq!(body["deliveries"][0]["delivery_id"], "gh-29");
    assert_eq!(body["meta"], json!({ "current_page": 1, "total_count": 30, "per_page": 25 }));

    let (_, body) = call(&app, get("/webhooks/deliveries?page=2", Some(&token))).await;
    assert_eq!(body["deliveries"].as_array().unwrap().len(), 5);
    assert_eq!(body["deliveries"][4]["delivery_id"], "gh-0");
    assert_eq!(body["meta"]["current_page"], 2);

    let (_, body) = call(&app, get("/webhooks/deliveries?page=0", Some(&token))).await;
    assert_eq!(body["meta"]["current_page"], 1);
}

#[tokio::test]
async fn deliveries_filter_by_status_and_provider() {
    let env = TestEnv::new();
    let now = env.clock.now_utc();
    env.seed(DeliveryBuilder::new().created_at(now).state(DeliveryStatus::Dead, 3).build()).await;
    env.seed(DeliveryBuilder::new().created_at(now).build()).await;
    env.seed(
        DeliveryBuilder::new()
            .created_at(now)
            .event(ProviderKind::Stripe, "charge.succeeded")
            .delivery_id("evt_1")
            .build(),
    )
    .await;
    let token = env.admin_token();
    let app = env.router();

    let (_, body) = call(&app, get("/webhooks/deliveries?status=dead", Some(&token))).await;
    assert_eq!(body["meta"]["total_count"], 1);
    assert_eq!(body["deliveries"][0]["status"], "dead");

    let (_, body) = call(&app, get("/webhooks/deliveries?provider=stripe", Some(&token))).await;
    assert_eq!(body["meta"]["total_count"], 1);
    assert_eq!(body["deliveries"][0]["delivery_id"], "evt_1");

    let (_, body) =
        call(&app, get("/webhooks/deliveries?provider=github&status=pending", Some(&token))).await;
    assert_eq!(body["meta"]["total_count"], 1);

    let (_, body) = call(&app, get("/webhooks/deliveries?status=", Some(&token))).await;
    assert_eq!(body["meta"]["total_count"], 3, "blank filters are ignored");

    let (status, body) = call(&app, get("/webhooks/deliveries?status=lost", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E1006");
    assert_eq!(body["error"]["message"], "Unknown status filter: lost");
}

#[tokio::test]
async fn delivery_detail_includes_payload_and_headers() {
    let env = TestEnv::new();
    let delivery = DeliveryBuilder::new()
        .created_at(env.clock.now_utc())
        .payload(json!({ "ref": "refs/heads/main" }))
        .build();
    let id = env.seed(delivery).await;
    let token = env.admin_token();
    let app = env.router();

    let (status, body) =
        call(&app, get(&format!("/webhooks/deliveries/{id}"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.to_string());
    assert_eq!(body["provider"], "github");
    assert_eq!(body["payload"], json!({ "ref": "refs/heads/main" }));
    assert!(body["headers"].is_object());

    let (status, body) =
        call(&app, get("/webhooks/deliveries/not-a-uuid", Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "E1004");

    let missing = DeliveryId::new();
    let (status, _) =
        call(&app, get(&format!("/webhooks/deliveries/{missing}"), Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn replay_resets_dead_delivery_and_requeues_it() {
    let mut processor = DeliveryProcessor::new();
    processor.register(ProviderKind::GitHub, "push", Arc::new(FailingHandler::always("down")));
    let env = TestEnv::with_processor(processor);
    let id = env.seed(DeliveryBuilder::new().created_at(env.clock.now_utc()).build()).await;
    env.scheduler.run_attempt(id).await;
    env.drain_queue(10).await;
    assert_eq!(env.delivery(id).await.status, DeliveryStatus::Dead);

    let token = env.admin_token();
    let app = env.router();

    let (status, body) = call(&app, get("/webhooks/dead_letters", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total_count"], 1);
    let dead_letter = &body["dead_letters"][0];
    assert_eq!(dead_letter["webhook_delivery_id"], id.to_string());
    assert_eq!(dead_letter["error_class"], "HandlerError");
    assert_eq!(dead_letter["error_message"], "down");
    assert_eq!(dead_letter["delivery"]["status"], "dead");

    let (status, body) =
        call(&app, post(&format!("/webhooks/deliveries/{id}/replay"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "replayed");

    let delivery = env.delivery(id).await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 0);
    assert!(delivery.error_message.is_none());
    assert_eq!(env.queue.enqueued(), vec![(id, Duration::ZERO)]);
}

#[tokio::test]
async fn replay_of_unknown_delivery_is_not_found() {
    let env = TestEnv::new();
    let token = env.admin_token();
    let missing = DeliveryId::new();

    let (status, body) =
        call(&env.router(), post(&format!("/webhooks/deliveries/{missing}/replay"), &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "E1004");
}

#[tokio::test]
async fn replay_with_queue_down_is_unavailable() {
    let env = TestEnv::new();
    let id = env.seed(DeliveryBuilder::new().created_at(env.clock.now_utc()).build()).await;
    env.queue.fail_with("broker down");
    let token = env.admin_token();

    let (status, body) =
        call(&env.router(), post(&format!("/webhooks/deliveries/{id}/replay"), &token)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "E3002");
}
