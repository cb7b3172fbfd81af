//! HTTP interface scenarios.

use super::harness::{configured, digest, eventually, TestHarness, TREASURY, USDC};
use chrono::Utc;
use overflow_gate::ledger::{EventKind, InMemoryLedger, LedgerEvent, LedgerTransaction};
use overflow_gate::GateNodeBuilder;
use reqwest::StatusCode;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;

async fn get(
    harness: &TestHarness,
    path: &str,
    auth: Option<&str>,
) -> (StatusCode, reqwest::header::HeaderMap, Value) {
    let mut request = harness.http().get(harness.url(path));
    if let Some(reference) = auth {
        request = request.header("Authorization", format!("x402 {reference}"));
    }
    let response = request.send().await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    (status, headers, response.json().await.unwrap())
}

async fn post(harness: &TestHarness, path: &str, body: &str) -> (StatusCode, Value) {
    let response = harness
        .http()
        .post(harness.url(path))
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_insight_challenge_pending_then_granted() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let (status, headers, body) = get(&harness, "/api/ai/predict", None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["status"], 402);
    assert_eq!(body["amount"], "0.01");
    assert_eq!(body["asset"], "USDC");
    assert_eq!(body["destination"], TREASURY);
    assert_eq!(body["memo"], "AI_INSIGHT_PREDICTION");
    assert_eq!(body["payment_type"], "x402");
    let www = headers.get("www-authenticate").unwrap().to_str().unwrap();
    assert_eq!(
        www,
        format!("x402 destination=\"{TREASURY}\", amount=\"0.01\", asset=\"USDC\"")
    );

    let reference = harness.pay_unindexed('a', "0xalice", dec!(0.01));
    let (status, _, body) = get(&harness, "/api/ai/predict", Some(&reference)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "pending");
    assert_eq!(body["retryable"], true);

    harness.ledger.index(&reference);
    let (status, _, body) = get(&harness, "/api/ai/predict", Some(&reference)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["txDigest"], reference.as_str());
    assert!(body["prediction"].as_str().is_some_and(|p| !p.is_empty()));
    assert!(body["confidence"].as_str().unwrap().ends_with('%'));

    let (status, _, body) = get(&harness, "/api/ai/predict", Some(&reference)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "already_consumed");
    assert_eq!(body["retryable"], false);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_malformed_authorization_never_reaches_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let short = format!("x402 {}", "z".repeat(49));
    for header in ["Bearer abc", "x402 tooshort", short.as_str()] {
        let response = harness
            .http()
            .get(harness.url("/api/ai/predict"))
            .header("Authorization", header)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["reason"], "malformed");
    }
    assert_eq!(harness.ledger.transaction_queries(), 0);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_wrong_payment_is_rejected_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let cheap = harness.pay('b', "0xalice", dec!(0.01));
    let (status, _, body) = get(&harness, "/api/blitz/enter", Some(&cheap)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "insufficient_amount");
    assert!(body["hint"].as_str().unwrap().contains("0.05"));

    let paid = harness.pay('c', "0xalice", dec!(0.05));
    let response = harness
        .http()
        .get(harness.url("/api/blitz/enter"))
        .header("Authorization", format!("x402 {paid}"))
        .header("X-Payment-Sender", "0xmallory")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "sender_mismatch");

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_blitz_challenge_and_single_active_grant() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let (status, _, body) = get(&harness, "/api/blitz/enter", None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["amount"], "0.05");
    assert_eq!(body["network"], "testnet");
    assert_eq!(body["benefits"].as_array().unwrap().len(), 3);

    let first = harness.pay('d', "0xalice", dec!(0.05));
    let before = Utc::now().timestamp_millis();
    let response = harness
        .http()
        .get(harness.url("/api/blitz/enter"))
        .header("Authorization", format!("x402 {first}"))
        .header("X-Payment-Sender", "0xalice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let expires_at = body["expiresAt"].as_i64().unwrap();
    assert!(expires_at >= before + 60_000);
    assert!(expires_at <= Utc::now().timestamp_millis() + 60_000);
    assert_eq!(body["multiplier"], 2);

    // A second, different valid payment during the window is refused and
    // stays unconsumed.
    let second = harness.pay('e', "0xalice", dec!(0.05));
    let (status, body) = post(
        &harness,
        "/api/blitz/enter",
        &json!({ "txDigest": second, "sender": "0xalice" }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "active_grant");
    assert_eq!(body["expiresAt"], expires_at);

    // The payment that opened the window is spent.
    let (status, _, body) = get(&harness, "/api/blitz/enter", Some(&first)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "already_consumed");

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_blitz_post_validation() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let (status, body) = post(&harness, "/api/blitz/enter", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request body");

    let (status, body) = post(&harness, "/api/blitz/enter", r#"{"txDigest":"short"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid transaction digest");

    let paid = harness.pay('f', "0xbob", dec!(0.05));
    let (status, body) = post(
        &harness,
        "/api/blitz/enter",
        &json!({ "txDigest": paid }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["txDigest"], paid.as_str());

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_missing_configuration_is_503() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = configured(dir.path());
    config.ledger.usdc_type = None;
    config.ledger.treasury_object_id = None;

    let harness = TestHarness::start(config, Arc::new(InMemoryLedger::new())).await;

    for path in ["/api/ai/predict", "/api/blitz/enter", "/api/treasury"] {
        let response = harness
            .http()
            .get(harness.url(path))
            .header("Authorization", format!("x402 {}", digest('a')))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{path}");
        let body: Value = response.json().await.unwrap();
        assert!(body["hint"].as_str().unwrap().contains("USDC_TYPE"));
        assert!(body["detail"].as_str().unwrap().contains("TREASURY_OBJECT_ID"));
    }
    assert_eq!(harness.ledger.transaction_queries(), 0);

    // Listener status still answers, reporting that nothing is listening.
    let (status, _, body) = get(&harness, "/api/balance/events", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["isListening"], false);
    assert_eq!(body["message"], "Event listener is not running");
    assert!(body["hint"].as_str().unwrap().contains("USDC_TYPE"));

    let (status, body) = post(&harness, "/api/balance/events", r#"{"action":"start"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["hint"].as_str().unwrap().contains("USDC_TYPE"));

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_listener_control_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    let (status, _, body) = get(&harness, "/api/balance/events", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isListening"], false);

    let (status, body) = post(&harness, "/api/balance/events", r#"{"action":"start"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["isListening"], true);

    let (status, body) = post(&harness, "/api/balance/events", r#"{"action":"start"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["isListening"], true);

    let (status, body) = post(&harness, "/api/balance/events", r#"{"action":"status"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (status, _) = post(&harness, "/api/balance/events", r#"{"action":"restart"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(&harness, "/api/balance/events", r#"{"action":"stop"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["isListening"], false);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_balance_and_withdrawal_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;

    harness.emit(&digest('1'), EventKind::Deposit, "0xalice", dec!(10));
    harness.listener().start();
    eventually(|| harness.store().get_balance("0xalice") == dec!(10)).await;

    let (status, _, body) = get(&harness, "/api/balance/0xalice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], "10");
    assert_eq!(body["pendingDebit"], "0");

    // Client reports a withdrawal before it is indexed.
    let withdrawal = digest('2');
    harness.ledger.insert_unindexed(
        LedgerTransaction::new(withdrawal.clone(), "0xalice").with_event(LedgerEvent::new(
            withdrawal.clone(),
            0,
            EventKind::Withdrawal,
            "0xalice",
            dec!(4),
        )),
    );
    let report = json!({ "txDigest": withdrawal, "account": "0xalice" }).to_string();
    let (status, body) = post(&harness, "/api/balance/withdrawals", &report).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["pending"], true);

    harness.ledger.index(&withdrawal);
    let (status, body) = post(&harness, "/api/balance/withdrawals", &report).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["amount"], "4");
    assert_eq!(body["balance"], "6");

    let (status, body) = post(&harness, "/api/balance/withdrawals", &report).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], false);

    // The listener then sees the same withdrawal on the event stream.
    harness.emit(&withdrawal, EventKind::Withdrawal, "0xalice", dec!(4));
    eventually(|| {
        harness.listener().status().cursor.as_deref() == Some(&format!("{withdrawal}:0")[..])
    })
    .await;
    assert_eq!(harness.store().get_balance("0xalice"), dec!(6));

    let (_, _, body) = get(&harness, "/api/balance/0xnobody", None).await;
    assert_eq!(body["balance"], "0");
    assert_eq!(body["lastAppliedEvent"], Value::Null);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_treasury_balance() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;
    harness.ledger.set_balance(TREASURY, USDC, dec!(42.5));

    let (status, _, body) = get(&harness, "/api/treasury", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], "42.5");
    assert_eq!(body["treasury"], TREASURY);
    assert_eq!(harness.ledger.balance_queries(), 1);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_node_reports_bound_address() {
    let dir = tempfile::tempdir().unwrap();
    let node = GateNodeBuilder::new(configured(dir.path()))
        .with_ledger(Arc::new(InMemoryLedger::new()))
        .build()
        .await
        .unwrap();
    assert_ne!(node.local_addr().port(), 0);
    assert!(node.listener().is_some());
}
