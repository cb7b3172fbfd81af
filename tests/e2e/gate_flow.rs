//! Payment gate behaviour through a running node.

use super::harness::{configured, TestHarness};
use overflow_gate::gate::AI_INSIGHT;
use overflow_gate::ledger::InMemoryLedger;
use overflow_gate::{RedeemOutcome, RejectReason};
use reqwest::StatusCode;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_consumed_reference_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());

    let first = TestHarness::start(configured(dir.path()), Arc::clone(&ledger)).await;
    let reference = first.pay('a', "0xalice", dec!(0.01));
    let outcome = first.gate().redeem(AI_INSIGHT, &reference, None).await.unwrap();
    assert!(matches!(outcome, RedeemOutcome::Granted { .. }));
    tokio_test::assert_ok!(first.teardown().await);

    let second = TestHarness::start(configured(dir.path()), Arc::clone(&ledger)).await;
    let queries = ledger.transaction_queries();
    let outcome = second.gate().redeem(AI_INSIGHT, &reference, None).await.unwrap();
    assert!(matches!(
        outcome,
        RedeemOutcome::Rejected(RejectReason::AlreadyConsumed)
    ));
    assert_eq!(ledger.transaction_queries(), queries);
    tokio_test::assert_ok!(second.teardown().await);
}

#[tokio::test]
async fn test_concurrent_http_redeems_grant_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = TestHarness::setup(dir.path()).await;
    let reference = harness.pay('b', "0xalice", dec!(0.01));

    let requests = (0..12).map(|_| {
        harness
            .http()
            .get(harness.url("/api/ai/predict"))
            .header("Authorization", format!("x402 {reference}"))
            .send()
    });
    let statuses: Vec<StatusCode> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|response| response.unwrap().status())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StatusCode::UNAUTHORIZED)
            .count(),
        11
    );

    tokio_test::assert_ok!(harness.teardown().await);
}
