//! Balance listener behaviour across node restarts.

use super::harness::{configured, digest, eventually, TestHarness};
use overflow_gate::balance::ListenerState;
use overflow_gate::ledger::{EventKind, InMemoryLedger};
use overflow_gate::GateEvent;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_cursor_survives_node_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(InMemoryLedger::new());

    let first = TestHarness::start(configured(dir.path()), Arc::clone(&ledger)).await;
    first.emit(&digest('1'), EventKind::Deposit, "0xAlice", dec!(10));
    first.emit(&digest('2'), EventKind::Deposit, "0xalice", dec!(5));
    first.emit(&digest('3'), EventKind::Withdrawal, "0xalice", dec!(3));
    first.listener().start();
    eventually(|| first.store().get_balance("0xalice") == dec!(12)).await;
    tokio_test::assert_ok!(first.teardown().await);

    let second = TestHarness::start(configured(dir.path()), Arc::clone(&ledger)).await;
    assert_eq!(second.store().get_balance("0xalice"), dec!(12));
    assert_eq!(
        second.listener().status().cursor,
        Some(format!("{}:0", digest('3')))
    );

    second.emit(&digest('4'), EventKind::Deposit, "0xalice", dec!(1));
    second.listener().start();
    eventually(|| second.store().get_balance("0xalice") == dec!(13)).await;
    assert_eq!(second.listener().status().events_applied, 1);
    tokio_test::assert_ok!(second.teardown().await);
}

#[tokio::test]
async fn test_autostart_applies_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = configured(dir.path());
    config.listener.autostart = true;

    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fail_next(3);
    let harness = TestHarness::start(config, ledger).await;
    harness.emit(&digest('5'), EventKind::Deposit, "0xbob", dec!(2.5));

    eventually(|| harness.listener().is_listening()).await;
    eventually(|| harness.store().get_balance("0xbob") == dec!(2.5)).await;
    assert!(harness.ledger.event_queries() > 3);

    tokio_test::assert_ok!(harness.teardown().await);
}

#[tokio::test]
async fn test_schema_fault_stops_listener_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = TestHarness::setup(dir.path()).await;
    harness.ledger.set_schema_fault(Some("event field `amount` missing"));
    harness.listener().start();

    eventually(|| harness.listener().status().state == ListenerState::Stopped).await;

    let status: serde_json::Value = harness
        .http()
        .get(harness.url("/api/balance/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["isListening"], false);
    assert!(status["lastError"].as_str().unwrap().contains("amount"));
    assert!(harness
        .drain_events()
        .iter()
        .any(|e| matches!(e, GateEvent::ListenerFailed { message } if message.contains("amount"))));

    harness.ledger.set_schema_fault(None);
    harness.emit(&digest('6'), EventKind::Deposit, "0xcarol", dec!(1));
    harness.listener().start();
    eventually(|| harness.store().get_balance("0xcarol") == dec!(1)).await;

    tokio_test::assert_ok!(harness.teardown().await);
}
