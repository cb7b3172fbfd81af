//! End-to-end tests for overflow-gate.
//!
//! Each test boots a real node (HTTP on `127.0.0.1:0`) over an in-memory
//! ledger via [`harness::TestHarness`].

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;

mod gate_flow;
mod http_api;
mod listener_flow;
