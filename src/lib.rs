//! # overflow-gate
//!
//! Payment gating and balance reconciliation for the Overflow game backend.
//!
//! This crate provides:
//! - An x402-style payment gate: a request/verify/grant cycle that turns a
//!   Sui transaction digest into short-lived, scoped access to premium
//!   features (the AI insight feed and the time-boxed Blitz round)
//! - A supervised balance listener that drains treasury deposit and
//!   withdrawal events into an authoritative off-chain balance store,
//!   exactly once and resumable after restart
//!
//! ## Architecture
//!
//! ```text
//!  client ──GET──► PaymentGate ──402 challenge──► client pays on-chain
//!                      │
//!  client ──x402 <digest>──► PaymentGate ──► PaymentVerifier ──► LedgerClient
//!                      │                           │
//!                 AccessGrant              ConsumedReferences
//!
//!  BalanceListener ──query events──► LedgerClient
//!        │
//!        └──apply_event──► BalanceStore ◄── WithdrawalConfirmer
//! ```
//!
//! The ledger is only ever observed. Every financial fact (amount, asset,
//! recipient, signer) is re-derived from the ledger, never taken from the
//! client.
//!
//! ## Example
//!
//! ```rust,no_run
//! use overflow_gate::{GateConfig, GateNodeBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GateConfig::default();
//!     let mut node = GateNodeBuilder::new(config).build().await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod balance;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod ledger;
pub mod node;
pub mod payment;
mod snapshot;

pub use balance::{BalanceListener, BalanceStore, ListenerStatus, WithdrawalConfirmer};
pub use config::{GateConfig, LedgerConfig, SuiNetwork};
pub use error::{Error, Result};
pub use event::{GateEvent, GateEventsChannel};
pub use gate::{AccessGrant, PaymentChallenge, PaymentGate, RedeemOutcome, ResourcePolicy};
pub use ledger::{InMemoryLedger, LedgerClient, LedgerError, SuiRpcClient};
pub use node::{GateNodeBuilder, RunningGateNode};
pub use payment::{PaymentVerifier, RejectReason, TransactionReference, VerifiedPayment};
