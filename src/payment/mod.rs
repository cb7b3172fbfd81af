//! Payment proof handling for overflow-gate.
//!
//! A client proves payment by presenting the digest of a Sui transaction that
//! moved the resource price into the treasury. Verification runs cheapest
//! check first:
//!
//! ```text
//! Authorization: x402 <digest>
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Reference shape     │──bad──► Rejected(Malformed)
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Consumed for this   │──yes──► Rejected(AlreadyConsumed)
//! │ resource?           │
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ LRU cache / ledger  │──miss─► Pending
//! └─────────┬───────────┘
//!           ▼
//!   status, recipient, asset,
//!   amount, signer checks
//!           │
//!           ▼
//!        Verified
//! ```

mod cache;
mod consumed;
mod reference;
mod verifier;

pub use cache::{CacheStats, VerifiedCache};
pub use consumed::ConsumedReferences;
pub use reference::{
    ReferenceError, TransactionReference, AUTH_SCHEME, MAX_REFERENCE_LEN, MIN_REFERENCE_LEN,
};
pub use verifier::{
    PaymentVerifier, PaymentVerifierConfig, RejectReason, Verification, VerifiedPayment,
};
