//! Off-chain balances reconciled from treasury events.
//!
//! ```text
//! LedgerClient ──get_events──► BalanceListener ──apply_event──► BalanceStore
//!                                                                   ▲
//! client report ──► WithdrawalConfirmer ──apply_verified_withdrawal─┘
//! ```

mod listener;
mod store;
mod withdrawal;

pub use listener::{BalanceListener, ListenerState, ListenerStatus};
pub use store::{BalanceRecord, BalanceStore};
pub use withdrawal::{WithdrawalConfirmer, WithdrawalOutcome};
