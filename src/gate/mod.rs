//! The payment gate: challenge, redeem, grant.
//!
//! Per `(resource, requester)` the gate moves through
//!
//! ```text
//! NoProof ──challenge──► ProofSubmitted ──redeem──► Granted
//!                               ▲              ├──► Rejected
//!                               └──── retry ───┴──► Pending
//! ```
//!
//! `Pending` is not terminal: the same reference may be presented again once
//! the ledger has indexed it, without a new challenge.
//!
//! Unexpired timed grants can be kept in a snapshot
//! ([`PaymentGate::with_grant_record`]) so a restart inside a Blitz window
//! does not let the same payer open an overlapping one.

mod content;

pub use content::{Insight, InsightProvider, PlaceholderInsights};

use crate::error::Result;
use crate::event::{GateEvent, GateEventsSender};
use crate::payment::{PaymentVerifier, RejectReason, Verification, VerifiedPayment};
use crate::snapshot;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Resource id of the AI insight feed.
pub const AI_INSIGHT: &str = "ai-insight";

/// Resource id of the Blitz round.
pub const BLITZ_ROUND: &str = "blitz-round";

/// How long a grant lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPolicy {
    /// One access per payment; no expiry.
    SingleUse,
    /// Access for a fixed window with a bet multiplier.
    Timed {
        /// Length of the window.
        window: Duration,
        /// Multiplier applied during the window.
        multiplier: u32,
    },
}

/// Static policy of one gated resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// Resource id.
    pub id: String,
    /// Price in stablecoin units.
    pub price: Decimal,
    /// Asset symbol shown to clients.
    pub asset: String,
    /// Memo clients attach to the payment.
    pub memo: String,
    /// Human-readable challenge message.
    pub message: String,
    /// Advertised benefits.
    pub benefits: Vec<String>,
    /// Grant lifetime.
    pub grant: GrantPolicy,
}

impl ResourcePolicy {
    /// The single-use AI insight feed.
    #[must_use]
    pub fn ai_insight(price: Decimal) -> Self {
        Self {
            id: AI_INSIGHT.to_string(),
            price,
            asset: "USDC".to_string(),
            memo: "AI_INSIGHT_PREDICTION".to_string(),
            message: "Payment Required to access AI Insights".to_string(),
            benefits: Vec::new(),
            grant: GrantPolicy::SingleUse,
        }
    }

    /// The time-boxed Blitz round.
    #[must_use]
    pub fn blitz_round(price: Decimal, window: Duration, multiplier: u32) -> Self {
        Self {
            id: BLITZ_ROUND.to_string(),
            price,
            asset: "USDC".to_string(),
            memo: "BLITZ_ROUND_ENTRY".to_string(),
            message: "Payment required for Blitz Round entry".to_string(),
            benefits: vec![
                format!("{multiplier}x multipliers on all bets"),
                format!(
                    "Access for current Blitz Round ({} seconds)",
                    window.as_secs()
                ),
                "Premium visual effects".to_string(),
            ],
            grant: GrantPolicy::Timed { window, multiplier },
        }
    }
}

/// A "payment required" challenge. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Resource id.
    pub resource_id: String,
    /// Account to pay.
    pub destination: String,
    /// Price.
    pub amount: Decimal,
    /// Asset symbol.
    pub asset: String,
    /// Memo to attach.
    pub memo: String,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
}

/// Access issued for a verified payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Resource id.
    pub resource_id: String,
    /// Account that paid.
    pub subject: String,
    /// Payment that bought the grant.
    pub reference: String,
    /// Issue time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    /// Expiry, for timed grants.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Bet multiplier, for timed grants.
    pub multiplier: Option<u32>,
}

impl AccessGrant {
    /// Returns true while the grant may be used.
    ///
    /// Expiry is checked at use time; grants are never swept.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now < expires)
    }
}

/// Result of a redeem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Access granted.
    Granted {
        /// The grant.
        grant: AccessGrant,
        /// The payment it was bought with.
        payment: VerifiedPayment,
    },
    /// The transaction is not indexed yet; retry with the same reference.
    Pending,
    /// The proof was refused.
    Rejected(RejectReason),
}

type GrantKey = (String, String);

fn grant_key(resource: &str, subject: &str) -> GrantKey {
    (resource.to_string(), subject.to_ascii_lowercase())
}

/// Gate over a fixed set of resources.
pub struct PaymentGate {
    policies: HashMap<String, ResourcePolicy>,
    verifier: Arc<PaymentVerifier>,
    // Also serializes the consume-then-grant step of concurrent redeems.
    active: Mutex<HashMap<GrantKey, AccessGrant>>,
    grants_path: Option<PathBuf>,
    events: GateEventsSender,
}

impl PaymentGate {
    /// Create a gate over `policies`.
    #[must_use]
    pub fn new(
        policies: impl IntoIterator<Item = ResourcePolicy>,
        verifier: Arc<PaymentVerifier>,
        events: GateEventsSender,
    ) -> Self {
        let policies: HashMap<_, _> = policies
            .into_iter()
            .map(|policy| (policy.id.clone(), policy))
            .collect();
        info!(resources = policies.len(), "Payment gate ready");
        Self {
            policies,
            verifier,
            active: Mutex::new(HashMap::new()),
            grants_path: None,
            events,
        }
    }

    /// Keep unexpired timed grants in the snapshot at `path`, loading the
    /// ones a previous run left there.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn with_grant_record(mut self, path: &Path) -> Result<Self> {
        let saved: Vec<AccessGrant> = snapshot::load(path)?.unwrap_or_default();
        let now = Utc::now();
        let active = self.active.get_mut();
        for grant in saved.into_iter().filter(|g| g.is_active_at(now)) {
            active.insert(grant_key(&grant.resource_id, &grant.subject), grant);
        }
        debug!(path = %path.display(), restored = active.len(), "Loaded active grants");
        self.grants_path = Some(path.to_path_buf());
        Ok(self)
    }

    /// Policy of `resource`, if it exists.
    #[must_use]
    pub fn policy(&self, resource: &str) -> Option<&ResourcePolicy> {
        self.policies.get(resource)
    }

    /// Issue a payment challenge for `resource`.
    ///
    /// Pure: no state changes and no ledger access.
    #[must_use]
    pub fn challenge(&self, resource: &str) -> Option<PaymentChallenge> {
        let policy = self.policies.get(resource)?;
        Some(PaymentChallenge {
            resource_id: policy.id.clone(),
            destination: self.verifier.treasury().to_string(),
            amount: policy.price,
            asset: policy.asset.clone(),
            memo: policy.memo.clone(),
            issued_at: Utc::now(),
        })
    }

    /// Redeem a payment proof for `resource`.
    ///
    /// At most one redeem per `(resource, reference)` is ever granted, even
    /// under concurrency. While the payer holds an unexpired timed grant for
    /// the resource a new proof is refused with `ActiveGrant` and is not
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger stayed unreachable through all retries
    /// or the payment could not be recorded as consumed. No grant is issued
    /// in either case.
    pub async fn redeem(
        &self,
        resource: &str,
        raw_reference: &str,
        claimed_sender: Option<&str>,
    ) -> Result<RedeemOutcome> {
        let Some(policy) = self.policies.get(resource) else {
            return Ok(self.rejected(
                resource,
                RejectReason::UnknownResource {
                    resource: resource.to_string(),
                },
            ));
        };

        let payment = match self
            .verifier
            .verify(resource, policy.price, raw_reference, claimed_sender)
            .await?
        {
            Verification::Verified(payment) => payment,
            Verification::Pending => return Ok(RedeemOutcome::Pending),
            Verification::Rejected(reason) => return Ok(self.rejected(resource, reason)),
        };

        let grant = {
            let mut active = self.active.lock().await;
            let now = Utc::now();
            let key = grant_key(resource, &payment.sender);

            let blocking = active
                .get(&key)
                .filter(|g| g.is_active_at(now))
                .map(|g| g.expires_at.map_or(0, |expires| expires.timestamp_millis()));
            if let Some(expires_at) = blocking {
                return Ok(self.rejected(resource, RejectReason::ActiveGrant { expires_at }));
            }

            if !self.verifier.consume(resource, &payment).await? {
                return Ok(self.rejected(resource, RejectReason::AlreadyConsumed));
            }

            let grant = issue(policy, &payment, now);
            if grant.expires_at.is_some() {
                active.retain(|_, g| g.is_active_at(now));
                active.insert(key, grant.clone());
                self.save_grants(&active).await;
            }
            grant
        };

        info!(
            resource,
            subject = %grant.subject,
            reference = %grant.reference,
            expires_at = ?grant.expires_at,
            "Access granted"
        );
        let _ = self.events.send(GateEvent::AccessGranted {
            resource: resource.to_string(),
            subject: grant.subject.clone(),
            reference: grant.reference.clone(),
        });

        Ok(RedeemOutcome::Granted { grant, payment })
    }

    /// The unexpired grant `subject` holds for `resource`, if any.
    pub async fn active_grant(&self, resource: &str, subject: &str) -> Option<AccessGrant> {
        self.active
            .lock()
            .await
            .get(&grant_key(resource, subject))
            .filter(|g| g.is_active_at(Utc::now()))
            .cloned()
    }

    // The payment is already consumed here; a failed write is only logged.
    async fn save_grants(&self, active: &HashMap<GrantKey, AccessGrant>) {
        let Some(path) = &self.grants_path else {
            return;
        };
        let grants: Vec<&AccessGrant> = active.values().collect();
        let written = match snapshot::encode(&grants) {
            Ok(bytes) => snapshot::write_off_thread(path.clone(), bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to persist active grants");
        }
    }

    fn rejected(&self, resource: &str, reason: RejectReason) -> RedeemOutcome {
        debug!(resource, code = reason.code(), "Redeem rejected");
        let _ = self.events.send(GateEvent::AccessRejected {
            resource: resource.to_string(),
            code: reason.code(),
        });
        RedeemOutcome::Rejected(reason)
    }
}

fn issue(policy: &ResourcePolicy, payment: &VerifiedPayment, now: DateTime<Utc>) -> AccessGrant {
    let (expires_at, multiplier) = match policy.grant {
        GrantPolicy::SingleUse => (None, None),
        GrantPolicy::Timed { window, multiplier } => {
            let expires = TimeDelta::from_std(window)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (Some(expires), Some(multiplier))
        }
    };
    AccessGrant {
        resource_id: policy.id.clone(),
        subject: payment.sender.clone(),
        reference: payment.reference.to_string(),
        issued_at: now,
        expires_at,
        multiplier,
    }
}
