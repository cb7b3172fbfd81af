//! Sui full-node JSON-RPC client.
//!
//! Uses three read-only methods:
//! - `sui_getTransactionBlock` for payment and withdrawal proofs
//! - `suix_queryEvents` for the treasury event stream
//! - `suix_getBalance` for account balances

use crate::config::LedgerTarget;
use crate::error::{Error, Result};
use crate::ledger::{
    EventFilter, EventId, EventKind, EventPage, ExecutionStatus, LedgerClient, LedgerError,
    LedgerEvent, LedgerTransaction, RetryPolicy, Transfer,
};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Message fragment the node returns for unknown digests.
const NOT_FOUND_MARKER: &str = "Could not find the referenced transaction";

const DEPOSIT_EVENT: &str = "DepositEvent";
const WITHDRAWAL_EVENT: &str = "WithdrawalEvent";

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransactionBlock {
    digest: String,
    transaction: Option<RawTransaction>,
    effects: Option<RawEffects>,
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    balance_changes: Vec<RawBalanceChange>,
    timestamp_ms: Option<String>,
    checkpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    data: RawTransactionData,
}

#[derive(Debug, Deserialize)]
struct RawTransactionData {
    sender: String,
}

#[derive(Debug, Deserialize)]
struct RawEffects {
    status: RawStatus,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    status: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBalanceChange {
    owner: Value,
    coin_type: String,
    amount: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventId {
    tx_digest: String,
    event_seq: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: RawEventId,
    #[serde(rename = "type")]
    event_type: String,
    parsed_json: Option<Value>,
    timestamp_ms: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventPage {
    data: Vec<RawEvent>,
    next_cursor: Option<RawEventId>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBalance {
    total_balance: String,
}

/// JSON-RPC client for a Sui full node.
pub struct SuiRpcClient {
    http: reqwest::Client,
    target: LedgerTarget,
    timeout: Duration,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl SuiRpcClient {
    /// Create a client for the given ledger target.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(target: LedgerTarget, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        debug!(
            network = %target.network,
            endpoint = %target.rpc_endpoint,
            "Sui RPC client created"
        );

        Ok(Self {
            http,
            target,
            timeout,
            retry,
            next_id: AtomicU64::new(1),
        })
    }

    /// The ledger target this client queries.
    #[must_use]
    pub fn target(&self) -> &LedgerTarget {
        &self.target
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.target.rpc_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Transient(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("{method}: HTTP {status}"),
            });
        }

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| self.classify(&e))?;

        if let Some(fault) = envelope.error {
            return Err(LedgerError::Rpc {
                code: fault.code,
                message: fault.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| LedgerError::Schema(format!("{method}: response has no result")))
    }

    fn classify(&self, e: &reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else if e.is_decode() {
            LedgerError::Schema(e.to_string())
        } else {
            LedgerError::Transient(e.to_string())
        }
    }

    async fn fetch_transaction(
        &self,
        digest: &str,
    ) -> std::result::Result<Option<LedgerTransaction>, LedgerError> {
        let params = json!([
            digest,
            {
                "showInput": true,
                "showEffects": true,
                "showEvents": true,
                "showBalanceChanges": true,
            }
        ]);
        match self
            .call::<RawTransactionBlock>("sui_getTransactionBlock", params)
            .await
        {
            Ok(raw) => self.parse_transaction(raw).map(Some),
            Err(LedgerError::Rpc { message, .. }) if message.contains(NOT_FOUND_MARKER) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_transaction(
        &self,
        raw: RawTransactionBlock,
    ) -> std::result::Result<LedgerTransaction, LedgerError> {
        let sender = raw
            .transaction
            .map(|t| t.data.sender)
            .ok_or_else(|| LedgerError::Schema(format!("{}: missing transaction input", raw.digest)))?;

        let status = match raw.effects {
            Some(effects) if effects.status.status == "success" => ExecutionStatus::Success,
            Some(effects) => ExecutionStatus::Failure {
                error: effects
                    .status
                    .error
                    .unwrap_or_else(|| effects.status.status.clone()),
            },
            None => {
                return Err(LedgerError::Schema(format!(
                    "{}: missing transaction effects",
                    raw.digest
                )))
            }
        };

        let mut events = Vec::new();
        for event in &raw.events {
            if !self.is_treasury_event(event) {
                continue;
            }
            // Unknown treasury events inside a transaction are not fatal here;
            // the listener is strict about its own stream.
            if let Ok(parsed) = self.parse_event(event) {
                events.push(parsed);
            }
        }

        let mut transfers: Vec<Transfer> = events
            .iter()
            .filter(|e| e.kind == EventKind::Deposit)
            .map(|e| Transfer {
                recipient: self.target.treasury_object_id.clone(),
                coin_type: self.target.usdc_type.clone(),
                amount: e.amount,
            })
            .collect();

        for change in &raw.balance_changes {
            let Some(owner) = owner_address(&change.owner) else {
                continue;
            };
            let amount = self.to_amount(&change.amount, &change.coin_type)?;
            if amount.is_sign_positive() && !amount.is_zero() {
                transfers.push(Transfer {
                    recipient: owner,
                    coin_type: change.coin_type.clone(),
                    amount,
                });
            }
        }

        Ok(LedgerTransaction {
            digest: raw.digest,
            sender,
            status,
            transfers,
            events,
            checkpoint: raw.checkpoint.as_deref().and_then(|c| c.parse().ok()),
            timestamp_ms: raw.timestamp_ms.as_deref().and_then(|t| t.parse().ok()),
        })
    }

    fn is_treasury_event(&self, event: &RawEvent) -> bool {
        event
            .event_type
            .starts_with(&format!("{}::", self.target.treasury_package_id))
    }

    fn parse_event(&self, raw: &RawEvent) -> std::result::Result<LedgerEvent, LedgerError> {
        let name = raw.event_type.rsplit("::").next().unwrap_or_default();
        let kind = match name {
            DEPOSIT_EVENT => EventKind::Deposit,
            WITHDRAWAL_EVENT => EventKind::Withdrawal,
            other => {
                return Err(LedgerError::Schema(format!(
                    "unrecognised treasury event type {other}"
                )))
            }
        };

        let fields = raw
            .parsed_json
            .as_ref()
            .ok_or_else(|| LedgerError::Schema(format!("{name}: missing parsedJson")))?;
        let account = fields
            .get("user")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::Schema(format!("{name}: missing user field")))?;
        let amount = match fields.get("amount") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(LedgerError::Schema(format!("{name}: missing amount field"))),
        };
        let amount = self.to_amount(&amount, &self.target.usdc_type)?;
        if amount.is_sign_negative() {
            return Err(LedgerError::Schema(format!("{name}: negative amount")));
        }

        let id = parse_event_id(&raw.id)?;
        Ok(LedgerEvent {
            reference: id.tx_digest.clone(),
            id,
            kind,
            account: account.to_string(),
            amount,
            timestamp_ms: raw.timestamp_ms.as_deref().and_then(|t| t.parse().ok()),
        })
    }

    /// Convert a raw on-chain integer amount to coin units.
    fn to_amount(&self, raw: &str, coin_type: &str) -> std::result::Result<Decimal, LedgerError> {
        let value: i128 = raw
            .trim()
            .parse()
            .map_err(|_| LedgerError::Schema(format!("invalid amount {raw:?}")))?;
        let scale = if coin_type == self.target.usdc_type {
            self.target.usdc_decimals
        } else {
            0
        };
        Decimal::try_from_i128_with_scale(value, scale)
            .map_err(|e| LedgerError::Schema(format!("amount {raw} out of range: {e}")))
    }
}

fn owner_address(owner: &Value) -> Option<String> {
    owner
        .get("AddressOwner")
        .or_else(|| owner.get("ObjectOwner"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_event_id(raw: &RawEventId) -> std::result::Result<EventId, LedgerError> {
    let event_seq = raw
        .event_seq
        .parse()
        .map_err(|_| LedgerError::Schema(format!("invalid eventSeq {:?}", raw.event_seq)))?;
    Ok(EventId::new(raw.tx_digest.clone(), event_seq))
}

impl LedgerClient for SuiRpcClient {
    fn get_transaction<'a>(
        &'a self,
        digest: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<LedgerTransaction>, LedgerError>> {
        Box::pin(async move {
            self.retry
                .lookup("sui_getTransactionBlock", move || self.fetch_transaction(digest))
                .await
        })
    }

    fn get_events<'a>(
        &'a self,
        filter: &'a EventFilter,
        since: Option<&'a EventId>,
        limit: usize,
    ) -> BoxFuture<'a, std::result::Result<EventPage, LedgerError>> {
        Box::pin(async move {
            let cursor = since.map(|id| {
                json!({ "txDigest": id.tx_digest, "eventSeq": id.event_seq.to_string() })
            });
            let params = json!([
                { "MoveModule": { "package": filter.package, "module": filter.module } },
                cursor,
                limit,
                false,
            ]);

            let raw: RawEventPage = self
                .retry
                .run("suix_queryEvents", move || self.call("suix_queryEvents", params.clone()))
                .await?;

            let events = raw
                .data
                .iter()
                .map(|event| self.parse_event(event))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let next_cursor = raw.next_cursor.as_ref().map(parse_event_id).transpose()?;

            Ok(EventPage {
                events,
                next_cursor,
                has_next_page: raw.has_next_page,
            })
        })
    }

    fn get_account_balance<'a>(
        &'a self,
        account: &'a str,
        coin_type: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Decimal, LedgerError>> {
        Box::pin(async move {
            let params = json!([account, coin_type]);
            let raw: RawBalance = self
                .retry
                .run("suix_getBalance", move || self.call("suix_getBalance", params.clone()))
                .await?;
            self.to_amount(&raw.total_balance, coin_type)
        })
    }
}
