//! HTTP interface.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /api/ai/predict` | x402-gated insight |
//! | `GET /api/blitz/enter` | x402-gated Blitz entry (header proof) |
//! | `POST /api/blitz/enter` | Blitz entry with `{txDigest, sender?}` body |
//! | `GET /api/balance/events` | listener status |
//! | `POST /api/balance/events` | listener control `{action}` |
//! | `GET /api/balance/{account}` | stored balance |
//! | `POST /api/balance/withdrawals` | confirm a withdrawal `{txDigest, account}` |
//! | `GET /api/treasury` | treasury stablecoin balance |

use crate::balance::{BalanceListener, BalanceStore, ListenerStatus, WithdrawalConfirmer, WithdrawalOutcome};
use crate::config::SuiNetwork;
use crate::gate::{
    AccessGrant, InsightProvider, PaymentChallenge, PaymentGate, RedeemOutcome, AI_INSIGHT,
    BLITZ_ROUND,
};
use crate::ledger::LedgerClient;
use crate::payment::{RejectReason, TransactionReference, VerifiedPayment};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header carrying the account that claims to have paid.
pub const PAYMENT_SENDER_HEADER: &str = "x-payment-sender";

const CONFIG_HINT: &str =
    "Set SUI_RPC_ENDPOINT, TREASURY_PACKAGE_ID, TREASURY_OBJECT_ID and USDC_TYPE (see --help)";

const PENDING_HINT: &str = "Transaction may still be indexing. Wait a few seconds and retry with the same transaction digest.";

/// Everything the payment and balance routes need.
pub struct Services {
    /// Payment gate.
    pub gate: Arc<PaymentGate>,
    /// Insight content.
    pub insights: Arc<dyn InsightProvider>,
    /// Balance listener.
    pub listener: BalanceListener,
    /// Withdrawal confirmation.
    pub confirmer: Arc<WithdrawalConfirmer>,
    /// Ledger access.
    pub ledger: Arc<dyn LedgerClient>,
    /// Treasury object id.
    pub treasury: String,
    /// Stablecoin coin type.
    pub coin_type: String,
}

/// Shared state of the HTTP handlers.
pub struct ApiState {
    services: std::result::Result<Services, String>,
    store: Arc<BalanceStore>,
    network: SuiNetwork,
}

impl ApiState {
    /// State for a fully configured service.
    #[must_use]
    pub fn ready(services: Services, store: Arc<BalanceStore>, network: SuiNetwork) -> Self {
        Self {
            services: Ok(services),
            store,
            network,
        }
    }

    /// State for a service whose ledger configuration is incomplete.
    ///
    /// Every payment, listener and ledger route answers 503 with `reason`.
    #[must_use]
    pub fn misconfigured(reason: String, store: Arc<BalanceStore>, network: SuiNetwork) -> Self {
        Self {
            services: Err(reason),
            store,
            network,
        }
    }

    fn services(&self) -> std::result::Result<&Services, Response> {
        self.services.as_ref().map_err(|reason| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Server misconfiguration",
                    "detail": reason,
                    "hint": CONFIG_HINT,
                })),
            )
                .into_response()
        })
    }
}

/// Build the router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/ai/predict", get(ai_predict))
        .route("/api/blitz/enter", get(blitz_enter).post(blitz_enter_body))
        .route("/api/balance/events", get(listener_status).post(listener_control))
        .route("/api/balance/withdrawals", post(confirm_withdrawal))
        .route("/api/balance/{account}", get(balance))
        .route("/api/treasury", get(treasury))
        .with_state(Arc::new(state))
}

type Shared = State<Arc<ApiState>>;

async fn ai_predict(State(state): Shared, headers: HeaderMap) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    let (grant, _payment) = match redeem_from_headers(services, state.network, AI_INSIGHT, &headers).await {
        Ok(granted) => granted,
        Err(response) => return response,
    };

    let insight = services.insights.next_insight(&grant.subject).await;
    Json(json!({
        "success": true,
        "prediction": insight.prediction,
        "confidence": format!("{}%", insight.confidence),
        "txDigest": grant.reference,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn blitz_enter(State(state): Shared, headers: HeaderMap) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    match redeem_from_headers(services, state.network, BLITZ_ROUND, &headers).await {
        Ok((grant, _)) => blitz_granted(&grant),
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlitzEntry {
    tx_digest: String,
    sender: Option<String>,
}

async fn blitz_enter_body(State(state): Shared, body: Bytes) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    let Ok(entry) = serde_json::from_slice::<BlitzEntry>(&body) else {
        return bad_request("Invalid request body", None);
    };
    if let Err(e) = TransactionReference::parse(&entry.tx_digest) {
        return bad_request("Invalid transaction digest", Some(&e.to_string()));
    }

    match services
        .gate
        .redeem(BLITZ_ROUND, &entry.tx_digest, entry.sender.as_deref())
        .await
    {
        Ok(RedeemOutcome::Granted { grant, .. }) => blitz_granted(&grant),
        Ok(RedeemOutcome::Pending) => pending_response(),
        Ok(RedeemOutcome::Rejected(reason)) => rejected_response(&reason),
        Err(e) => ledger_unavailable(&e),
    }
}

fn blitz_granted(grant: &AccessGrant) -> Response {
    Json(json!({
        "success": true,
        "message": "Blitz Round access granted!",
        "txDigest": grant.reference,
        "expiresAt": grant.expires_at.map(|t| t.timestamp_millis()),
        "multiplier": grant.multiplier,
        "timestamp": grant.issued_at.to_rfc3339(),
    }))
    .into_response()
}

/// Run the header-based x402 exchange for `resource`.
async fn redeem_from_headers(
    services: &Services,
    network: SuiNetwork,
    resource: &str,
    headers: &HeaderMap,
) -> std::result::Result<(AccessGrant, VerifiedPayment), Response> {
    let Some(authorization) = headers.get(header::AUTHORIZATION) else {
        return Err(challenge_response(services, network, resource));
    };

    let reference = match authorization
        .to_str()
        .map_err(|e| e.to_string())
        .and_then(|value| TransactionReference::from_authorization(value).map_err(|e| e.to_string()))
    {
        Ok(reference) => reference,
        Err(detail) => return Err(rejected_response(&RejectReason::Malformed { detail })),
    };

    let sender = headers
        .get(PAYMENT_SENDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match services.gate.redeem(resource, reference.as_str(), sender).await {
        Ok(RedeemOutcome::Granted { grant, payment }) => Ok((grant, payment)),
        Ok(RedeemOutcome::Pending) => Err(pending_response()),
        Ok(RedeemOutcome::Rejected(reason)) => Err(rejected_response(&reason)),
        Err(e) => Err(ledger_unavailable(&e)),
    }
}

fn challenge_response(services: &Services, network: SuiNetwork, resource: &str) -> Response {
    let (Some(challenge), Some(policy)) = (
        services.gate.challenge(resource),
        services.gate.policy(resource),
    ) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Unknown resource" }))).into_response();
    };
    debug!(resource, amount = %challenge.amount, "Issuing payment challenge");

    let mut body = challenge_body(&challenge);
    body["message"] = Value::from(policy.message.clone());
    body["network"] = Value::from(network.to_string());
    if !policy.benefits.is_empty() {
        body["benefits"] = Value::from(policy.benefits.clone());
    }

    let mut response = (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
    let www_authenticate = format!(
        "x402 destination=\"{}\", amount=\"{}\", asset=\"{}\"",
        challenge.destination, challenge.amount, challenge.asset
    );
    if let Ok(value) = HeaderValue::from_str(&www_authenticate) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

fn challenge_body(challenge: &PaymentChallenge) -> Value {
    json!({
        "status": 402,
        "payment_type": "x402",
        "resource": challenge.resource_id,
        "destination": challenge.destination,
        "amount": challenge.amount.to_string(),
        "asset": challenge.asset,
        "memo": challenge.memo,
        "issuedAt": challenge.issued_at.to_rfc3339(),
    })
}

fn pending_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": 401,
            "error": "Payment not yet visible on the ledger",
            "reason": "pending",
            "retryable": true,
            "hint": PENDING_HINT,
        })),
    )
        .into_response()
}

fn rejected_response(reason: &RejectReason) -> Response {
    let mut body = json!({
        "status": 401,
        "error": reason.to_string(),
        "reason": reason.code(),
        "retryable": false,
        "hint": reason.hint(),
    });
    if let RejectReason::ActiveGrant { expires_at } = reason {
        body["expiresAt"] = Value::from(*expires_at);
    }
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn ledger_unavailable(e: &crate::Error) -> Response {
    warn!(error = %e, "Ledger unavailable during verification");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": 401,
            "error": "Could not verify payment",
            "reason": "ledger_unavailable",
            "retryable": e.is_retryable(),
            "hint": "The ledger could not be reached. Retry shortly with the same transaction digest.",
        })),
    )
        .into_response()
}

fn bad_request(error: &str, detail: Option<&str>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "detail": detail })),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    success: bool,
    message: &'static str,
    #[serde(flatten)]
    status: ListenerStatus,
}

fn status_message(status: &ListenerStatus) -> &'static str {
    if status.is_listening {
        "Event listener is running"
    } else {
        "Event listener is not running"
    }
}

async fn listener_status(State(state): Shared) -> Response {
    let Ok(services) = state.services.as_ref() else {
        return Json(json!({
            "success": true,
            "isListening": false,
            "message": "Event listener is not running",
            "hint": CONFIG_HINT,
        }))
        .into_response();
    };
    let status = services.listener.status();
    Json(ControlResponse {
        success: true,
        message: status_message(&status),
        status,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

async fn listener_control(State(state): Shared, body: Bytes) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    let Ok(request) = serde_json::from_slice::<ControlRequest>(&body) else {
        return bad_request("Invalid request body", None);
    };

    let listener = &services.listener;
    let response = match request.action.as_str() {
        "start" if listener.is_listening() => ControlResponse {
            success: false,
            message: "Event listener is already running",
            status: listener.status(),
        },
        "start" => {
            info!("Starting balance listener on request");
            ControlResponse {
                success: true,
                message: "Balance event listener started successfully",
                status: listener.start(),
            }
        }
        "stop" if !listener.is_listening() => ControlResponse {
            success: false,
            message: "Event listener is not running",
            status: listener.status(),
        },
        "stop" => {
            info!("Stopping balance listener on request");
            ControlResponse {
                success: true,
                message: "Balance event listener stopped successfully",
                status: listener.stop().await,
            }
        }
        "status" => {
            let status = listener.status();
            ControlResponse {
                success: true,
                message: status_message(&status),
                status,
            }
        }
        _ => {
            return bad_request(
                "Invalid action. Use \"start\", \"stop\", or \"status\"",
                Some(&request.action),
            )
        }
    };
    Json(response).into_response()
}

async fn balance(State(state): Shared, Path(account): Path<String>) -> Response {
    let record = state.store.record(&account);
    Json(json!({
        "account": account,
        "balance": record.as_ref().map_or_else(|| "0".to_string(), |r| r.balance.to_string()),
        "pendingDebit": record.as_ref().map_or_else(|| "0".to_string(), |r| r.pending_debit.to_string()),
        "lastAppliedEvent": record.and_then(|r| r.last_applied_event),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalReport {
    tx_digest: String,
    account: String,
}

async fn confirm_withdrawal(State(state): Shared, body: Bytes) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    let Ok(report) = serde_json::from_slice::<WithdrawalReport>(&body) else {
        return bad_request("Invalid request body", None);
    };

    match services.confirmer.confirm(&report.tx_digest, &report.account).await {
        Ok(WithdrawalOutcome::Confirmed { amount, applied }) => Json(json!({
            "success": true,
            "applied": applied,
            "amount": amount.to_string(),
            "balance": state.store.get_balance(&report.account).to_string(),
        }))
        .into_response(),
        Ok(WithdrawalOutcome::Pending) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": false,
                "pending": true,
                "hint": PENDING_HINT,
            })),
        )
            .into_response(),
        Ok(WithdrawalOutcome::Rejected { reason }) => bad_request("Withdrawal not confirmed", Some(&reason)),
        Err(e) => {
            warn!(error = %e, "Withdrawal confirmation failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Could not confirm withdrawal",
                    "retryable": e.is_retryable(),
                })),
            )
                .into_response()
        }
    }
}

async fn treasury(State(state): Shared) -> Response {
    let services = match state.services() {
        Ok(services) => services,
        Err(response) => return response,
    };
    match services
        .ledger
        .get_account_balance(&services.treasury, &services.coin_type)
        .await
    {
        Ok(balance) => Json(json!({
            "treasury": services.treasury,
            "asset": services.coin_type,
            "balance": balance.to_string(),
            "network": state.network.to_string(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Treasury balance query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Ledger unavailable",
                    "retryable": e.is_transient(),
                })),
            )
                .into_response()
        }
    }
}
