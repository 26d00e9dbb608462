//! # REST + WebSocket API
//!
//! Builds the axum router for the node's HTTP interface. All endpoints share
//! application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                          | Description                               |
//! |--------|-------------------------------|-------------------------------------------|
//! | GET    | `/health`                     | Liveness check                            |
//! | GET    | `/status`                     | Node and contract summary                 |
//! | POST   | `/remittances`                | Open a remittance (creates the escrow)    |
//! | GET    | `/remittances/:id`            | Mirror record                             |
//! | POST   | `/remittances/:id/submit`     | Submit the externally signed pending step |
//! | POST   | `/remittances/:id/rebuild`    | Rebuild a stale pending step              |
//! | POST   | `/remittances/:id/fund`       | Deposit into the escrow                   |
//! | POST   | `/remittances/:id/release`    | Pay out to the recipient                  |
//! | POST   | `/remittances/:id/refund`     | Return funds to the sender                |
//! | POST   | `/transactions`               | Relay a signed envelope                   |
//! | GET    | `/transactions/:hash`         | Applied transaction by hash               |
//! | GET    | `/accounts/:address`          | Account sequence and balances             |
//! | POST   | `/accounts/:address/fund`     | Devnet faucet                             |
//! | GET    | `/contract`                   | Contract lifecycle state                  |
//! | POST   | `/contract/code`              | Upload a code build                       |
//! | POST   | `/contract/pause`             | Pause (admin)                             |
//! | POST   | `/contract/unpause`           | Unpause (admin)                           |
//! | POST   | `/contract/upgrade`           | Stage new code (admin)                    |
//! | POST   | `/contract/migrate`           | Finish an upgrade (admin)                 |
//! | GET    | `/ws`                         | WebSocket for live mirror updates         |
//!
//! ## Error mapping
//!
//! | Class / case            | Status |
//! |-------------------------|--------|
//! | Validation              | 400    |
//! | Account or record gone  | 404    |
//! | Auth                    | 403    |
//! | Sequence, state conflict| 409    |
//! | Network                 | 503    |
//! | Ledger rejection        | 422    |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use remit_contracts::{CodeHash, ContractError};
use remit_protocol::address::Address;
use remit_protocol::asset::AssetResolver;
use remit_protocol::config::DEVNET_FAUCET_AMOUNT;
use remit_protocol::error::{ErrorClass, RemitError};
use remit_protocol::ledger::{LedgerEvent, TransactionRecord};
use remit_protocol::transaction::Amount;

use crate::devnet::{ContractInfo, Devnet};
use crate::service::{
    NodeEvent, RemittanceRequest, RemittanceService, ServiceError, StepOutcome, StepRequest,
};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub service: Arc<RemittanceService>,
    pub devnet: Arc<Devnet>,
    /// Broadcast channel the service publishes mirror updates on.
    pub event_tx: broadcast::Sender<NodeEvent>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .route("/remittances", post(create_remittance_handler))
        .route("/remittances/:id", get(remittance_handler))
        .route("/remittances/:id/submit", post(submit_step_handler))
        .route("/remittances/:id/rebuild", post(rebuild_step_handler))
        .route("/remittances/:id/fund", post(fund_handler))
        .route("/remittances/:id/release", post(release_handler))
        .route("/remittances/:id/refund", post(refund_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/transactions/:hash", get(transaction_by_hash_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/accounts/:address/fund", post(faucet_handler))
        .route("/contract", get(contract_handler))
        .route("/contract/code", post(upload_code_handler))
        .route("/contract/pause", post(pause_handler))
        .route("/contract/unpause", post(unpause_handler))
        .route("/contract/upgrade", post(upgrade_handler))
        .route("/contract/migrate", post(migrate_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    /// Network passphrase.
    pub network: String,
    /// Latest closed ledger.
    pub ledger: u64,
    pub contract: Address,
    pub contract_version: Option<u32>,
    pub paused: Option<bool>,
    /// Mirror records held by this node.
    pub remittances: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// A hex-encoded envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnvelopeRequest {
    pub envelope: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedResponse {
    pub hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FaucetRequest {
    /// Decimal units. Defaults to the devnet faucet amount.
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FaucetResponse {
    pub address: Address,
    pub asset: String,
    /// Stroops.
    pub balance: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadCodeRequest {
    pub label: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadCodeResponse {
    pub code_hash: CodeHash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub code_hash: CodeHash,
}

/// Result of an admin lifecycle call.
#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleResponse {
    pub tx_hash: String,
    pub ledger: u64,
    pub events: Vec<LedgerEvent>,
}

impl From<TransactionRecord> for LifecycleResponse {
    fn from(record: TransactionRecord) -> Self {
        Self {
            tx_hash: record.hash,
            ledger: record.ledger,
            events: record.events,
        }
    }
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Ledger or contract reason code, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code, class) = match &self {
            ServiceError::Remit(e) => {
                let status = match (e, e.class()) {
                    (RemitError::AccountNotFound { .. }, _) => StatusCode::NOT_FOUND,
                    (_, ErrorClass::Validation) => StatusCode::BAD_REQUEST,
                    (_, ErrorClass::Auth) => StatusCode::FORBIDDEN,
                    (RemitError::Sequence { .. }, _) => StatusCode::CONFLICT,
                    (_, ErrorClass::Retryable) => StatusCode::SERVICE_UNAVAILABLE,
                    (_, ErrorClass::Fatal) => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, e.reason_code().map(str::to_string), Some(e.class()))
            }
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, None, None),
            ServiceError::Conflict(_) => (StatusCode::CONFLICT, None, None),
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code,
            class,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ServiceError>;

fn contract_error(e: ContractError) -> ServiceError {
    ServiceError::Remit(RemitError::LedgerRejection {
        code: e.reason_code().to_string(),
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: node and contract summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.devnet.contract_info().ok();
    Json(StatusResponse {
        version: state.version.clone(),
        network: state.service.network().passphrase.clone(),
        ledger: state.devnet.ledger.latest_ledger(),
        contract: state.devnet.contract_address(),
        contract_version: info.as_ref().map(|i| i.version),
        paused: info.as_ref().map(|i| i.paused),
        remittances: state.service.mirror().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /remittances`: open a remittance.
///
/// With `secret_key` the node signs and submits straight away; without it
/// the response carries the unsigned `create_escrow` envelope.
async fn create_remittance_handler(
    State(state): State<AppState>,
    Json(req): Json<RemittanceRequest>,
) -> Result<(StatusCode, Json<StepOutcome>), ServiceError> {
    let outcome = state.service.create_remittance(req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /remittances/:id`: the mirror record.
async fn remittance_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<crate::mirror::MirrorRecord> {
    state.service.remittance(&id).map(Json)
}

/// `POST /remittances/:id/submit`: submit the signed pending step.
async fn submit_step_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(req): Json<EnvelopeRequest>,
) -> ApiResult<StepOutcome> {
    state.service.submit_signed(id, &req.envelope).await.map(Json)
}

/// `POST /remittances/:id/rebuild`: fresh envelope for the pending step.
async fn rebuild_step_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<StepOutcome> {
    state.service.rebuild_step(id).await.map(Json)
}

async fn fund_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(req): Json<StepRequest>,
) -> ApiResult<StepOutcome> {
    state.service.fund(id, req).await.map(Json)
}

async fn release_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(req): Json<StepRequest>,
) -> ApiResult<StepOutcome> {
    state.service.release(id, req).await.map(Json)
}

async fn refund_handler(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(req): Json<StepRequest>,
) -> ApiResult<StepOutcome> {
    state.service.refund(id, req).await.map(Json)
}

/// `POST /transactions`: relay a signed envelope as-is.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<EnvelopeRequest>,
) -> ApiResult<SubmittedResponse> {
    let hash = state.service.submit_transaction(&req.envelope).await?;
    Ok(Json(SubmittedResponse { hash }))
}

/// `GET /transactions/:hash`: an applied transaction, 404 if the ledger
/// never applied it.
async fn transaction_by_hash_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.service.transaction(&hash).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => {
            let err = ErrorResponse {
                error: format!("Transaction not found: {}", hash),
                code: None,
                class: None,
            };
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
        Err(e) => ServiceError::from(e).into_response(),
    }
}

/// `GET /accounts/:address`: sequence and balances.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<remit_protocol::ledger::AccountInfo> {
    let address = Address::parse(&address)?;
    Ok(Json(state.service.account(&address).await?))
}

/// `POST /accounts/:address/fund`: devnet faucet.
async fn faucet_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<FaucetRequest>,
) -> ApiResult<FaucetResponse> {
    let address = Address::parse(&address)?;
    let resolver = AssetResolver::from(state.service.network());
    let asset = resolver.resolve(req.asset_code.as_deref().unwrap_or(""), req.issuer.as_deref())?;
    let amount = match req.amount.as_deref() {
        Some(a) => Amount::parse(a)?.stroops(),
        None => DEVNET_FAUCET_AMOUNT,
    };
    let balance = state.devnet.fund(address, asset.clone(), amount)?;
    Ok(Json(FaucetResponse {
        address,
        asset: asset.to_string(),
        balance,
    }))
}

/// `GET /contract`: lifecycle state of the deployed contract.
async fn contract_handler(State(state): State<AppState>) -> ApiResult<ContractInfo> {
    state.devnet.contract_info().map(Json).map_err(contract_error)
}

/// `POST /contract/code`: upload a new build so it can be upgraded to.
async fn upload_code_handler(
    State(state): State<AppState>,
    Json(req): Json<UploadCodeRequest>,
) -> ApiResult<UploadCodeResponse> {
    if req.label.trim().is_empty() {
        return Err(RemitError::Validation("code label is empty".into()).into());
    }
    let code_hash = state.devnet.upload_code(req.label.trim());
    Ok(Json(UploadCodeResponse { code_hash }))
}

async fn pause_handler(State(state): State<AppState>) -> ApiResult<LifecycleResponse> {
    Ok(Json(state.service.pause().await?.into()))
}

async fn unpause_handler(State(state): State<AppState>) -> ApiResult<LifecycleResponse> {
    Ok(Json(state.service.unpause().await?.into()))
}

async fn upgrade_handler(
    State(state): State<AppState>,
    Json(req): Json<UpgradeRequest>,
) -> ApiResult<LifecycleResponse> {
    Ok(Json(state.service.upgrade(req.code_hash).await?.into()))
}

async fn migrate_handler(State(state): State<AppState>) -> ApiResult<LifecycleResponse> {
    Ok(Json(state.service.migrate().await?.into()))
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Clients receive JSON-encoded [`NodeEvent`] messages. The connection is
/// push-only; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events until the client disconnects or the channel
/// closes.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use remit_contracts::EscrowStatus;
    use remit_protocol::asset::Asset;
    use remit_protocol::config::STROOPS_PER_UNIT;
    use remit_protocol::ledger::AccountInfo;
    use remit_protocol::transaction::Signer;
    use tower::ServiceExt;

    use crate::mirror::{MirrorRecord, MirrorStatus};
    use crate::testing::{fixture, Fixture};

    fn router(fx: &Fixture) -> Router {
        create_router(AppState {
            version: "0.1.0-test".into(),
            service: fx.service.clone(),
            devnet: fx.devnet.clone(),
            event_tx: fx.events.clone(),
        })
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    fn remittance_body(fx: &Fixture, amount: &str, secret: Option<String>) -> serde_json::Value {
        serde_json::json!({
            "sender": fx.alice.address().to_string(),
            "recipient": fx.bob.address().to_string(),
            "asset_code": "XLM",
            "amount": amount,
            "secret_key": secret,
        })
    }

    // -- health and status ---------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let fx = fixture().await;
        let (status, body) = get(&router(&fx), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_the_initialized_contract() {
        let fx = fixture().await;
        let (status, body) = get(&router(&fx), "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.contract_version, Some(1));
        assert_eq!(resp.paused, Some(false));
        assert_eq!(resp.contract, fx.devnet.contract_address());
        assert!(resp.ledger > 1);
        assert_eq!(resp.remittances, 0);
    }

    // -- remittance lifecycle ------------------------------------------------

    #[tokio::test]
    async fn signed_remittance_runs_to_release() {
        let fx = fixture().await;
        let router = router(&fx);
        let bob_before = fx.devnet.ledger.balance(&fx.bob.address(), &Asset::Native);

        let (status, body) = post_json(
            &router,
            "/remittances",
            remittance_body(&fx, "25", Some(fx.alice.secret_hex())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.status, MirrorStatus::Confirmed);
        assert_eq!(created.escrow_status, Some(EscrowStatus::Created));
        assert!(created.envelope.is_none());
        let id = created.mirror_id;

        let (status, body) = post_json(
            &router,
            &format!("/remittances/{}/fund", id),
            serde_json::json!({ "secret_key": fx.alice.secret_hex() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let funded: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(funded.escrow_status, Some(EscrowStatus::Funded));

        let (status, body) =
            post_json(&router, &format!("/remittances/{}/release", id), serde_json::json!({}))
                .await;
        assert_eq!(status, StatusCode::OK);
        let released: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(released.escrow_status, Some(EscrowStatus::Released));

        let (_, body) = get(&router, &format!("/remittances/{}", id)).await;
        let record: MirrorRecord = serde_json::from_slice(&body).unwrap();
        assert_eq!(record.status, MirrorStatus::Confirmed);
        assert_eq!(record.escrow_status, Some(EscrowStatus::Released));
        assert_eq!(record.last_tx_hash, Some(released.tx_hash));

        let (_, body) = get(&router, &format!("/accounts/{}", fx.bob.address())).await;
        let bob: AccountInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(bob.balance(&Asset::Native), bob_before + 25 * STROOPS_PER_UNIT);
    }

    #[tokio::test]
    async fn externally_signed_step_is_submitted() {
        let fx = fixture().await;
        let router = router(&fx);

        let (status, body) =
            post_json(&router, "/remittances", remittance_body(&fx, "3.5", None)).await;
        assert_eq!(status, StatusCode::CREATED);
        let pending: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(pending.status, MirrorStatus::Pending);
        let unsigned = pending.envelope.unwrap();

        let signer = Signer::new(fx.service.network().passphrase.clone());
        let signed = signer.sign_encoded(&unsigned, &fx.alice.secret_hex()).unwrap();
        let (status, body) = post_json(
            &router,
            &format!("/remittances/{}/submit", pending.mirror_id),
            serde_json::json!({ "envelope": signed }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let confirmed: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(confirmed.status, MirrorStatus::Confirmed);
        assert_eq!(confirmed.tx_hash, pending.tx_hash);
        assert_eq!(confirmed.escrow_id, Some(1));

        let (status, _) = get(&router, &format!("/transactions/{}", pending.tx_hash)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn foreign_envelope_is_a_conflict() {
        let fx = fixture().await;
        let router = router(&fx);
        let (_, body) = post_json(&router, "/remittances", remittance_body(&fx, "1", None)).await;
        let first: StepOutcome = serde_json::from_slice(&body).unwrap();
        let (_, body) = post_json(&router, "/remittances", remittance_body(&fx, "2", None)).await;
        let second: StepOutcome = serde_json::from_slice(&body).unwrap();

        let signer = Signer::new(fx.service.network().passphrase.clone());
        let other = signer
            .sign_encoded(&second.envelope.unwrap(), &fx.alice.secret_hex())
            .unwrap();
        let (status, _) = post_json(
            &router,
            &format!("/remittances/{}/submit", first.mirror_id),
            serde_json::json!({ "envelope": other }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stale_external_envelope_is_rebuilt() {
        let fx = fixture().await;
        let router = router(&fx);

        let (_, body) = post_json(&router, "/remittances", remittance_body(&fx, "1", None)).await;
        let pending: StepOutcome = serde_json::from_slice(&body).unwrap();

        // Another remittance from the same sender takes the sequence first.
        let (status, _) = post_json(
            &router,
            "/remittances",
            remittance_body(&fx, "2", Some(fx.alice.secret_hex())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let signer = Signer::new(fx.service.network().passphrase.clone());
        let stale = signer
            .sign_encoded(pending.envelope.as_ref().unwrap(), &fx.alice.secret_hex())
            .unwrap();
        let submit = format!("/remittances/{}/submit", pending.mirror_id);
        let (status, body) =
            post_json(&router, &submit, serde_json::json!({ "envelope": stale })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.class, Some(ErrorClass::Retryable));
        assert_eq!(err.code.as_deref(), Some("tx_bad_seq"));

        let (status, body) = post_json(
            &router,
            &format!("/remittances/{}/rebuild", pending.mirror_id),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let rebuilt: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_ne!(rebuilt.tx_hash, pending.tx_hash);

        let fresh = signer
            .sign_encoded(&rebuilt.envelope.unwrap(), &fx.alice.secret_hex())
            .unwrap();
        let (status, body) =
            post_json(&router, &submit, serde_json::json!({ "envelope": fresh })).await;
        assert_eq!(status, StatusCode::OK);
        let confirmed: StepOutcome = serde_json::from_slice(&body).unwrap();
        assert_eq!(confirmed.escrow_id, Some(2));
    }

    #[tokio::test]
    async fn funding_before_creation_is_confirmed_is_a_conflict() {
        let fx = fixture().await;
        let router = router(&fx);
        let (_, body) = post_json(&router, "/remittances", remittance_body(&fx, "1", None)).await;
        let pending: StepOutcome = serde_json::from_slice(&body).unwrap();

        let (status, _) = post_json(
            &router,
            &format!("/remittances/{}/fund", pending.mirror_id),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // -- error mapping -------------------------------------------------------

    #[tokio::test]
    async fn bad_descriptors_are_validation_errors() {
        let fx = fixture().await;
        let router = router(&fx);

        for amount in ["0", "-1", "1.12345678", "abc"] {
            let (status, body) =
                post_json(&router, "/remittances", remittance_body(&fx, amount, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "amount {amount}");
            let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(err.class, Some(ErrorClass::Validation));
        }

        let mut body = remittance_body(&fx, "1", None);
        body["asset_code"] = "USDC".into();
        let (status, _) = post_json(&router, "/remittances", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        // Nothing was recorded for any of them.
        assert!(fx.service.mirror().is_empty());
    }

    #[tokio::test]
    async fn wrong_secret_is_forbidden() {
        let fx = fixture().await;
        let (status, body) = post_json(
            &router(&fx),
            "/remittances",
            remittance_body(&fx, "1", Some(fx.bob.secret_hex())),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.class, Some(ErrorClass::Auth));
    }

    #[tokio::test]
    async fn paused_contract_rejects_with_reason_code() {
        let fx = fixture().await;
        let router = router(&fx);

        let (status, body) = post_json(&router, "/contract/pause", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let paused: LifecycleResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(paused.events[0].topic, "paused");
        assert_eq!(paused.events[0].data, serde_json::json!(true));

        let (status, body) = post_json(
            &router,
            "/remittances",
            remittance_body(&fx, "1", Some(fx.alice.secret_hex())),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code.as_deref(), Some("contract_paused"));
        assert_eq!(err.class, Some(ErrorClass::Fatal));

        let (status, _) = post_json(&router, "/contract/pause", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = post_json(&router, "/contract/unpause", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_resources_are_404() {
        let fx = fixture().await;
        let router = router(&fx);

        let (status, _) = get(&router, &format!("/remittances/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(&router, &format!("/transactions/{}", "ab".repeat(32))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("not found"));

        let stranger = remit_protocol::crypto::keys::Keypair::generate().address();
        let (status, _) = get(&router, &format!("/accounts/{}", stranger)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&router, "/accounts/not-an-address").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn faucet_opens_and_credits_accounts() {
        let fx = fixture().await;
        let router = router(&fx);
        let newcomer = remit_protocol::crypto::keys::Keypair::generate().address();

        let (status, body) = post_json(
            &router,
            &format!("/accounts/{}/fund", newcomer),
            serde_json::json!({ "amount": "12.5" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: FaucetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.balance, 125_000_000);

        let (status, body) = get(&router, &format!("/accounts/{}", newcomer)).await;
        assert_eq!(status, StatusCode::OK);
        let account: AccountInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(account.sequence, 0);
        assert_eq!(account.balance(&Asset::Native), 125_000_000);
    }

    // -- contract lifecycle --------------------------------------------------

    #[tokio::test]
    async fn upgrade_then_migrate_over_http() {
        let fx = fixture().await;
        let router = router(&fx);

        let unknown = serde_json::json!({ "code_hash": "00".repeat(32) });
        let (status, body) = post_json(&router, "/contract/upgrade", unknown).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code.as_deref(), Some("upgrade_failed"));

        let (status, body) = post_json(
            &router,
            "/contract/code",
            serde_json::json!({ "label": "remit-escrow-v2" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let uploaded: UploadCodeResponse = serde_json::from_slice(&body).unwrap();

        let (status, body) = post_json(
            &router,
            "/contract/upgrade",
            serde_json::json!({ "code_hash": uploaded.code_hash }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let upgraded: LifecycleResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(upgraded.events.last().unwrap().topic, "upgraded");

        let (_, body) = get(&router, "/contract").await;
        let info: ContractInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.version, 2);
        assert!(info.paused);
        assert_eq!(info.pending_code_hash, Some(uploaded.code_hash));

        let (status, body) = post_json(&router, "/contract/migrate", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let migrated: LifecycleResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(migrated.events.last().unwrap().topic, "migrated");

        let (_, body) = get(&router, "/contract").await;
        let info: ContractInfo = serde_json::from_slice(&body).unwrap();
        assert!(!info.paused);
        assert_eq!(info.active_code_hash, uploaded.code_hash);
        assert_eq!(info.admin, fx.service.admin_address());
    }

    #[tokio::test]
    async fn relayed_transaction_is_picked_up_by_the_poll() {
        let fx = fixture().await;
        let router = router(&fx);
        let (_, body) = post_json(&router, "/remittances", remittance_body(&fx, "4", None)).await;
        let pending: StepOutcome = serde_json::from_slice(&body).unwrap();

        let signer = Signer::new(fx.service.network().passphrase.clone());
        let signed = signer
            .sign_encoded(&pending.envelope.unwrap(), &fx.alice.secret_hex())
            .unwrap();
        let (status, body) =
            post_json(&router, "/transactions", serde_json::json!({ "envelope": signed })).await;
        assert_eq!(status, StatusCode::OK);
        let relayed: SubmittedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(relayed.hash, pending.tx_hash);

        let record = fx.service.remittance(&pending.mirror_id).unwrap();
        assert_eq!(record.status, MirrorStatus::Pending);

        assert_eq!(fx.service.poll_confirmations().await, 1);
        let record = fx.service.remittance(&pending.mirror_id).unwrap();
        assert_eq!(record.status, MirrorStatus::Confirmed);
        assert_eq!(record.escrow_id, Some(1));
        assert_eq!(fx.service.poll_confirmations().await, 0);
    }
}
