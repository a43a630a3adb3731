//! HTTP transport for a ForgeLedger node.
//!
//! Every route is a thin mapping onto a [`Node`] operation. Rejections come
//! back as `400 { "message", "reason" }`, unknown contracts as `404`.

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::blockchain::{AdmitOutcome, Block};
use crate::contract::{ContractError, Value};
use crate::error::ChainError;
use crate::miner::now_millis;
use crate::node::{ChainSummary, ContractInfo, Node, NodeStats, SubmitReceipt};
use crate::transaction::Transaction;

const DEFAULT_FAUCET_AMOUNT: u64 = 1_000;

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub reason: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, reason) = match self {
            ApiError::Chain(ChainError::Contract(ContractError::ContractNotFound(id))) => (
                StatusCode::NOT_FOUND,
                format!("Contract not found: {}", id),
                "contract_not_found",
            ),
            ApiError::Chain(e) => (StatusCode::BAD_REQUEST, e.to_string(), e.reason_code()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg, "invalid_input"),
        };

        (
            status,
            Json(ErrorResponse {
                message,
                reason: reason.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TransactionAccepted {
    pub message: String,
    #[serde(flatten)]
    pub receipt: SubmitReceipt,
}

#[derive(Debug, Serialize)]
pub struct BlockAccepted {
    pub message: String,
    pub height: u64,
    pub fork_adopted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub code: Option<String>,
    pub from: Option<String>,
    pub signature: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub contract_id: Option<String>,
    pub from: Option<String>,
    pub function: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    pub signature: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub address: Option<String>,
    pub initial_balance: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersRequest {
    pub nodes: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

/// Collect the names of absent required fields, in declaration order.
fn require_fields(fields: &[(&str, bool)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Missing fields: {}",
            missing.join(", ")
        )))
    }
}

// ============================================================================
// API Server
// ============================================================================

/// Detailed request logging middleware. Logs method, path, status and duration.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

pub fn build_api_router(node: Node) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    Router::new()
        // Ledger
        .route("/transactions/new", post(new_transaction))
        .route("/blocks/new", post(new_block))
        .route("/chain", get(get_chain))
        .route("/balance/:address", get(get_balance))
        // Contracts
        .route("/contracts/deploy", post(deploy_contract))
        .route("/contracts/call", post(call_contract))
        .route("/contracts/:contract_id", get(get_contract))
        // Node
        .route("/accounts/create", post(create_account))
        .route("/peers", post(register_peers))
        .route("/stats", get(get_stats))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` resolves.
pub async fn run_api_server<F>(node: Node, port: u16, shutdown: F) -> Result<(), ChainError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChainError::NetworkError(format!("API port {} unavailable: {}", port, e)))?;

    tracing::info!(%addr, "API server listening");
    axum::serve(listener, build_api_router(node))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ChainError::NetworkError(format!("API server failed: {}", e)))
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Node>) -> impl IntoResponse {
    let summary = node.chain_summary().await;
    Json(serde_json::json!({
        "status": "healthy",
        "node_id": node.config().node.node_id,
        "height": summary.max_height,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn new_transaction(
    State(node): State<Node>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionAccepted>), ApiError> {
    let Json(body) = payload?;
    let tx = Transaction::from_json(body)?;
    let receipt = node.submit_transaction(tx).await?;
    Ok((
        StatusCode::CREATED,
        Json(TransactionAccepted {
            message: "Transaction will be added to the next block".to_string(),
            receipt,
        }),
    ))
}

async fn new_block(
    State(node): State<Node>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<BlockAccepted>), ApiError> {
    let Json(body) = payload?;
    let block = Block::from_json(body)?;
    let outcome = node.submit_block(block).await?;
    Ok((
        StatusCode::CREATED,
        Json(BlockAccepted {
            message: "Block added to the chain".to_string(),
            height: outcome.height(),
            fork_adopted: matches!(outcome, AdmitOutcome::ForkAdopted { .. }),
        }),
    ))
}

async fn get_chain(State(node): State<Node>) -> Json<ChainSummary> {
    let summary = node.chain_summary().await;
    tracing::debug!(
        blocks = summary.length,
        min_height = summary.min_height,
        max_height = summary.max_height,
        transactions = summary.total_transactions,
        "chain info requested"
    );
    Json(summary)
}

async fn get_balance(
    State(node): State<Node>,
    Path(address): Path<String>,
) -> Json<BalanceResponse> {
    let balance = node.balance(&address).await;
    Json(BalanceResponse { address, balance })
}

async fn get_contract(
    State(node): State<Node>,
    Path(contract_id): Path<String>,
) -> Result<Json<ContractInfo>, ApiError> {
    Ok(Json(node.contract_info(&contract_id).await?))
}

async fn deploy_contract(
    State(node): State<Node>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionAccepted>), ApiError> {
    let Json(request) = payload?;
    require_fields(&[
        ("code", request.code.is_some()),
        ("from", request.from.is_some()),
        ("signature", request.signature.is_some()),
    ])?;
    let (Some(code), Some(from), Some(signature)) = (request.code, request.from, request.signature)
    else {
        return Err(ApiError::InvalidInput("Missing fields".to_string()));
    };

    let mut tx = Transaction::deploy(&from, &code, now_millis());
    tx.signature = signature;
    tx.public_key = request.public_key;
    let receipt = node.submit_transaction(tx).await?;
    Ok((
        StatusCode::CREATED,
        Json(TransactionAccepted {
            message: "Contract deployment will be added to the next block".to_string(),
            receipt,
        }),
    ))
}

async fn call_contract(
    State(node): State<Node>,
    payload: Result<Json<CallRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionAccepted>), ApiError> {
    let Json(request) = payload?;
    require_fields(&[
        ("contract_id", request.contract_id.is_some()),
        ("from", request.from.is_some()),
        ("function", request.function.is_some()),
        ("signature", request.signature.is_some()),
    ])?;
    let (Some(contract_id), Some(from), Some(function), Some(signature)) = (
        request.contract_id,
        request.from,
        request.function,
        request.signature,
    ) else {
        return Err(ApiError::InvalidInput("Missing fields".to_string()));
    };

    let mut tx = Transaction::call(&from, &contract_id, &function, request.args, now_millis());
    tx.signature = signature;
    tx.public_key = request.public_key;
    let receipt = node.submit_transaction(tx).await?;
    Ok((
        StatusCode::CREATED,
        Json(TransactionAccepted {
            message: "Contract call will be added to the next block".to_string(),
            receipt,
        }),
    ))
}

async fn create_account(
    State(node): State<Node>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(request) = payload?;
    let Some(address) = request.address else {
        return Err(ApiError::InvalidInput("Missing address field".to_string()));
    };
    let amount = request.initial_balance.unwrap_or(DEFAULT_FAUCET_AMOUNT);
    let balance = node.credit_account(&address, amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "address": address,
            "balance": balance,
            "message": "Account created/updated successfully",
        })),
    ))
}

async fn register_peers(
    State(node): State<Node>,
    payload: Result<Json<PeersRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PeersResponse>), ApiError> {
    let Json(request) = payload?;
    let Some(nodes) = request.nodes else {
        return Err(ApiError::InvalidInput(
            "Error: Please provide a valid list of nodes".to_string(),
        ));
    };
    node.register_peers(nodes);
    Ok((
        StatusCode::CREATED,
        Json(PeersResponse {
            message: "New nodes have been added".to_string(),
            total_nodes: node.peers().snapshot(),
        }),
    ))
}

async fn get_stats(State(node): State<Node>) -> Json<NodeStats> {
    Json(node.stats().await)
}
