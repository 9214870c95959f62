//! REST API for a railchain node
//!
//! Maps the node's operations onto the HTTP routes peers and clients use:
//! chain download, mining, transaction submission, balances, peer
//! registration, sync and the decoded transaction listing.

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{self, header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::error::ChainError;
use crate::node::{Node, NodeState};
use crate::transaction::{Transaction, TransactionView};

pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Chain(e) => {
                let status = match e {
                    ChainError::MalformedRequest(_) | ChainError::InsufficientFunds { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    ChainError::MiningAborted(_) => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct MineResponse {
    message: &'static str,
    index: u64,
    hash_of_previous_block: String,
    nonce: u64,
    transactions: Vec<Transaction>,
}

/// Request logging middleware: method, path, status, duration and node state.
async fn logging_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let node_state = *node.state.read().await;
    info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        node_state = ?node_state,
        "api.request"
    );

    response
}

pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(vec![header::CONTENT_TYPE]);

    Router::new()
        .route("/blockchain", get(get_blockchain))
        .route("/mine", get(mine))
        .route("/transactions/new", post(new_transaction))
        .route("/transactions/get_transactions", get(get_transactions))
        .route("/balances", get(get_balances))
        .route("/nodes/add_nodes", post(add_nodes))
        .route("/nodes/get_nodes", get(get_nodes))
        .route("/nodes/sync", get(sync))
        .route("/getPublicKey", get(get_public_key))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .with_state(node)
        .layer(cors)
}

/// Serves the API on `0.0.0.0:<port>` until `shutdown` resolves.
pub async fn run_api_server<F>(node: Arc<Node>, port: u16, shutdown: F) -> Result<(), ChainError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, node = %node.identifier(), "API server listening");

    axum::serve(listener, build_api_router(node))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn get_blockchain(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.chain().await)
}

async fn mine(State(node): State<Arc<Node>>, headers: HeaderMap) -> Result<Json<MineResponse>, ApiError> {
    let block = node.mine().await?;

    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    if let Some(own_url) = node.advertised_url(host) {
        let reached = node.broadcast(&own_url).await;
        info!(index = block.index, reached, "broadcast new block");
    }

    Ok(Json(MineResponse {
        message: "New Block Mined",
        index: block.index,
        hash_of_previous_block: block.hash_of_previous_block,
        nonce: block.nonce,
        transactions: block.transactions,
    }))
}

/// `amount` arrives as a JSON number or a decimal string.
fn amount_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

async fn new_transaction(
    State(node): State<Arc<Node>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let sender = body.get("sender").and_then(Value::as_str);
    let recipient = body.get("recipient").and_then(Value::as_str);
    let amount = body.get("amount").and_then(amount_text);

    let (Some(sender), Some(recipient), Some(amount)) = (sender, recipient, amount) else {
        return Err(ApiError::InvalidInput("Missing fields".to_string()));
    };

    let index = node.submit_transaction(sender, recipient, &amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": format!("Transaction will be added to Block {}", index) })),
    ))
}

async fn get_transactions(State(node): State<Arc<Node>>) -> Json<Vec<TransactionView>> {
    Json(node.list_transactions().await)
}

async fn get_balances(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(json!({ "balances": node.balances().await }))
}

async fn add_nodes(
    State(node): State<Arc<Node>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let Some(nodes) = body.get("nodes").and_then(Value::as_array) else {
        return Err(ApiError::InvalidInput("Error: Missing node(s) info".to_string()));
    };
    let addresses: Vec<String> = nodes
        .iter()
        .filter_map(|n| n.as_str().map(str::to_string))
        .collect();

    let peers = node.register_nodes(&addresses).await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "New nodes added", "nodes": peers })),
    ))
}

async fn get_nodes(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let peers = node.peers.peers();
    let message = if peers.is_empty() { "No Nodes" } else { "Current nodes" };
    Json(json!({ "message": message, "nodes": peers }))
}

async fn sync(State(node): State<Arc<Node>>) -> Result<impl IntoResponse, ApiError> {
    let replaced = node.sync_with_peers().await?;
    let message = if replaced {
        "The blockchain has been updated to the latest"
    } else {
        "Our blockchain is the latest"
    };
    let chain = node.chain().await.chain;
    Ok(Json(json!({ "message": message, "blockchain": chain, "chain": chain })))
}

async fn get_public_key(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(json!({ "public_key": node.public_key_hex() }))
}

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let state = *node.state.read().await;
    let height = node.ledger.read().await.len();
    let (status, label) = match state {
        NodeState::Ready => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    (
        status,
        Json(json!({
            "status": label,
            "node_state": format!("{:?}", state),
            "height": height,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
