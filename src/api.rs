use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::crypto;
use crate::errors::{ChainError, ChainResult};
use crate::tracker::TrackerHandle;
use crate::types::{Block, Invocation, Transaction, TransactionAuth};

#[derive(Clone)]
struct AppState {
    tracker: TrackerHandle,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ReadResponse {
    result: String,
}

#[derive(Serialize)]
struct PrepareResponse {
    payload: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    block_number: u64,
}

#[derive(Deserialize)]
struct RunBody {
    signature: String,
    public_key: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

pub async fn serve(tracker: TrackerHandle, addr: SocketAddr) -> ChainResult<()> {
    let state = AppState { tracker };
    let router = Router::new()
        .route("/health", get(health))
        .route("/block", get(current_block))
        .route("/read/:function", get(read_no_args))
        .route("/read/:function/*args", get(read_with_args))
        .route("/read/block/:block_hash/:function", get(read_at_no_args))
        .route("/read/block/:block_hash/:function/*args", get(read_at_with_args))
        .route("/prepare/:function", get(prepare_no_args))
        .route("/prepare/:function/*args", get(prepare_with_args))
        .route("/run/:function", post(run_no_args))
        .route("/run/:function/*args", post(run_with_args))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(?addr, "API server listening");
    axum::serve(listener, router)
        .await
        .map_err(|err| ChainError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

fn split_args(args: &str) -> Vec<String> {
    args.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, HandlerError> {
    let block = state.tracker.get_block().await.map_err(to_http_error)?;
    Ok(Json(HealthResponse {
        status: "ok",
        block_number: block.block_number,
    }))
}

async fn current_block(State(state): State<AppState>) -> Result<Json<Block>, HandlerError> {
    state
        .tracker
        .get_block()
        .await
        .map(Json)
        .map_err(to_http_error)
}

async fn read_no_args(
    State(state): State<AppState>,
    Path(function): Path<String>,
) -> Result<Json<ReadResponse>, HandlerError> {
    read(state, function, Vec::new()).await
}

async fn read_with_args(
    State(state): State<AppState>,
    Path((function, args)): Path<(String, String)>,
) -> Result<Json<ReadResponse>, HandlerError> {
    read(state, function, split_args(&args)).await
}

async fn read(
    state: AppState,
    function: String,
    args: Vec<String>,
) -> Result<Json<ReadResponse>, HandlerError> {
    state
        .tracker
        .read(Invocation::new(function, args))
        .await
        .map(|result| Json(ReadResponse { result }))
        .map_err(to_http_error)
}

async fn read_at_no_args(
    State(state): State<AppState>,
    Path((block_hash, function)): Path<(String, String)>,
) -> Result<Json<ReadResponse>, HandlerError> {
    read_at(state, block_hash, function, Vec::new()).await
}

async fn read_at_with_args(
    State(state): State<AppState>,
    Path((block_hash, function, args)): Path<(String, String, String)>,
) -> Result<Json<ReadResponse>, HandlerError> {
    read_at(state, block_hash, function, split_args(&args)).await
}

async fn read_at(
    state: AppState,
    block_hash: String,
    function: String,
    args: Vec<String>,
) -> Result<Json<ReadResponse>, HandlerError> {
    state
        .tracker
        .read_at(block_hash, Invocation::new(function, args))
        .await
        .map(|result| Json(ReadResponse { result }))
        .map_err(to_http_error)
}

async fn prepare_no_args(
    Path(function): Path<String>,
) -> Result<Json<PrepareResponse>, HandlerError> {
    prepare(function, Vec::new())
}

async fn prepare_with_args(
    Path((function, args)): Path<(String, String)>,
) -> Result<Json<PrepareResponse>, HandlerError> {
    prepare(function, split_args(&args))
}

/// The deterministic signing payload for an invocation, handed to clients
/// that sign externally and submit through `/run`.
fn prepare(function: String, args: Vec<String>) -> Result<Json<PrepareResponse>, HandlerError> {
    let payload = Invocation::new(function, args).signing_bytes();
    Ok(Json(PrepareResponse {
        payload: base64::engine::general_purpose::STANDARD.encode(payload),
    }))
}

async fn run_no_args(
    State(state): State<AppState>,
    Path(function): Path<String>,
    Json(body): Json<RunBody>,
) -> Result<Json<SubmitResponse>, HandlerError> {
    run(state, function, Vec::new(), body).await
}

async fn run_with_args(
    State(state): State<AppState>,
    Path((function, args)): Path<(String, String)>,
    Json(body): Json<RunBody>,
) -> Result<Json<SubmitResponse>, HandlerError> {
    run(state, function, split_args(&args), body).await
}

async fn run(
    state: AppState,
    function: String,
    args: Vec<String>,
    body: RunBody,
) -> Result<Json<SubmitResponse>, HandlerError> {
    let transaction =
        signed_transaction(Invocation::new(function, args), &body).map_err(to_http_error)?;
    state
        .tracker
        .add_transaction(transaction)
        .await
        .map(|_| Json(SubmitResponse { status: "accepted" }))
        .map_err(to_http_error)
}

fn signed_transaction(invocation: Invocation, body: &RunBody) -> ChainResult<Transaction> {
    let engine = base64::engine::general_purpose::STANDARD;
    let signature = engine
        .decode(&body.signature)
        .map_err(|err| ChainError::Transaction(format!("malformed signature: {err}")))?;
    let der = engine
        .decode(&body.public_key)
        .map_err(|err| ChainError::Transaction(format!("malformed public key: {err}")))?;
    let public_key = crypto::decode_der_public_key(&der)?;
    // submissions must verify before they reach the open block
    crypto::verify(&invocation.signing_bytes(), &signature, &public_key)?;
    Ok(Transaction {
        invocation,
        auth: TransactionAuth::Signed {
            signature,
            public_key,
        },
    })
}

fn to_http_error(err: ChainError) -> HandlerError {
    let status = match err {
        ChainError::NotFound => StatusCode::NOT_FOUND,
        ChainError::InvalidSignature
        | ChainError::Transaction(_)
        | ChainError::Config(_)
        | ChainError::Crypto(_)
        | ChainError::Mode(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
