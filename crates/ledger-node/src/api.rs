use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, ChainInfo, ChainStore, Ledger, LedgerError, SearchHit};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

pub type SharedLedger = Arc<Ledger<dyn ChainStore>>;

#[derive(Clone)]
struct AppState {
    ledger: SharedLedger,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Deserialize)]
struct TxIn {
    data: String,
}

#[derive(Serialize)]
struct TxAccepted {
    message: &'static str,
    pending_transactions: Vec<String>,
}

#[derive(Deserialize, Default)]
struct MineIn {
    difficulty: Option<u32>,
    timeout_ms: Option<u64>,
}

/// The committed block, plus whether the durable store caught up.
#[derive(Serialize)]
struct Mined {
    #[serde(flatten)]
    block: Block,
    persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    persist_error: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

enum ApiError {
    Ledger(LedgerError),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(err) => {
                let status = match &err {
                    LedgerError::InvalidInput(_) | LedgerError::NothingToMine => {
                        StatusCode::BAD_REQUEST
                    }
                    LedgerError::MiningTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    LedgerError::Persistence(_) | LedgerError::CorruptChain(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        LedgerError::InvalidInput(format!("malformed request body: {e}")).into()
    })
}

pub fn router(ledger: SharedLedger) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/info", get(info))
        .route("/tx", post(submit_tx))
        .route("/mine", post(mine))
        .route("/blocks", get(list_blocks))
        .route("/pending", get(list_pending))
        .route("/search", get(search))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { ledger })
}

async fn root(State(state): State<AppState>) -> String {
    format!(
        "{} API\nAvailable endpoints:\n/info\n/tx\n/mine\n/blocks\n/pending\n/search?q=...\n",
        state.ledger.config().name
    )
}

async fn info(State(state): State<AppState>) -> Json<ChainInfo> {
    Json(state.ledger.info())
}

async fn submit_tx(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<TxAccepted>), ApiError> {
    let tx: TxIn = parse_json(&body)?;
    let pending = state.ledger.submit(tx.data)?;
    Ok((
        StatusCode::CREATED,
        Json(TxAccepted {
            message: "transaction added",
            pending_transactions: pending,
        }),
    ))
}

async fn mine(State(state): State<AppState>, body: Bytes) -> Result<Json<Mined>, ApiError> {
    let req: MineIn = if body.iter().all(u8::is_ascii_whitespace) {
        MineIn::default()
    } else {
        parse_json(&body)?
    };
    let timeout = req
        .timeout_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    // The nonce search is CPU-bound; keep it off the async workers.
    let ledger = state.ledger.clone();
    let commit = tokio::task::spawn_blocking(move || ledger.mine_and_commit(req.difficulty, timeout))
        .await
        .map_err(|e| {
            error!(error = %e, "mining task failed");
            ApiError::Internal(format!("mining task failed: {e}"))
        })??;

    Ok(Json(Mined {
        persisted: commit.is_durable(),
        persist_error: commit.persist_error,
        block: commit.block,
    }))
}

async fn list_blocks(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.ledger.blocks())
}

async fn list_pending(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.ledger.pending())
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let hits = state.ledger.search(params.q.as_deref().unwrap_or_default())?;
    Ok(Json(hits))
}
