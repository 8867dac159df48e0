//! Axum router for the plain HTTP surface.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use lumen_core::codec;
use lumen_core::error::{LumenError, OriginError, QueryError};

use crate::query::{HealthReport, QueryService, ServerInfo};
use crate::rpc::{BlockIdJson, BlockJson, BlockQuery, BroadcastJson};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(LumenError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            LumenError::Query(QueryError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            LumenError::Query(QueryError::NotFound(_)) => StatusCode::NOT_FOUND,
            LumenError::Origin(OriginError::Rejected(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E: Into<LumenError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(query: QueryService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/latest-block", get(latest_block))
        .route("/block", get(block))
        .route("/block-range", get(block_range))
        .route("/transaction", post(transaction))
        .route("/server-info", get(server_info))
        .route("/health", get(health))
        .layer(cors)
        .with_state(query)
}

/// Bind `addr` and serve until `shutdown` resolves, letting in-flight
/// requests finish.
pub async fn serve_http(
    addr: SocketAddr,
    query: QueryService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), LumenError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LumenError::Config(format!("HTTP bind {addr}: {e}")))?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, router(query))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| LumenError::Config(format!("HTTP server error: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /latest-block`
async fn latest_block(State(q): State<QueryService>) -> ApiResult<BlockIdJson> {
    Ok(Json(q.latest_block().await?.into()))
}

/// `GET /block?hash=|sequence=`
async fn block(State(q): State<QueryService>, Query(params): Query<BlockQuery>) -> ApiResult<BlockJson> {
    let hash = params.parsed_hash()?;
    let block = q.get_block(hash, params.sequence).await?;
    Ok(Json(BlockJson::from(&block)))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<u64>,
    end: Option<u64>,
    #[serde(default)]
    binary: bool,
}

/// Either decoded blocks or hex-encoded serialized blocks.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RangeBody {
    Json(Vec<BlockJson>),
    Binary(Vec<String>),
}

/// `GET /block-range?start=&end=&binary=`
async fn block_range(
    State(q): State<QueryService>,
    Query(params): Query<RangeParams>,
) -> ApiResult<RangeBody> {
    let (Some(start), Some(end)) = (params.start, params.end) else {
        return Err(QueryError::InvalidArgument("start and end are required".into()).into());
    };
    let range = QueryService::validate_range(start, end)?;
    let blocks = q.collect_range(range).await?;

    let body = if params.binary {
        RangeBody::Binary(
            blocks
                .iter()
                .map(|b| codec::encode_block(b).map(hex::encode))
                .collect::<Result<_, _>>()?,
        )
    } else {
        RangeBody::Json(blocks.iter().map(BlockJson::from).collect())
    };
    Ok(Json(body))
}

/// `POST /transaction` with a hex body.
async fn transaction(State(q): State<QueryService>, body: String) -> ApiResult<BroadcastJson> {
    let raw = hex::decode(body.trim())
        .map_err(|_| QueryError::InvalidArgument("body must be a hex-encoded transaction".into()))?;
    Ok(Json(q.broadcast_transaction(&raw).await?.into()))
}

/// `GET /server-info`
async fn server_info(State(q): State<QueryService>) -> ApiResult<ServerInfo> {
    Ok(Json(q.server_info().await?))
}

/// `GET /health`
async fn health(State(q): State<QueryService>) -> ApiResult<HealthReport> {
    Ok(Json(q.health()?))
}
