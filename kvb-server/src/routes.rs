//! Request handlers.
//!
//! | Route                 | Body                       | Mode        |
//! |-----------------------|----------------------------|-------------|
//! | `POST /`              | `["CMD", args..]`          | single      |
//! | `POST /pipeline`      | `[["CMD", args..], ..]`    | pipeline    |
//! | `POST /multi-exec`    | `[["CMD", args..], ..]`    | transaction |
//! | `GET|POST /cmd/args..`| optional raw last argument | single      |

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{debug, error};

use kvb_client::SessionPool;
use kvb_common::{BridgeError, CommandBatch, CommandResult, ExecMode};

use crate::error::{ApiError, ApiResult};
use crate::translator::{self, ResultEncoding, ENCODING_HEADER};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pool: SessionPool,
}

fn encoding(headers: &HeaderMap) -> ResultEncoding {
    ResultEncoding::from_header(headers.get(ENCODING_HEADER).and_then(|v| v.to_str().ok()))
}

/// POST / with a single JSON command.
pub async fn single_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let batch = match translator::parse_single(&body) {
        Ok(batch) => batch,
        Err(err) => return ApiError::from(err).into_response(),
    };
    respond_single(&state.pool, batch, encoding(&headers)).await
}

/// GET|POST /cmd/arg/... with the command in the path.
///
/// The raw path is used so encoded slashes stay inside their argument.
pub async fn path_command(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let batch = match translator::parse_path(uri.path(), body) {
        Ok(batch) => batch,
        Err(err) => return ApiError::from(err).into_response(),
    };
    respond_single(&state.pool, batch, encoding(&headers)).await
}

/// POST /pipeline
pub async fn pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond_batch(&state.pool, &body, ExecMode::Pipeline, encoding(&headers)).await
}

/// POST /multi-exec
pub async fn multi_exec(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond_batch(&state.pool, &body, ExecMode::Transaction, encoding(&headers)).await
}

async fn respond_single(
    pool: &SessionPool,
    batch: CommandBatch,
    encoding: ResultEncoding,
) -> Response {
    let mut results = match run_batch(pool, batch).await {
        Ok(results) => results,
        Err(err) => return err.into_response(),
    };
    match results.pop() {
        Some(CommandResult::Error(message)) => {
            ApiError::from(BridgeError::Command(message)).into_response()
        }
        Some(result) => Json(translator::encode_result(&result, encoding)).into_response(),
        None => ApiError::Internal("missing result".to_string()).into_response(),
    }
}

async fn respond_batch(
    pool: &SessionPool,
    body: &[u8],
    mode: ExecMode,
    encoding: ResultEncoding,
) -> Response {
    let batch = match translator::parse_batch(body, mode) {
        Ok(batch) => batch,
        Err(err) => return ApiError::from(err).into_response(),
    };
    match run_batch(pool, batch).await {
        Ok(results) => {
            let body = translator::encode_results(&results, encoding);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Executes `batch` on a pooled session.
///
/// Execution runs on its own task, so a client that disconnects mid-request
/// does not cancel store calls halfway through a batch.
pub async fn run_batch(pool: &SessionPool, batch: CommandBatch) -> ApiResult<Vec<CommandResult>> {
    if let Some(results) = translator::local_results(&batch) {
        return Ok(results);
    }

    let pool = pool.clone();
    let task = tokio::spawn(async move {
        let mut session = pool.acquire().await?;
        let results = translator::execute(&mut session, &batch).await;
        session.release();
        results
    });

    match task.await {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(err)) => {
            debug!(error = %err, "batch failed");
            Err(ApiError::from(err))
        }
        Err(err) => {
            error!(error = %err, "batch task failed");
            Err(ApiError::Internal("internal error".to_string()))
        }
    }
}
