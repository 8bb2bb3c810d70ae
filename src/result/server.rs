//! HTTP surface for result retrieval

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::{ProcessState, ResultApi, ResultError};
use crate::error::{describe_error_code, CubeflowError};

/// Build the result router
pub fn router(api: Arc<ResultApi>) -> Router {
    Router::new()
        .route("/result/{pid}", get(get_result))
        .route("/result/{pid}/status", get(get_status))
        .route("/result/{pid}/stream", get(stream_result))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

/// Serve until `token` is cancelled
pub async fn serve(api: Arc<ResultApi>, port: u16, token: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Result server listening on {}", addr);

    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    info!("Result server stopped");
    Ok(())
}

/// Error response carrying the unified error's status hint
struct ApiError(CubeflowError);

impl From<ResultError> for ApiError {
    fn from(err: ResultError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            let code = self.0.code();
            warn!(pid = ?self.0.pid(), code, "{}: {}", describe_error_code(code), self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

async fn get_status(
    State(api): State<Arc<ResultApi>>,
    Path(pid): Path<String>,
) -> Result<Response, ApiError> {
    let status = api.status(&pid).await?;
    let code = if status.is_finished() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((code, Json(status)).into_response())
}

/// 404 without a header, 202 while parts are outstanding, the result otherwise
async fn get_result(
    State(api): State<Arc<ResultApi>>,
    Path(pid): Path<String>,
) -> Result<Response, ApiError> {
    let status = api.status(&pid).await?;
    match status.status {
        ProcessState::Pending => return Err(ResultError::NotFound(pid).into()),
        ProcessState::Working => return Ok((StatusCode::ACCEPTED, Json(status)).into_response()),
        ProcessState::Finished => {}
    }

    let bytes = api.get(&pid).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

async fn stream_result(
    State(api): State<Arc<ResultApi>>,
    Path(pid): Path<String>,
) -> Result<Response, ApiError> {
    let chunks = api.stream(&pid).await?;
    let body = Body::from_stream(ReceiverStream::new(chunks));
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response())
}
