//! Axum handlers for the HTTP transport
//!
//! `rpc_endpoint` parks each caller on a correlation slot until the
//! dispatcher answers, the wait expires, or the transport shuts down.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use super::{HttpState, QueuedRequest};
use crate::errors::HttpError;
use crate::logging::RequestKey;
use crate::mcp::rpc::{request_key, Request};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn rpc_endpoint(State(state): State<HttpState>, body: Bytes) -> Response {
    let request: Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return HttpError::bad_request(format!("invalid JSON-RPC envelope: {err}"))
                .into_response()
        }
    };

    let key = request.id.as_ref().map(request_key);
    let mut response = match key.as_deref() {
        Some(key) => call(&state, key, request).await,
        None => notify(&state, request).await,
    }
    .into_response();

    if let Some(key) = key {
        response.extensions_mut().insert(RequestKey(key));
    }
    response
}

async fn notify(state: &HttpState, request: Request) -> Result<Response, HttpError> {
    debug!(method = %request.method, "accepted notification");
    enqueue(
        state,
        QueuedRequest {
            ticket: None,
            request,
        },
    )
    .await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// The slot guard lives for the whole call, so an abandoned connection
/// frees its id as soon as axum drops this future.
async fn call(state: &HttpState, key: &str, request: Request) -> Result<Response, HttpError> {
    let mut slot = state
        .pending
        .register(key)
        .map_err(|err| HttpError::conflict(err.to_string()))?;

    enqueue(
        state,
        QueuedRequest {
            ticket: Some(slot.ticket()),
            request,
        },
    )
    .await?;

    match tokio::time::timeout(state.response_timeout, slot.response()).await {
        Ok(Ok(response)) => Ok((StatusCode::OK, Json(response)).into_response()),
        Ok(Err(_)) => Err(HttpError::service_unavailable(
            "shutting_down",
            "server is shutting down",
        )),
        Err(_) => {
            warn!(id = %key, "timed out waiting for dispatcher response");
            Err(HttpError::gateway_timeout())
        }
    }
}

async fn enqueue(state: &HttpState, queued: QueuedRequest) -> Result<(), HttpError> {
    state
        .queue
        .send_timeout(queued, state.enqueue_timeout)
        .await
        .map_err(|err| match err {
            SendTimeoutError::Timeout(_) => {
                warn!("request queue full");
                HttpError::service_unavailable("queue_full", "request queue is full")
            }
            SendTimeoutError::Closed(_) => {
                HttpError::service_unavailable("shutting_down", "server is shutting down")
            }
        })
}
