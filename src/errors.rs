use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::security::Rejection;

/// Failures raised while moving envelopes across a transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode request: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("a call with id {0} is already in flight")]
    DuplicateId(String),
    #[error("no pending call for id {0}")]
    NoPendingCall(String),
    #[error("caller for id {0} stopped waiting")]
    CallerGone(String),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database not connected")]
    NotConnected,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("database worker failed: {0}")]
    Worker(String),
}

/// Tool-domain failures. These never travel on the RPC error channel; the
/// dispatcher folds them into an `isError` tool result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
    #[error("validation failed: {0}")]
    Rejected(#[from] Rejection),
    #[error("failed to {action}: {source}")]
    Database {
        action: &'static str,
        #[source]
        source: DatabaseError,
    },
    #[error("{tool} exceeded its {timeout:?} deadline")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },
    #[error("failed to format result: {0}")]
    Format(#[from] serde_json::Error),
}

impl ToolError {
    pub fn invalid_arguments(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool,
            reason: reason.into(),
        }
    }

    pub fn database(action: &'static str) -> impl FnOnce(DatabaseError) -> Self {
        move |source| Self::Database { action, source }
    }
}

/// Fatal errors that end the dispatcher loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] DatabaseError),
    #[error("failed to start transport: {0}")]
    Transport(#[from] TransportError),
}

/// Rejections produced by the networked transport before a request ever
/// reaches the dispatcher.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        code: &'static str,
        message: &'static str,
    },
    #[error("gateway timeout: {message}")]
    GatewayTimeout {
        code: &'static str,
        message: &'static str,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl HttpError {
    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "invalid_envelope",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            code: "duplicate_request_id",
            message: message.into(),
        }
    }

    pub fn service_unavailable(code: &'static str, message: &'static str) -> Self {
        Self::ServiceUnavailable { code, message }
    }

    pub fn gateway_timeout() -> Self {
        Self::GatewayTimeout {
            code: "response_timeout",
            message: "timed out waiting for a response",
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string())
            }
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            Self::ServiceUnavailable { code, message } => {
                (StatusCode::SERVICE_UNAVAILABLE, code, message.to_string())
            }
            Self::GatewayTimeout { code, message } => {
                (StatusCode::GATEWAY_TIMEOUT, code, message.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}
