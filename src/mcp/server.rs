//! The central Model Context Protocol engine
//!
//! Routes decoded envelopes by method name, negotiates the handshake
//! (`initialize`), and drives the read → dispatch → write loop over whichever
//! transport was selected at startup.

use std::{sync::Arc, time::Duration};

use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, ListToolsResult, ProtocolVersion, ServerCapabilities,
    ServerCapabilitiesTools,
};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::DatabaseAdapter;
use crate::domain::tools::{ToolInvoker, ToolRegistry, DEFAULT_MAX_ROWS, DEFAULT_TOOL_TIMEOUT};
use crate::domain::utils::error_result;
use crate::errors::ServerError;
use crate::mcp::rpc::{CallToolParams, ErrorObject, Request, Response, JSONRPC_VERSION};
use crate::security::{QueryValidator, DEFAULT_MAX_QUERY_LENGTH};
use crate::transport::Transport;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_rows: usize,
    pub max_query_length: usize,
    pub tool_timeout: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            ping_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Owns the tool registry and the adapter; one instance per process.
pub struct Dispatcher {
    registry: ToolRegistry,
    tools: ToolInvoker,
    adapter: Arc<dyn DatabaseAdapter>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, settings: DispatcherSettings) -> Self {
        let tools = ToolInvoker::new(
            Arc::clone(&adapter),
            QueryValidator::new(settings.max_query_length),
            settings.max_rows,
            settings.tool_timeout,
        );

        Self {
            registry: ToolRegistry::new(),
            tools,
            adapter,
            settings,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Connects the adapter, then serves requests until the transport runs
    /// dry or `shutdown` fires.
    pub async fn run<T>(
        &self,
        transport: &mut T,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError>
    where
        T: Transport + ?Sized,
    {
        let deadline = Instant::now() + self.settings.connect_timeout;
        self.adapter
            .connect(deadline)
            .await
            .map_err(ServerError::Connect)?;
        info!(database = %self.adapter.kind(), "database connected");

        if let Err(err) = transport.start().await {
            self.close_adapter().await;
            return Err(ServerError::Transport(err));
        }
        info!(transport = %transport.kind(), "serving requests");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, leaving dispatch loop");
                    break;
                }
                next = transport.read_request() => next,
            };

            match next {
                Ok(Some(request)) => {
                    if let Some(response) = self.handle_request(request).await {
                        if let Err(err) = transport.write_response(response).await {
                            warn!(error = %err, "failed to deliver response");
                        }
                    }
                }
                Ok(None) => {
                    info!("transport closed");
                    break;
                }
                Err(err) => warn!(error = %err, "skipping unreadable request"),
            }
        }

        if let Err(err) = transport.shutdown().await {
            warn!(error = %err, "transport shutdown failed");
        }
        self.close_adapter().await;
        Ok(())
    }

    async fn close_adapter(&self) {
        if let Err(err) = self.adapter.close().await {
            warn!(error = %err, "failed to close database");
        }
    }

    /// Returns `None` for notifications; every request with an id gets
    /// exactly one response.
    pub async fn handle_request(&self, request: Request) -> Option<Response> {
        let Request {
            jsonrpc,
            id,
            method,
            params,
        } = request;

        let Some(id) = id else {
            match method.as_str() {
                "notifications/initialized" | "initialized" => info!("client initialized"),
                _ => debug!(method = %method, "ignoring notification"),
            }
            return None;
        };

        if jsonrpc != JSONRPC_VERSION {
            warn!(method = %method, jsonrpc = %jsonrpc, "rejecting envelope with bad version tag");
            return Some(Response::error(Some(id), ErrorObject::invalid_request()));
        }

        let tool = tool_name(&method, params.as_ref());
        let response = self.route(Some(id), &method, params).await;

        info!(
            method = %method,
            tool = tool.as_deref().unwrap_or("-"),
            outcome = if response.is_error() { "failure" } else { "success" },
            "mcp action audited"
        );

        Some(response)
    }

    async fn route(&self, id: Option<Value>, method: &str, params: Option<Value>) -> Response {
        match method {
            "initialize" => {
                log_offered_version(params.as_ref());
                Response::serialized(id, &initialize_result())
            }
            "notifications/initialized" | "initialized" => Response::result(id, json!({})),
            "tools/list" => Response::serialized(
                id,
                &ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: self.registry.definitions().to_vec(),
                },
            ),
            "tools/call" => self.call_tool(id, params).await,
            "ping" => self.ping(id).await,
            other => Response::error(id, ErrorObject::method_not_found(other)),
        }
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> Response {
        let Some(params) = params else {
            return Response::error(id, ErrorObject::invalid_params("missing tools/call params"));
        };

        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return Response::error(id, ErrorObject::invalid_params(err.to_string())),
        };

        let Some(kind) = self.registry.lookup(&params.name) else {
            return Response::error(id, ErrorObject::unknown_tool(&params.name));
        };

        let arguments = params.arguments.unwrap_or_else(Map::new);
        let result = match self.tools.invoke(kind, arguments).await {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = kind.name(), error = %err, "tool call failed");
                error_result(&err)
            }
        };

        Response::serialized(id, &result)
    }

    async fn ping(&self, id: Option<Value>) -> Response {
        let deadline = Instant::now() + self.settings.ping_timeout;
        let outcome = match tokio::time::timeout_at(deadline, self.adapter.ping(deadline)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "ping exceeded its {:?} deadline",
                self.settings.ping_timeout
            )),
        };

        match outcome {
            Ok(()) => Response::result(id, json!({ "status": "ok" })),
            Err(detail) => {
                warn!(error = %detail, "database ping failed");
                Response::error(
                    id,
                    ErrorObject::internal_error("Database not available", Some(json!(detail))),
                )
            }
        }
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            ..Default::default()
        },
        protocol_version: ProtocolVersion::V2024_11_05.into(),
        instructions: None,
        meta: None,
    }
}

fn log_offered_version(params: Option<&Value>) {
    let offered = params
        .and_then(|params| params.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if offered != SUPPORTED_PROTOCOL_VERSION {
        info!(
            offered = %offered,
            answered = SUPPORTED_PROTOCOL_VERSION,
            "client offered a different protocol version"
        );
    }
}

fn tool_name(method: &str, params: Option<&Value>) -> Option<String> {
    if method != "tools/call" {
        return None;
    }
    params
        .and_then(|params| params.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
