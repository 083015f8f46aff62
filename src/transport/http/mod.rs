//! Concurrent transport over HTTP
//!
//! Every `POST /mcp` caller is parked on a correlation slot while its request
//! waits in a bounded queue for the single dispatcher loop.

pub mod handlers;
pub mod pending;

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use super::{Transport, TransportKind};
use crate::errors::TransportError;
use crate::mcp::rpc::{request_key, Request, Response};
use crate::{auth, logging};

pub use pending::{PendingCalls, SlotGuard, Ticket};

pub const RPC_PATH: &str = "/mcp";
pub const HEALTH_PATH: &str = "/health";
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub bind: SocketAddr,
    /// `*` anywhere in the list allows every origin.
    pub cors_origins: Vec<String>,
    pub api_key: Option<String>,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub response_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            cors_origins: vec!["*".to_string()],
            api_key: None,
            queue_capacity: 10,
            enqueue_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// A request waiting for the dispatcher. Notifications carry no ticket.
#[derive(Debug)]
pub struct QueuedRequest {
    pub ticket: Option<Ticket>,
    pub request: Request,
}

/// Shared by every handler invocation.
#[derive(Clone)]
pub struct HttpState {
    pub api_key: Option<Arc<str>>,
    pub queue: mpsc::Sender<QueuedRequest>,
    pub pending: Arc<PendingCalls>,
    pub enqueue_timeout: Duration,
    pub response_timeout: Duration,
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    state: HttpState,
    queue: mpsc::Receiver<QueuedRequest>,
    /// Tickets of requests handed to the dispatcher and not yet answered.
    dispatched: HashMap<String, Ticket>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        let (sender, queue) = mpsc::channel(config.queue_capacity.max(1));
        let state = HttpState {
            api_key: config
                .api_key
                .as_deref()
                .filter(|key| !key.trim().is_empty())
                .map(Arc::from),
            queue: sender,
            pending: Arc::new(PendingCalls::new()),
            enqueue_timeout: config.enqueue_timeout,
            response_timeout: config.response_timeout,
        };

        Self {
            config,
            state,
            queue,
            dispatched: HashMap::new(),
            shutdown: CancellationToken::new(),
            server: None,
            local_addr: None,
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route(RPC_PATH, post(handlers::rpc_endpoint))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_api_key,
            ));

        Router::new()
            .route(HEALTH_PATH, get(handlers::health))
            .merge(protected)
            .layer(cors_layer(&self.config.cors_origins))
            .layer(middleware::from_fn(logging::request_logging_middleware))
            .with_state(self.state.clone())
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    if origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind)
            .await
            .map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;

        let app = self.router();
        let shutdown = self.shutdown.clone();
        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                    info!("http listener stopping");
                })
                .await
        }));
        self.local_addr = Some(local_addr);

        info!(
            bind_addr = %local_addr,
            auth = self.state.api_key.is_some(),
            "http transport listening"
        );
        Ok(())
    }

    /// Skips requests whose caller already gave up, so a reused id never
    /// sees the answer meant for an earlier call.
    async fn read_request(&mut self) -> Result<Option<Request>, TransportError> {
        while let Some(QueuedRequest { ticket, request }) = self.queue.recv().await {
            let Some(ticket) = ticket else {
                return Ok(Some(request));
            };
            let Some(key) = request.id.as_ref().map(request_key) else {
                return Ok(Some(request));
            };

            if !self.state.pending.is_live(&key, ticket) {
                debug!(id = %key, "dropping request abandoned by its caller");
                continue;
            }
            self.dispatched.insert(key, ticket);
            return Ok(Some(request));
        }
        Ok(None)
    }

    async fn write_response(&mut self, response: Response) -> Result<(), TransportError> {
        let Some(id) = response.id.as_ref() else {
            return Ok(());
        };
        let key = request_key(id);
        let ticket = self
            .dispatched
            .remove(&key)
            .ok_or_else(|| TransportError::NoPendingCall(key.clone()))?;
        self.state.pending.fulfill(&key, ticket, response)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.queue.close();
        self.dispatched.clear();
        let released = self.state.pending.release_all();
        info!(released, "released parked callers");

        if let Some(mut server) = self.server.take() {
            match tokio::time::timeout(self.config.shutdown_grace, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => warn!(error = %err, "http server exited with error"),
                Ok(Err(err)) => warn!(error = %err, "http server task failed"),
                Err(_) => {
                    warn!("http server did not stop within grace period, aborting");
                    server.abort();
                }
            }
        }
        Ok(())
    }
}
