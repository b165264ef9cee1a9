use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use hostlink_core::{BridgeError, SessionToken, TransportError};
use hostlink_host::QueueStats;
use hostlink_settings::ServerSettings;
use hostlink_tools::{CapabilityFacade, CapabilityRegistry};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::directory::SessionDirectory;
use crate::health::{self, HealthResponse};
use crate::protocol::{ProtocolHandler, ServerInfo};
use crate::session::run_session;
use crate::shutdown::ShutdownCoordinator;
use crate::sink::ChannelSink;
use crate::transport::SessionTransport;

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<SessionDirectory>,
    pub handler: Arc<ProtocolHandler>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub host_stats: Option<QueueStats>,
    pub start_time: Instant,
    /// Route prefix with any trailing '/' removed; empty for a root mount.
    pub prefix: Arc<str>,
    pub keep_alive: Duration,
    pub outbound_buffer: usize,
}

/// The HTTP face of the bridge: session streams, message delivery and health.
pub struct HostlinkServer {
    settings: ServerSettings,
    directory: Arc<SessionDirectory>,
    handler: Arc<ProtocolHandler>,
    shutdown: Arc<ShutdownCoordinator>,
    host_stats: Option<QueueStats>,
    start_time: Instant,
}

impl HostlinkServer {
    pub fn new(settings: ServerSettings, registry: CapabilityRegistry) -> Self {
        let info = ServerInfo {
            name: settings.server_name.clone(),
            version: settings.server_version.clone(),
        };
        let facade = CapabilityFacade::new(Arc::new(registry));
        Self {
            settings,
            directory: Arc::new(SessionDirectory::new()),
            handler: Arc::new(ProtocolHandler::new(facade, info)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            host_stats: None,
            start_time: Instant::now(),
        }
    }

    /// Report the host queue's depth on `/health`.
    pub fn with_host_stats(mut self, stats: QueueStats) -> Self {
        self.host_stats = Some(stats);
        self
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn router(&self) -> Router {
        let prefix = route_prefix(&self.settings.base_path);
        let state = AppState {
            directory: Arc::clone(&self.directory),
            handler: Arc::clone(&self.handler),
            shutdown: Arc::clone(&self.shutdown),
            host_stats: self.host_stats.clone(),
            start_time: self.start_time,
            prefix: Arc::from(prefix),
            keep_alive: Duration::from_secs(self.settings.keep_alive_secs.max(1)),
            outbound_buffer: self.settings.outbound_buffer.max(1),
        };

        Router::new()
            .route(&format!("{prefix}/sse"), get(sse_handler))
            .route(&format!("{prefix}/message"), post(message_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve. Returns once the listener is bound.
    pub async fn start(self) -> Result<ServerHandle, std::io::Error> {
        let router = self.router();
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let token = self.shutdown.token();
        let serve = tokio::spawn(async move {
            let stopped = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = stopped {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(
            addr = %local_addr,
            base_path = %self.settings.base_path,
            "hostlink server listening"
        );

        Ok(ServerHandle {
            addr: local_addr,
            directory: self.directory,
            shutdown: self.shutdown,
            serve,
        })
    }
}

fn route_prefix(base_path: &str) -> &str {
    base_path.trim_end_matches('/')
}

/// Handle returned by [`HostlinkServer::start`].
pub struct ServerHandle {
    addr: SocketAddr,
    directory: Arc<SessionDirectory>,
    shutdown: Arc<ShutdownCoordinator>,
    serve: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn session_count(&self) -> usize {
        self.directory.len()
    }

    /// Stop accepting sessions, end every open one and wait for the
    /// listener to finish, each step bounded by `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        let drained = self.shutdown.graceful_shutdown(Some(timeout)).await;
        let stragglers = self.directory.close_all();
        if !drained || stragglers > 0 {
            warn!(stragglers, "sessions still open at shutdown, closed forcibly");
        }
        match tokio::time::timeout(timeout, self.serve).await {
            Ok(_) => info!("hostlink server stopped"),
            Err(_) => warn!("listener did not stop within {timeout:?}"),
        }
    }
}

/// GET {base}/sse
async fn sse_handler(State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let (tx, rx) = mpsc::channel::<Bytes>(state.outbound_buffer);
    let transport = state.directory.create(Box::new(ChannelSink::new(tx)));
    let endpoint = format!("{}/message?sessionId={}", state.prefix, transport.token());
    if let Err(e) = transport.open(&endpoint).await {
        warn!(session_id = %transport.token(), error = %e, "failed to open session stream");
        let _ = transport.close();
        return (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response();
    }

    let _ = state.shutdown.spawn(run_session(
        Arc::clone(&transport),
        Arc::clone(&state.handler),
        state.keep_alive,
        state.shutdown.token(),
    ));

    let body = SessionStream {
        frames: ReceiverStream::new(rx),
        transport,
    };
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Response body of one session. Dropping it (client went away) closes the
/// session.
struct SessionStream {
    frames: ReceiverStream<Bytes>,
    transport: Arc<SessionTransport>,
}

impl Stream for SessionStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.transport.close() {
            debug!(session_id = %self.transport.token(), "stream dropped by client");
        }
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST {base}/message?sessionId=<token>
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(raw_token) = query.session_id.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    let token = SessionToken::from_raw(raw_token);
    let Ok(transport) = state.directory.lookup(&token) else {
        return (StatusCode::NOT_FOUND, "Invalid sessionId").into_response();
    };

    match transport.on_inbound_delivered(&body) {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(TransportError::Closed) => (StatusCode::NOT_FOUND, "Invalid sessionId").into_response(),
        Err(e) => {
            let e = BridgeError::from(e);
            debug!(session_id = %token, code = e.code(), error = %e, "rejected inbound message");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response()
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.directory.len(),
        state.host_stats.as_ref().map(QueueStats::depth),
        state.shutdown.is_shutting_down(),
    ))
}
