//! HTTP and WebSocket handlers for the relay server.
//!
//! This module wires the socket lifecycle and the change-feed endpoint to
//! the core services.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use relay_core::{
    ChangeEventRouter, ConnectError, ConnectionLifecycleManager, ConnectionState, Deliverer,
    MemoryRegistry, MessageOutcome, TokenVerifier, REJECTION_MESSAGE,
};
use relay_protocol::{codec, HandshakeParams};
use relay_transport::{ConnectionId, SessionHub, SessionReceiver};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Outbound queues of live sockets.
    pub hub: SessionHub,
    /// Registered connections.
    pub registry: Arc<MemoryRegistry>,
    /// Connect, message, and disconnect handling.
    pub lifecycle: ConnectionLifecycleManager,
    /// Change-feed routing.
    pub router: ChangeEventRouter,
}

impl AppState {
    /// Build the service graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier cannot be configured.
    pub fn new(config: Config) -> Result<Self> {
        let verifier_config = config.auth.verifier_config()?;
        let verifier =
            Arc::new(TokenVerifier::new(&verifier_config).context("Invalid auth configuration")?);
        info!(
            issuer = verifier.issuer(),
            algorithm = ?verifier_config.algorithm,
            "Token verifier ready"
        );

        let hub = SessionHub::with_capacity(config.transport.session_queue_capacity);
        let registry = Arc::new(MemoryRegistry::with_page_size(config.registry.page_size));
        let deliverer = Arc::new(Deliverer::with_config(
            registry.clone(),
            Arc::new(hub.clone()),
            config.delivery.deliverer_config(),
        ));

        let lifecycle =
            ConnectionLifecycleManager::new(verifier, registry.clone(), deliverer.clone());
        let router = ChangeEventRouter::new(config.feed.table_map(), deliverer);

        Ok(Self {
            config,
            hub,
            registry,
            lifecycle,
            router,
        })
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let transport = &state.config.transport;
    Router::new()
        .route(&transport.websocket_path, get(ws_handler))
        .route(&transport.changes_path, post(changes_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(
        "Change feed endpoint: http://{}{}",
        addr, config.transport.changes_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len(),
    }))
}

/// Change-feed batch handler.
async fn changes_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let batch = match codec::decode_batch(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Rejected change batch");
            metrics::record_error("change_batch");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let start = Instant::now();
    let report = state.router.process_batch(&batch).await;
    metrics::record_latency("change_batch", start.elapsed().as_secs_f64());
    metrics::record_batch(&report);

    Json(report).into_response()
}

/// WebSocket upgrade handler.
///
/// The handshake is verified before the upgrade; a rejected token never
/// opens a socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let connection_id = ConnectionId::generate();

    // Queue exists before the registry entry so early broadcasts are not lost
    let session = state.hub.register(connection_id.clone());

    let connection = match state.lifecycle.connect(&connection_id, &params).await {
        Ok(connection) => connection,
        Err(ConnectError::Auth(e)) => {
            metrics::record_auth_failure(e.reason());
            return (StatusCode::UNAUTHORIZED, REJECTION_MESSAGE).into_response();
        }
        Err(ConnectError::Registry(e)) => {
            error!(connection = %connection_id, error = %e, "Failed to register connection");
            metrics::record_error("registry");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let partition = connection.resource_partition;
    let failed_state = state.clone();
    let failed_id = connection_id.clone();

    ws.max_message_size(state.config.transport.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(connection = %failed_id, error = %e, "WebSocket upgrade failed");
            tokio::spawn(async move {
                if let Err(e) = failed_state.lifecycle.disconnect(&failed_id).await {
                    error!(connection = %failed_id, error = %e, "Failed to remove connection");
                }
            });
        })
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new(partition);
            handle_websocket(socket, session, state).await;
        })
}

/// Drive an open WebSocket until either side goes away.
async fn handle_websocket(socket: WebSocket, mut session: SessionReceiver, state: Arc<AppState>) {
    let connection_id = session.connection_id().clone();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut conn_state = ConnectionState::Open;

    while conn_state.is_open() {
        tokio::select! {
            biased;

            // Outbound messages queued by the deliverer
            outbound = session.recv() => {
                match outbound {
                    Some(data) => {
                        if send_bytes(&mut sender, data).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection_id, "Session queue closed");
                        break;
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match read_inbound(&connection_id, &mut sender, msg).await {
                    Some(Inbound::Data(data)) => {
                        conn_state = handle_inbound(&state, &connection_id, &data).await;
                    }
                    Some(Inbound::Control) => {}
                    None => break,
                }
            }
        }
    }

    if conn_state == ConnectionState::Closed {
        // Flush the rejection notice before closing
        while let Some(data) = session.try_recv() {
            if send_bytes(&mut sender, data).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    }

    drop(session);
    drop(receiver);

    if let Err(e) = state.lifecycle.disconnect(&connection_id).await {
        error!(connection = %connection_id, error = %e, "Failed to remove connection");
        metrics::record_error("registry");
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

enum Inbound {
    Data(Vec<u8>),
    Control,
}

/// Classify one socket event. `None` ends the session.
async fn read_inbound(
    connection_id: &ConnectionId,
    sender: &mut SplitSink<WebSocket, Message>,
    msg: Option<Result<Message, axum::Error>>,
) -> Option<Inbound> {
    match msg {
        Some(Ok(Message::Text(text))) => Some(Inbound::Data(text.into_bytes())),
        Some(Ok(Message::Binary(data))) => Some(Inbound::Data(data)),
        Some(Ok(Message::Ping(data))) => {
            sender.send(Message::Pong(data)).await.ok()?;
            Some(Inbound::Control)
        }
        Some(Ok(Message::Pong(_))) => Some(Inbound::Control),
        Some(Ok(Message::Close(_))) => {
            debug!(connection = %connection_id, "Received close frame");
            None
        }
        Some(Err(e)) => {
            warn!(connection = %connection_id, error = %e, "WebSocket error");
            metrics::record_error("websocket");
            None
        }
        None => {
            debug!(connection = %connection_id, "WebSocket stream ended");
            None
        }
    }
}

async fn handle_inbound(
    state: &AppState,
    connection_id: &ConnectionId,
    data: &[u8],
) -> ConnectionState {
    metrics::record_message(data.len(), "inbound");
    let start = Instant::now();

    let outcome = state.lifecycle.handle_message(connection_id, data).await;
    metrics::record_latency("message", start.elapsed().as_secs_f64());

    match outcome {
        Ok(outcome) => {
            if let MessageOutcome::Rejected(e) = &outcome {
                metrics::record_auth_failure(e.reason());
            }
            outcome.next_state()
        }
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Message handling failed");
            metrics::record_error("registry");
            ConnectionState::Open
        }
    }
}

async fn send_bytes(sender: &mut SplitSink<WebSocket, Message>, data: Bytes) -> Result<()> {
    metrics::record_message(data.len(), "outbound");
    let text = String::from_utf8(data.to_vec()).context("Outbound message is not UTF-8")?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}
