//! HTTP and WebSocket handlers for the Beacon server.
//!
//! Drivers and riders connect over WebSocket; status queries are plain JSON
//! over HTTP and read the hub without going through its event loop.

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, ConnectInfo, Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use beacon_core::{
    validate_identity, ConnectionFactory, Hub, HubHandle, PublisherStatus, Role,
};
use beacon_transport::WebSocketTransport;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// Handle to the location hub.
    pub hub: HubHandle,
    /// Builds connections for upgraded sockets.
    pub factory: ConnectionFactory,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state around a running hub.
    #[must_use]
    pub fn new(hub: HubHandle, config: Config) -> Self {
        let factory = ConnectionFactory::new(hub.clone(), config.connection_config());
        Self {
            hub,
            factory,
            config,
        }
    }
}

/// Query parameters for the driver endpoint.
#[derive(Debug, Deserialize)]
pub struct DriverParams {
    pub driver_id: Option<String>,
    /// Accepted for client compatibility; not verified.
    #[allow(dead_code)]
    pub token: Option<String>,
}

/// Query parameters for the rider endpoint.
#[derive(Debug, Deserialize)]
pub struct RiderParams {
    pub rider_id: Option<String>,
    /// Accepted for client compatibility; not verified.
    #[allow(dead_code)]
    pub token: Option<String>,
}

/// Response body for the online drivers query.
#[derive(Debug, Serialize)]
pub struct OnlineDrivers {
    pub online_drivers: Vec<String>,
    pub count: usize,
}

/// Response body for the health check.
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub publishers_online: usize,
    pub subscriptions: usize,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.tracking.publisher_path, get(driver_ws_handler))
        .route(&state.config.tracking.subscriber_path, get(rider_ws_handler))
        .route("/api/tracking/drivers/online", get(online_drivers_handler))
        .route(
            "/api/tracking/driver/:driver_id/status",
            get(driver_status_handler),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let hub = Hub::spawn(config.hub_config());
    let state = Arc::new(AppState::new(hub, config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "Driver endpoint: ws://{}{}?driver_id=...",
        addr, config.tracking.publisher_path
    );
    info!(
        "Rider endpoint: ws://{}{}?rider_id=...",
        addr, config.tracking.subscriber_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<Health>, ApiError> {
    let stats = state.hub.stats().await?;
    Ok(Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: stats.connections,
        publishers_online: stats.publishers_online,
        subscriptions: stats.subscriptions,
    }))
}

/// List online drivers.
async fn online_drivers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OnlineDrivers>, ApiError> {
    let online_drivers = state.hub.online_publishers()?;
    Ok(Json(OnlineDrivers {
        count: online_drivers.len(),
        online_drivers,
    }))
}

/// Online state and last location of one driver.
async fn driver_status_handler(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> Result<Json<PublisherStatus>, ApiError> {
    validate_identity(&driver_id).map_err(|reason| ApiError::BadRequest(reason.to_string()))?;
    Ok(Json(state.hub.status(&driver_id)?))
}

/// Driver WebSocket upgrade handler.
async fn driver_ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<DriverParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    upgrade(ws, connect_info, Role::Publisher, params.driver_id, state)
}

/// Rider WebSocket upgrade handler.
async fn rider_ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<RiderParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    upgrade(ws, connect_info, Role::Subscriber, params.rider_id, state)
}

fn upgrade(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    role: Role,
    identity: Option<String>,
    state: Arc<AppState>,
) -> Result<Response, ApiError> {
    if !state.hub.is_running() {
        return Err(ApiError::ServiceUnavailable);
    }

    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    Ok(ws
        .max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote, role, identity, state))
        .into_response())
}

/// Hand an upgraded socket to the connection factory.
async fn handle_websocket(
    socket: WebSocket,
    remote: Option<SocketAddr>,
    role: Role,
    identity: Option<String>,
    state: Arc<AppState>,
) {
    let mut transport =
        WebSocketTransport::new(socket).with_max_message_size(state.config.limits.max_message_size);
    if let Some(addr) = remote {
        transport = transport.with_remote_addr(addr);
    }

    debug!(%role, remote = ?remote, "WebSocket connected");

    match state.factory.accept(transport, role, identity.as_deref()).await {
        Ok(connection) => connection.run().await,
        Err(e) => debug!(%role, error = %e, "WebSocket rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use beacon_core::HubConfig;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use tower::util::ServiceExt;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Hub::spawn(HubConfig::default()),
            Config::default(),
        ))
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn start_server(state: Arc<AppState>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        addr
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .unwrap();
            match message {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    async fn wait_for_connections(state: &AppState, expected: usize) {
        for _ in 0..200 {
            if state.hub.stats().await.unwrap().connections == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub never reached {} connections", expected);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(test_state(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_online_drivers_empty() {
        let (status, body) = get_json(test_state(), "/api/tracking/drivers/online").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"online_drivers": [], "count": 0}));
    }

    #[tokio::test]
    async fn test_unknown_driver_status() {
        let (status, body) = get_json(test_state(), "/api/tracking/driver/D9/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"driver_id": "D9", "is_online": false}));
    }

    #[tokio::test]
    async fn test_hub_unavailable_is_503() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);
        let state = Arc::new(AppState::new(handle, Config::default()));

        let (status, body) = get_json(state.clone(), "/api/tracking/drivers/online").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());

        let (status, _) = get_json(state, "/api/tracking/driver/D1/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_missing_driver_id_rejected() {
        let addr = start_server(test_state()).await;
        let (mut client, _) = connect_async(format!("ws://{}/ws/driver", addr))
            .await
            .unwrap();

        assert_eq!(next_json(&mut client).await, json!({"error": "driver_id is required"}));
        let closing = client.next().await;
        assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
    }

    #[tokio::test]
    async fn test_driver_to_rider_over_websocket() {
        let state = test_state();
        let addr = start_server(state.clone()).await;

        let (mut driver, _) = connect_async(format!("ws://{}/ws/driver?driver_id=D1&token=x", addr))
            .await
            .unwrap();
        let (mut rider, _) = connect_async(format!("ws://{}/ws/rider?rider_id=R1", addr))
            .await
            .unwrap();

        let welcome = next_json(&mut driver).await;
        assert_eq!(welcome["type"], "connected");
        assert_eq!(welcome["payload"]["driver_id"], "D1");
        let welcome = next_json(&mut rider).await;
        assert_eq!(welcome["payload"]["rider_id"], "R1");
        wait_for_connections(&state, 2).await;

        rider
            .send(Message::Text(
                json!({"action": "subscribe", "driver_id": "D1"}).to_string(),
            ))
            .await
            .unwrap();
        let status = next_json(&mut rider).await;
        assert_eq!(status["type"], "driver_status");
        assert_eq!(status["payload"]["is_online"], true);

        driver
            .send(Message::Text(
                json!({"latitude": 6.9, "longitude": 79.8, "heading": 0, "speed": 0}).to_string(),
            ))
            .await
            .unwrap();
        let update = next_json(&mut rider).await;
        assert_eq!(update["type"], "location_update");
        assert_eq!(update["payload"]["driver_id"], "D1");

        let (_, online) = get_json(state.clone(), "/api/tracking/drivers/online").await;
        assert_eq!(online, json!({"online_drivers": ["D1"], "count": 1}));
        let (_, status) = get_json(state.clone(), "/api/tracking/driver/D1/status").await;
        assert_eq!(status["is_online"], true);
        assert_eq!(status["location"]["latitude"], 6.9);

        driver.close(None).await.unwrap();
        let offline = next_json(&mut rider).await;
        assert_eq!(offline["payload"]["driver_id"], "D1");
        assert_eq!(offline["payload"]["is_online"], false);
    }
}
