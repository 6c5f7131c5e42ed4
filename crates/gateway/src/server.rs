use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{State, rejection::JsonRejection},
        http::StatusCode,
        response::{
            Html, IntoResponse, Json, Response,
            sse::{Event, KeepAlive, Sse},
        },
        routing::{get, post},
    },
    chrono::Utc,
    futures::Stream,
    relay_channel::{
        ConnectionManager, LibPhoneNormalizer, MessageDispatcher, PairingBroadcaster,
    },
    relay_config::RelayConfig,
    relay_sessions::{SessionStore, SledSessionStore},
    relay_transport::BridgeFactory,
    serde::Deserialize,
    serde_json::json,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::state::GatewayState;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/qr", get(qr_page_handler))
        .route("/qr-stream", get(qr_stream_handler))
        .route("/send", post(send_handler))
        .route("/session-status", get(session_status_handler))
        .route("/reset-session", post(reset_session_handler))
        .route("/reconnect", post(reconnect_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Where the session store lives: the configured path, else `<data_dir>/sessions`.
pub fn session_store_path(config: &RelayConfig) -> PathBuf {
    config
        .store
        .path
        .clone()
        .unwrap_or_else(|| relay_config::data_dir().join("sessions"))
}

/// Wire the connection core to its store and bridge transport.
pub fn build_state(config: &RelayConfig) -> anyhow::Result<Arc<GatewayState>> {
    let store_path = session_store_path(config);
    let store: Arc<dyn SessionStore> = Arc::new(
        SledSessionStore::open(&store_path)
            .with_context(|| format!("opening session store at {}", store_path.display()))?,
    );
    let connection = ConnectionManager::new(
        &config.connection,
        store,
        Arc::new(BridgeFactory::new(config.bridge.clone())),
        Arc::new(PairingBroadcaster::new()),
    );
    let dispatcher = MessageDispatcher::new(
        Arc::clone(&connection),
        Arc::new(LibPhoneNormalizer::new(&config.messaging.default_region)),
        config.messaging.address_suffix.clone(),
    );
    Ok(GatewayState::new(connection, dispatcher))
}

/// Start the gateway HTTP server and the chat-network connection.
pub async fn start_gateway(config: RelayConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("relay gateway v{}", state.version),
        format!("listening on http://{addr}"),
        format!("pairing page: http://{addr}/qr"),
        format!(
            "session: {} ({})",
            state.connection.session_id(),
            session_store_path(&config).display()
        ),
        format!("bridge: {}", config.bridge.command),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let outcome = state.connection.initialize();
    info!(?outcome, "connection initialization requested");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.connection.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        },
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": "relay gateway is running",
        "status": state.gateway.readiness(),
        "version": state.gateway.version,
        "timestamp": Utc::now().to_rfc3339(),
        "endpoints": {
            "health": "GET /health",
            "info": "GET /info",
            "qrCode": "GET /qr",
            "qrStream": "GET /qr-stream",
            "sessionStatus": "GET /session-status",
            "sendMessage": "POST /send",
            "resetSession": "POST /reset-session",
            "reconnect": "POST /reconnect",
        },
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": state.gateway.readiness(),
        "state": state.gateway.connection.current_state(),
        "version": state.gateway.version,
        "uptimeSecs": state.gateway.uptime_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn info_handler(State(state): State<AppState>) -> Response {
    match state.gateway.connection.client_info().await {
        Ok(Some(info)) => Json(json!({ "status": "ready", "clientInfo": info })).into_response(),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "client not ready" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn qr_page_handler() -> impl IntoResponse {
    Html(include_str!("assets/qr.html"))
}

async fn qr_stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.gateway.connection.broadcaster().subscribe();
    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse) => {
                    yield Ok(sse);
                },
                Err(e) => warn!(error = %e, "failed to encode pairing event"),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    /// Accepts numbers as well as strings.
    #[serde(default)]
    phone: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

impl SendRequest {
    fn phone_text(&self) -> String {
        match &self.phone {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Always 200: failures are reported in the outcome, not the status code.
async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            warn!(error = %e, "unreadable send request");
            SendRequest::default()
        },
    };
    let outcome = state
        .gateway
        .dispatcher
        .send(&request.phone_text(), request.message.as_deref().unwrap_or_default())
        .await;
    Json(outcome)
}

async fn session_status_handler(State(state): State<AppState>) -> Response {
    match state.gateway.connection.session_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn reset_session_handler(State(state): State<AppState>) -> Response {
    match state.gateway.connection.reset_session().await {
        Ok(()) => Json(json!({
            "success": true,
            "message": "session reset, reconnect to pair again",
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn reconnect_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.gateway.connection.initialize();
    Json(json!({
        "outcome": outcome,
        "state": state.gateway.connection.current_state(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        axum::{
            body::{Body, to_bytes},
            http::{Request, header},
        },
        futures::StreamExt,
        relay_config::ConnectionConfig,
        relay_sessions::MemorySessionStore,
        relay_transport::{Transport, TransportContext, TransportError, TransportFactory},
        tower::ServiceExt,
    };

    /// Factory whose bridge never starts.
    struct MissingBridge;

    impl TransportFactory for MissingBridge {
        fn create(&self, _ctx: TransportContext) -> Result<Arc<dyn Transport>, TransportError> {
            Err(TransportError::Spawn {
                command: "relay-bridge".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        }
    }

    fn test_state() -> (Arc<GatewayState>, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let connection = ConnectionManager::new(
            &ConnectionConfig::default(),
            Arc::clone(&store),
            Arc::new(MissingBridge),
            Arc::new(PairingBroadcaster::new()),
        );
        let dispatcher = MessageDispatcher::new(
            Arc::clone(&connection),
            Arc::new(LibPhoneNormalizer::new("PK")),
            "@c.us",
        );
        (GatewayState::new(connection, dispatcher), store)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_not_ready() {
        let (state, _) = test_state();
        let app = build_gateway_app(state);
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["state"], "uninitialized");
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["endpoints"]["sendMessage"], "POST /send");
    }

    #[tokio::test]
    async fn send_is_200_when_not_ready() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(
                Request::post("/send")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"phone": 923012345678, "message": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["sent"], false);
    }

    #[tokio::test]
    async fn malformed_send_is_still_200() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(
                Request::post("/send")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "not_ready");
    }

    #[tokio::test]
    async fn info_is_unavailable_until_ready() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn session_status_and_reset() {
        let (state, store) = test_state();
        store.save("default", b"blob").await.unwrap();
        let app = build_gateway_app(state);

        let resp = app
            .clone()
            .oneshot(Request::get("/session-status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["sessionExists"], true);
        assert_eq!(body["backend"], "memory");

        let resp = app
            .clone()
            .oneshot(Request::post("/reset-session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["success"], true);
        assert!(!store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn reconnect_reports_outcome() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(Request::post("/reconnect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["state"], "failed");
    }

    #[tokio::test]
    async fn qr_page_is_html() {
        let (state, _) = test_state();
        let resp = build_gateway_app(state)
            .oneshot(Request::get("/qr").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/qr-stream"));
    }

    #[tokio::test]
    async fn qr_stream_sends_snapshot_and_unsubscribes_on_close() {
        let (state, _) = test_state();
        let broadcaster = Arc::clone(state.connection.broadcaster());
        let resp = build_gateway_app(state)
            .oneshot(Request::get("/qr-stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(broadcaster.observer_count(), 1);

        let mut body = resp.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("data: "), "{text}");
        assert!(text.contains("\"status\":\"checking_session\""), "{text}");

        drop(body);
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
