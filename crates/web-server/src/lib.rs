// In crates/web-server/src/lib.rs

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use app_config::ServerSettings;
use chrono::Utc;
use engine::EngineContext;
use events::EngineEvent;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use types::{ControlResponse, EventsQuery, MAX_EVENTS, StatusResponse};

pub mod error;
pub mod types;

// Re-export our custom error type for convenience.
pub use error::{Error, Result};

/// The shared application state that is available to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: EngineContext,
}

/// Creates the main application router with all routes and middleware.
///
/// # Arguments
///
/// * `app_state`: The shared `AppState` holding the engine handles.
///
/// # Returns
///
/// The configured `axum::Router`.
pub fn create_router(app_state: AppState) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let api_router = Router::new()
        .route("/status", get(status_handler))
        .route("/events", get(events_handler))
        .route("/emergency-stop", post(emergency_stop_handler))
        .route("/resume", post(resume_handler));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .nest("/api", api_router)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// `GET /health`: the full health report, 503 while unhealthy.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.ctx.health.report(Utc::now());
    let status = if report.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report))
}

/// `GET /healthz`: the process is up and serving.
async fn liveness_handler() -> &'static str {
    "OK"
}

/// `GET /readyz`: a tick completed recently and state is reconciled.
async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.ctx.health.report(Utc::now()).healthy {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        venue: state.ctx.gateway.venue_name(),
        emergency_stop: state.ctx.control.is_stopped(),
        health: state.ctx.health.report(Utc::now()),
        risk: state.ctx.snapshot().await,
    })
}

/// `GET /api/events?limit=N`: most recent engine events, newest first.
async fn events_handler(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<EngineEvent>>> {
    if params.limit == 0 || params.limit > MAX_EVENTS {
        return Err(Error::BadRequest(format!("limit must be between 1 and {MAX_EVENTS}")));
    }
    Ok(Json(state.ctx.events.recent(params.limit)))
}

async fn emergency_stop_handler(State(state): State<AppState>) -> Json<ControlResponse> {
    tracing::warn!("Emergency stop requested over HTTP.");
    state.ctx.emergency_stop(Utc::now());
    Json(control_response(&state).await)
}

/// Releases the emergency stop and clears a risk halt.
async fn resume_handler(State(state): State<AppState>) -> Json<ControlResponse> {
    tracing::warn!("Resume requested over HTTP.");
    state.ctx.resume(Utc::now()).await;
    Json(control_response(&state).await)
}

async fn control_response(state: &AppState) -> ControlResponse {
    ControlResponse {
        emergency_stop: state.ctx.control.is_stopped(),
        halted: state.ctx.risk.lock().await.halt_reason().map(str::to_string),
    }
}

/// The handler for `GET /ws`.
/// Upgrades the connection to a WebSocket that streams engine events.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Replays recent events oldest first, then forwards live ones.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("New WebSocket client connected.");

    // Subscribe before reading the cache so nothing falls in the gap.
    let mut rx = state.ctx.events.subscribe();

    // --- 1. The "Replay" ---
    let mut replay = state.ctx.events.recent(MAX_EVENTS);
    replay.reverse();
    for event in &replay {
        if !send_event(&mut socket, event).await {
            tracing::info!("WebSocket client disconnected during replay.");
            return;
        }
    }

    // --- 2. "Going Live" ---
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if !send_event(&mut socket, &event).await {
                        tracing::info!("WebSocket client disconnected.");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagging; events dropped.");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("WebSocket client closed the connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::info!(error = %e, "WebSocket receive failed.");
                    break;
                }
            },
        }
    }
    tracing::info!("WebSocket client connection closed.");
}

/// Returns false once the client is gone.
async fn send_event(socket: &mut WebSocket, event: &EngineEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize engine event.");
            true
        }
    }
}

/// The main entry point for running the web server.
///
/// Serves until `cancel` fires, then finishes in-flight requests and returns.
pub async fn run(settings: &ServerSettings, ctx: EngineContext, cancel: CancellationToken) -> Result<()> {
    let app = create_router(AppState { ctx });

    let address = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&address).await.map_err(Error::ServerBindError)?;
    tracing::info!("Web server listening on {}", address);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(Error::Serve)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_config::PaperSettings;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use engine::HealthState;
    use events::EventBus;
    use execution::{ExchangeGateway, SimulatedVenue, Venue};
    use risk::{RiskManager, RiskSettings};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn context() -> EngineContext {
        let venue: Arc<dyn Venue> = Arc::new(SimulatedVenue::new(&PaperSettings::default()));
        let gateway = Arc::new(ExchangeGateway::new(venue, &app_config::RetrySettings::default()));
        let risk = RiskManager::new(RiskSettings::default(), dec!(10000), Utc::now()).unwrap();
        let health = HealthState::new(Duration::from_secs(180), Duration::from_secs(600));
        EngineContext::new(risk, gateway, EventBus::new(16), health)
    }

    async fn send(ctx: &EngineContext, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let app = create_router(AppState { ctx: ctx.clone() });
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_unavailable_before_the_first_tick() {
        let (status, body) = send(&context(), "GET", "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["healthy"], false);
    }

    #[tokio::test]
    async fn ready_after_tick_and_reconcile() {
        let ctx = context();
        ctx.health.record_reconciled(Utc::now());
        ctx.health.record_tick(Utc::now(), engine::TickReport::default());
        let (status, _) = send(&ctx, "GET", "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, _) = send(&context(), "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn emergency_stop_round_trip() {
        let ctx = context();
        let (status, body) = send(&ctx, "POST", "/api/emergency-stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["emergency_stop"], true);
        assert!(ctx.control.is_stopped());

        let (_, events) = send(&ctx, "GET", "/api/events?limit=5").await;
        assert_eq!(events[0]["event"]["type"], "emergency_stop");

        let (_, body) = send(&ctx, "POST", "/api/resume").await;
        assert_eq!(body["emergency_stop"], false);
        assert!(!ctx.control.is_stopped());
    }

    #[tokio::test]
    async fn status_reports_risk_snapshot() {
        let (status, body) = send(&context(), "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["venue"], "paper");
        assert_eq!(body["risk"]["open_positions"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn event_limit_is_validated() {
        let (status, _) = send(&context(), "GET", "/api/events?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
