use crate::types::{ErrorBody, QueryRequest, TitleRequest, TitleResponse};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use lumen_reasoning::{EngineError, EngineEvent, EngineResult, ReasoningEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Clone)]
struct AppState {
    engine: Arc<ReasoningEngine>,
    /// Number of active WebSocket connections.
    active_ws: Arc<AtomicUsize>,
}

/// HTTP + WebSocket front door for the reasoning engine.
///
/// - `POST /api/v1/query`: buffered request, full result as JSON
/// - `GET /api/v1/ws`: one event stream per inbound text frame
/// - `POST /api/v1/title`: short chat title
/// - `GET /health`
pub struct GatewayServer {
    engine: Arc<ReasoningEngine>,
    active_ws: Arc<AtomicUsize>,
    host: String,
    port: u16,
}

impl GatewayServer {
    pub fn new(engine: Arc<ReasoningEngine>, host: &str, port: u16) -> Self {
        Self {
            engine,
            active_ws: Arc::new(AtomicUsize::new(0)),
            host: host.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            active_ws: self.active_ws.clone(),
        };
        Router::new()
            .route("/health", get(health))
            .route("/api/v1/query", post(handle_query))
            .route("/api/v1/title", post(handle_title))
            .route("/api/v1/ws", get(ws_upgrade))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Gateway failed to bind {}: {}", addr, e))?;
        self.serve_with(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_with(self, listener: TcpListener) -> anyhow::Result<()> {
        let app = self.router();
        tracing::info!("Gateway listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

// ============================================================================
// Route handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody::new(message)))
}

/// POST /api/v1/query: run the whole loop and return the final structure.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<EngineResult>, ApiError> {
    let query = req
        .into_query()
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "query must not be empty"))?;

    match state.engine.process_query(&query).await {
        Ok(result) => Ok(Json(result)),
        Err(e @ EngineError::RateLimited(_)) => {
            tracing::warn!("Query rejected: {}", e);
            Err(error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => {
            tracing::error!("Query failed: {}", e);
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// POST /api/v1/title
async fn handle_title(
    State(state): State<AppState>,
    Json(req): Json<TitleRequest>,
) -> Json<TitleResponse> {
    let title = state.engine.generate_title(&req.query).await;
    Json(TitleResponse { title })
}

/// GET /api/v1/ws: WebSocket upgrade.
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Rejected input is answered in the same event schema as a request stream.
fn error_frame(message: impl Into<String>) -> Message {
    let event = EngineEvent::Error {
        content: message.into(),
    };
    Message::Text(serde_json::to_string(&event).unwrap_or_default())
}

/// One request at a time per connection. Events are forwarded as JSON text
/// frames. Text frames that arrive while a stream is live are dropped.
/// Closing the socket mid-stream drops the event receiver, which cancels
/// the engine.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let active = state.active_ws.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!("WebSocket connected ({} active)", active);
    let (mut ws_tx, mut ws_rx) = socket.split();

    'conn: while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let req: QueryRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                let _ = ws_tx.send(error_frame(format!("Invalid JSON: {}", e))).await;
                continue;
            }
        };
        let Some(query) = req.into_query() else {
            let _ = ws_tx.send(error_frame("query must not be empty")).await;
            continue;
        };

        let mut events = state.engine.process_query_stream(query);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        break 'conn;
                    }
                }
                inbound = ws_rx.next() => match inbound {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed mid-stream; cancelling request");
                        break 'conn;
                    }
                    Some(Ok(Message::Text(_))) => {
                        tracing::debug!("Ignoring frame received while a request is in progress");
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
    state.active_ws.fetch_sub(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(health().await, "ok");
    }

    #[test]
    fn test_error_frame_shape() {
        match error_frame("bad") {
            Message::Text(t) => assert_eq!(t, r#"{"type":"error","content":"bad"}"#),
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
