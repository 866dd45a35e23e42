//! Relay server: `POST /prompt_response` in, WebSocket push out

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{Error, Result};

/// Buffered broadcasts per slow subscriber before it starts missing turns
const BROADCAST_CAPACITY: usize = 64;

/// Fan-out point shared by every connection
#[derive(Debug, Clone)]
pub struct RelayHub {
    tx: broadcast::Sender<Value>,
}

impl RelayHub {
    /// Create a hub with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Receive every turn published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Publish a turn, returning how many subscribers received it
    pub fn publish(&self, data: Value) -> usize {
        self.tx.send(data).unwrap_or(0)
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the relay router
pub fn router(hub: RelayHub) -> Router {
    // the UI is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/prompt_response", post(prompt_response))
        .route("/ws", get(ws_upgrade))
        .with_state(hub)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on `port` until the task is dropped
///
/// # Errors
///
/// Returns error if the server fails to bind or run
pub async fn serve(port: u16, hub: RelayHub) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Relay(format!("failed to bind relay server: {e}")))?;

    tracing::info!(port, "relay server listening");

    axum::serve(listener, router(hub))
        .await
        .map_err(|e| Error::Relay(format!("relay server error: {e}")))
}

async fn prompt_response(State(hub): State<RelayHub>, Json(data): Json<Value>) -> Json<Value> {
    let receivers = hub.publish(data.clone());
    tracing::debug!(receivers, "relayed turn");
    Json(json!({ "status": "success", "data": data }))
}

async fn ws_upgrade(State(hub): State<RelayHub>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: RelayHub) {
    let (mut sender, mut receiver) = socket.split();
    let mut turns = hub.subscribe();

    tracing::info!("relay subscriber connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match turns.recv().await {
                Ok(data) => {
                    let event = json!({ "event": "prompt_response", "data": data });
                    if sender
                        .send(Message::Text(event.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "relay subscriber lagging, turns skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // inbound messages are ignored; reading detects the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!("relay subscriber disconnected");
}
