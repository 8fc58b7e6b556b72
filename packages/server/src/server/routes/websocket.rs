//! WebSocket task observer.
//!
//! GET /ws/task/:task_id
//!
//! Subscribes the connection to one task's events before upgrading, so an
//! unknown task is refused with 404 and the `connected` acknowledgement is
//! always the first frame. Each event is sent as a JSON text frame
//! `{type, timestamp, data}`. Frames from the client are ignored; the
//! subscription ends when either side closes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use task_orchestrator::Subscription;
use tracing::{debug, info, warn};

use crate::server::app::AxumAppState;
use crate::server::error::ApiError;
use crate::server::routes::tasks::parse_task_id;

/// Handle WebSocket upgrade request
pub async fn task_websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<AxumAppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    let subscription = state.orchestrator.subscribe(task_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

/// Pump events to one client until either side goes away.
async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let task_id = subscription.job_id();
    let observer_id = subscription.id();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!(task_id = %task_id, observer_id = %observer_id, "websocket observer connected");

    // Dropping the subscription at the end of this task unsubscribes it
    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "websocket receive error");
                    break;
                }
                // inbound frames carry no commands
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(task_id = %task_id, observer_id = %observer_id, "websocket observer disconnected");
}
