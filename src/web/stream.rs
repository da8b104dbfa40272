//! WebSocket push of asynchronous replies.
//!
//! Platform adapters keep one stream open and render every pushed
//! reply (payment confirmations, restore restart notices). Without an
//! `actor` query parameter the stream carries every actor's pushes.

use crate::web::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use keywarden_types::ActorId;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub actor: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.actor, state))
}

async fn handle_socket(socket: WebSocket, actor: Option<String>, state: AppState) {
    let mut rx = match &actor {
        Some(actor) => state
            .broadcaster
            .subscribe_actor(&ActorId::new(actor.clone())),
        None => state.broadcaster.subscribe_global(),
    };
    info!(actor = ?actor, "reply stream connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward broadcast events to the client
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize stream event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("reply stream lagged {} messages", n);
                    continue;
                }
                Err(RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    // Drain client messages (heartbeats) until the socket closes
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    info!("reply stream client closed connection");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    debug!("reply stream heartbeat");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("reply stream error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {
            debug!("stream send task completed");
        }
        _ = recv_task => {
            debug!("stream receive task completed");
        }
    }

    info!("reply stream disconnected");
}
