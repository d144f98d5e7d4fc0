//! Websocket subscriber channel. Clients join auction topics and
//! receive hub events as JSON; an `external-comment` message lets a
//! client push a platform comment through the same ingest path the
//! webhook uses.

use super::{find_auction_by_post, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    JoinAuction { auction_id: String },
    LeaveAuction { auction_id: String },
    ExternalComment { post_id: String, comment_id: String },
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // All outbound traffic funnels through one channel so topic
    // forwarders never contend for the sink.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Unreadable websocket message: {}", e);
                continue;
            }
        };

        match parsed {
            ClientMessage::JoinAuction { auction_id } => {
                if forwarders.contains_key(&auction_id) {
                    continue;
                }
                let mut rx = state.hub.subscribe(&auction_id);
                let tx = out_tx.clone();
                let handle = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) => {
                                let Ok(json) = serde_json::to_string(&event) else {
                                    continue;
                                };
                                if tx.send(json).await.is_err() {
                                    break;
                                }
                            }
                            // Slow consumer dropped a window; resume
                            // from the live edge.
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!("Websocket subscriber lagged by {} events", n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                forwarders.insert(auction_id, handle);
            }
            ClientMessage::LeaveAuction { auction_id } => {
                if let Some(handle) = forwarders.remove(&auction_id) {
                    handle.abort();
                }
                state.hub.prune();
            }
            ClientMessage::ExternalComment {
                post_id,
                comment_id,
            } => {
                if let Err(e) = ingest_by_id(&state, &post_id, &comment_id).await {
                    tracing::error!("Websocket comment ingest failed: {}", e);
                }
            }
        }
    }

    for handle in forwarders.values() {
        handle.abort();
    }
    writer.abort();
    state.hub.prune();
}

/// Clients only know the comment id; pull the comment body from the
/// platform before running the normal ingest path.
async fn ingest_by_id(
    state: &AppState,
    post_id: &str,
    comment_id: &str,
) -> crate::error::Result<()> {
    let Some(auction) = find_auction_by_post(state.repo.as_ref(), post_id).await? else {
        return Ok(());
    };
    let epoch: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;
    let (comments, _) = state.source.fetch_comments_since(post_id, epoch).await?;
    let Some(comment) = comments
        .into_iter()
        .find(|c| c.external_comment_id == comment_id)
    else {
        tracing::debug!("Comment {} not found on post {}", comment_id, post_id);
        return Ok(());
    };
    state.ingestor.ingest_comment(&auction.id, &comment).await
}
