//! WebSocket endpoint for live deployment log streams
//!
//! Clients subscribe to topic strings (`deploy-log:<deployment_id>`,
//! `attempt-log:<attempt_id>`) and receive every notifier message
//! published on those topics for as long as the socket stays open.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::events::TopicMessage;

use super::AppState;

/// WebSocket message from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    Ping,
}

/// WebSocket message to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Message(TopicMessage),
}

/// Handle WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let topics: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut notifier_rx = state.notifier.subscribe();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);

    // Single writer for the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Forward subscribed topics to the writer
    let forward_topics = Arc::clone(&topics);
    let forward_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Ok(message) = notifier_rx.recv().await {
            if !forward_topics.lock().await.contains(&message.topic) {
                continue;
            }
            if forward_tx.send(ServerMessage::Message(message)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) {
                    match client_msg {
                        ClientMessage::Subscribe { topics: new_topics } => {
                            let mut topics = topics.lock().await;
                            topics.extend(new_topics);
                        }
                        ClientMessage::Unsubscribe { topics: old_topics } => {
                            let mut topics = topics.lock().await;
                            for topic in old_topics {
                                topics.remove(&topic);
                            }
                        }
                        ClientMessage::Ping => {
                            let _ = out_tx.send(ServerMessage::Pong).await;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    send_task.abort();
}
