//! WebSocket endpoint.
//!
//! GET /ws?client_id=...
//!
//! Registers the socket as the client's channel, forwards outbound events as
//! JSON text frames and routes inbound `{action, payload}` messages to the
//! job bound to the client. A client id is generated when none is given.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::ChannelRegistry;
use crate::core::AppState;
use crate::jobs::events::{Envelope, InboundMessage, OutboundEvent};

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub client_id: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = query
        .client_id
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, registry, client_id))
}

/// What an inbound text frame turned out to be.
#[derive(Debug, PartialEq)]
enum Frame {
    Ping,
    Decision(InboundMessage),
    Garbage(String),
}

fn classify_frame(text: &str) -> Frame {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Frame::Garbage(e.to_string()),
    };
    if value.get("type").and_then(|t| t.as_str()) == Some("ping") {
        return Frame::Ping;
    }
    match serde_json::from_value::<InboundMessage>(value) {
        Ok(msg) => Frame::Decision(msg),
        Err(e) => Frame::Garbage(e.to_string()),
    }
}

async fn serve_socket(socket: WebSocket, registry: Arc<ChannelRegistry>, client_id: String) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let connection = registry.register(&client_id, tx.clone());
    info!(%client_id, connection, "client connected");
    let _ = tx.send(OutboundEvent::Connected {
        client_id: client_id.clone(),
    });

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let envelope = Envelope {
                event: &event,
                timestamp: Utc::now(),
            };
            let text = match serde_json::to_string(&envelope) {
                Ok(t) => t,
                Err(e) => {
                    warn!("failed to serialise {} event: {}", event.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%client_id, "socket read error: {}", e);
                break;
            }
        };
        match classify_frame(text.as_str()) {
            Frame::Ping => {
                let _ = tx.send(OutboundEvent::Pong);
            }
            Frame::Decision(msg) => {
                debug!(%client_id, action = %msg.action, "operator message");
                registry.route_inbound(&client_id, msg);
            }
            Frame::Garbage(reason) => {
                warn!(%client_id, "ignoring malformed message: {}", reason);
            }
        }
    }

    registry.release(&client_id, connection);
    drop(tx);
    writer.abort();
    info!(%client_id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_frames_are_recognised() {
        assert_eq!(classify_frame(r#"{"type":"ping"}"#), Frame::Ping);
    }

    #[test]
    fn decision_frames_decode_with_optional_payload() {
        assert_eq!(
            classify_frame(r#"{"action":"download_selected","payload":{"indices":[0,2]}}"#),
            Frame::Decision(InboundMessage::new(
                "download_selected",
                json!({"indices": [0, 2]})
            ))
        );
        assert!(matches!(
            classify_frame(r#"{"action":"skip"}"#),
            Frame::Decision(_)
        ));
    }

    #[test]
    fn garbage_is_not_fatal() {
        assert!(matches!(classify_frame("not json"), Frame::Garbage(_)));
        assert!(matches!(classify_frame(r#"{"payload":{}}"#), Frame::Garbage(_)));
    }
}
