//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching incoming commands and forwarding filtered events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{EngineEvent, EventTopic, ViewKind};
use crate::service::RankingEngine;

const DEFAULT_RANKING_LIMIT: usize = 20;
const MAX_RANKING_LIMIT: usize = 100;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them.
/// - Forwards events whose topic the client subscribed to.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<EngineEvent>,
    ranking: Arc<RankingEngine>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_text_message(&text, &mut subs, &ranking).await;
                        if ws_tx.send(Message::text(response.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !subs.matches(event.topic()) {
                            continue;
                        }
                        let msg = WsMessage::server(
                            WsMessageType::Event,
                            serde_json::to_value(&event).unwrap_or_default(),
                        );
                        if ws_tx.send(Message::text(msg.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

/// Handles a text message from the client and builds the reply.
async fn handle_text_message(
    text: &str,
    subs: &mut SubscriptionManager,
    ranking: &RankingEngine,
) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error(String::new(), 400, "malformed JSON");
    };
    let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
        return WsMessage::error(msg.id, 404, "unknown command");
    };

    match command {
        WsCommand::Subscribe { topics } => {
            let (parsed, wildcard) = parse_topics(&topics);
            subs.subscribe(&parsed, wildcard);
            WsMessage::reply(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "subscribed": parsed,
                    "count": subs.count(),
                    "wildcard": subs.is_subscribed_all(),
                }),
            )
        }
        WsCommand::Unsubscribe { topics } => {
            let (parsed, wildcard) = parse_topics(&topics);
            subs.unsubscribe(&parsed, wildcard);
            WsMessage::reply(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "unsubscribed": parsed,
                    "remaining_count": subs.count(),
                }),
            )
        }
        WsCommand::GetRanking { view, limit } => {
            let kind = match view.parse::<ViewKind>() {
                Ok(kind) => kind,
                Err(e) => return WsMessage::error(msg.id, 400, &e.to_string()),
            };
            let view = match ranking.view(kind).await {
                Ok(view) => view,
                Err(e) => {
                    tracing::warn!(error = %e, view = %kind, "ws ranking read failed");
                    return WsMessage::error(msg.id, 500, &e.to_string());
                }
            };
            let limit = limit
                .unwrap_or(DEFAULT_RANKING_LIMIT)
                .clamp(1, MAX_RANKING_LIMIT);
            let entries: Vec<_> = view.entries.iter().take(limit).collect();
            WsMessage::reply(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "view": kind,
                    "round_number": view.round_number,
                    "snapshot_id": view.snapshot_id,
                    "computed_at": view.computed_at,
                    "total": view.entries.len(),
                    "entries": entries,
                }),
            )
        }
    }
}

/// Splits topic names into known topics and the wildcard flag. Unknown
/// names are ignored.
fn parse_topics(names: &[String]) -> (Vec<EventTopic>, bool) {
    let wildcard = names.iter().any(|name| name == "*");
    let topics = names
        .iter()
        .filter_map(|name| EventTopic::parse(name))
        .collect();
    (topics, wildcard)
}
