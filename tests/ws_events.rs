//! WebSocket subscriptions and commands over a real connection.

#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use givpower_engine::domain::{EngineEvent, ViewKind};

use common::{StaticSource, app_state, seeded_store, serve};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send(socket: &mut Socket, id: &str, payload: Value) {
    let message = json!({
        "id": id,
        "type": "command",
        "timestamp": Utc::now(),
        "payload": payload,
    });
    let Ok(()) = socket.send(Message::text(message.to_string())).await else {
        panic!("command should be sent");
    };
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let Ok(Some(Ok(message))) =
            tokio::time::timeout(Duration::from_secs(2), socket.next()).await
        else {
            panic!("expected a message within 2s");
        };
        if let Ok(text) = message.to_text()
            && !text.is_empty()
        {
            let Ok(value) = serde_json::from_str::<Value>(text) else {
                panic!("server should send JSON");
            };
            return value;
        }
    }
}

#[tokio::test]
async fn subscribed_topics_receive_events() {
    let state = app_state(seeded_store().await, Arc::new(StaticSource::default()));
    let addr = serve(state.clone()).await;
    let Ok((mut socket, _)) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await
    else {
        panic!("websocket should connect");
    };

    send(&mut socket, "1", json!({ "command": "subscribe", "topics": ["rankings"] })).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["id"], "1");
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["payload"]["subscribed"], json!(["rankings"]));

    // Not subscribed to balances: only the ranking event comes through.
    let _ = state.event_bus.publish(EngineEvent::BalancesSynced {
        filled: 0,
        cursor_ms: 0,
        synced_snapshots: Vec::new(),
        timestamp: Utc::now(),
    });
    let Ok(_) = state.ranking.refresh(ViewKind::Instant).await else {
        panic!("refresh should succeed");
    };

    let event = recv(&mut socket).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["payload"]["event_type"], "ranking_refreshed");
    assert_eq!(event["payload"]["view"], "instant");
    assert_eq!(event["payload"]["project_count"], 3);
}

#[tokio::test]
async fn get_ranking_returns_top_entries() {
    let state = app_state(seeded_store().await, Arc::new(StaticSource::default()));
    let addr = serve(state).await;
    let Ok((mut socket, _)) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await
    else {
        panic!("websocket should connect");
    };

    send(
        &mut socket,
        "r1",
        json!({ "command": "get_ranking", "view": "instant", "limit": 2 }),
    )
    .await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["id"], "r1");
    assert_eq!(reply["payload"]["total"], 3);
    assert_eq!(reply["payload"]["entries"].as_array().map(Vec::len), Some(2));
    assert_eq!(reply["payload"]["entries"][0]["project_id"], 1);

    send(
        &mut socket,
        "r2",
        json!({ "command": "get_ranking", "view": "weekly" }),
    )
    .await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], 400);
}

#[tokio::test]
async fn malformed_and_unknown_commands_are_rejected() {
    let state = app_state(seeded_store().await, Arc::new(StaticSource::default()));
    let addr = serve(state).await;
    let Ok((mut socket, _)) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await
    else {
        panic!("websocket should connect");
    };

    let Ok(()) = socket.send(Message::text("not json")).await else {
        panic!("frame should be sent");
    };
    let reply = recv(&mut socket).await;
    assert_eq!(reply["payload"]["code"], 400);

    send(&mut socket, "x", json!({ "command": "swap" })).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["id"], "x");
    assert_eq!(reply["payload"]["code"], 404);
}
