mod common;

use std::time::Duration;

use futures_util::StreamExt;
use lavanode::{
    error::ErrorKind,
    events::Event,
    manager::{Manager, NodeManager},
    node::INITIAL_RECONNECT_ATTEMPTS,
    player,
    protocol::TrackEndReason,
    track::Track,
};
use serde_json::json;
use tokio::time;
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};

use common::{backend, closed_port, eventually, manager_options, node_options, wait_for, within};

fn is_connect(event: &Event) -> bool {
    matches!(event, Event::NodeConnect { .. })
}

#[tokio::test]
async fn connects_with_client_identity() {
    let (address, mut connections) = backend().await;
    let mut options = manager_options();
    options.shards = 2;
    let (manager, mut events) = NodeManager::new(options).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;

    assert_eq!(connection.uri.path(), "/v4/websocket");
    assert_eq!(connection.headers["authorization"], "youshallnotpass");
    assert_eq!(connection.headers["num-shards"], "2");
    assert_eq!(connection.headers["user-id"], "42");
    assert!(connection.headers.contains_key("client-name"));
    assert!(node.connected());
    assert!(node.is_initialized());
}

#[tokio::test]
async fn connect_twice_opens_one_socket() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    node.connect();
    let _connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;
    node.connect();

    time::sleep(Duration::from_millis(100)).await;
    assert!(connections.try_recv().is_err());
}

#[tokio::test]
async fn ready_and_stats() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection
        .send_json(json!({ "op": "ready", "sessionId": "abc", "resumed": false }))
        .await;
    connection
        .send_json(json!({
            "op": "stats",
            "players": 2,
            "playingPlayers": 1,
            "uptime": 60000,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 8, "systemLoad": 0.1, "lavalinkLoad": 0.05 }
        }))
        .await;

    let raw = wait_for(&mut events, |event| matches!(event, Event::NodeRaw { .. })).await;
    let Event::NodeRaw { payload, .. } = raw else {
        unreachable!();
    };
    assert_eq!(payload["op"], "ready");

    eventually(|| node.stats().players == 2).await;
    assert_eq!(node.session_id().as_deref(), Some("abc"));
    assert_eq!(node.stats().cpu.cores, 8);
}

#[tokio::test]
async fn frames_without_op_are_ignored() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;
    connection.send_json(json!({ "sessionId": "nope" })).await;
    connection
        .send_json(json!({ "op": "ready", "sessionId": "abc" }))
        .await;

    let event = within(events.recv()).await.unwrap();
    assert!(matches!(
        event,
        Event::NodeRaw { ref payload, .. } if payload["op"] == "ready"
    ));
}

#[tokio::test]
async fn unknown_op_is_reported_and_connection_stays_open() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection.send_json(json!({ "op": "bogus", "data": 1 })).await;

    let event = wait_for(&mut events, |event| matches!(event, Event::NodeError { .. })).await;
    let Event::NodeError { error, .. } = event else {
        unreachable!();
    };
    assert_eq!(error.kind, ErrorKind::Unimplemented);
    assert!(error.to_string().contains("bogus"));
    assert!(node.connected());

    connection.send_json(json!({ "op": "ready", "sessionId": "abc" })).await;
    eventually(|| node.session_id().is_some()).await;
}

#[tokio::test]
async fn unknown_event_type_is_reported() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();
    manager.create_player("1", node.identifier()).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection
        .send_json(json!({ "op": "event", "type": "SegmentsLoaded", "guildId": "1" }))
        .await;

    let event = wait_for(&mut events, |event| matches!(event, Event::NodeError { .. })).await;
    let Event::NodeError { error, .. } = event else {
        unreachable!();
    };
    assert!(error.to_string().contains("SegmentsLoaded"));
}

#[tokio::test]
async fn player_update_and_track_end() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();
    let player = manager.create_player("1", node.identifier()).unwrap();
    {
        let mut player = player::lock(&player);
        player.queue.current = Some(Track::new("a"));
        player.queue.add(Track::new("b"));
        player.position_update_interval = Some(Duration::from_secs(60));
    }

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection
        .send_json(json!({
            "op": "playerUpdate",
            "guildId": "1",
            "state": { "time": 1500, "position": 4000, "connected": true, "ping": 20 }
        }))
        .await;
    connection
        .send_json(json!({ "op": "playerUpdate", "guildId": "unknown", "state": {} }))
        .await;
    connection
        .send_json(json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "1",
            "track": "a",
            "reason": "finished"
        }))
        .await;

    let event = wait_for(&mut events, |event| matches!(event, Event::TrackEnd { .. })).await;
    let Event::TrackEnd { guild_id, track, payload } = event else {
        unreachable!();
    };
    assert_eq!(guild_id, "1");
    assert_eq!(track, Some(Track::new("a")));
    assert_eq!(payload.reason, TrackEndReason::Finished);

    let player = player::lock(&player);
    assert_eq!(player.position, 4000);
    assert_eq!(player.ws_ping, Some(20));
    assert_eq!(player.created_timestamp, Some(1500));
    assert!(player.has_position_clock());
    assert_eq!(player.queue.current, Some(Track::new("b")));
    assert_eq!(player.queue.previous, Some(Track::new("a")));
}

#[tokio::test]
async fn track_exception_notifies_then_stops() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();
    let player = manager.create_player("1", node.identifier()).unwrap();
    player::lock(&player).queue.current = Some(Track::new("a"));

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection
        .send_json(json!({
            "op": "event",
            "type": "TrackExceptionEvent",
            "guildId": "1",
            "exception": { "message": "boom", "severity": "common", "cause": "test" }
        }))
        .await;

    let event = wait_for(&mut events, |event| matches!(event, Event::TrackError { .. })).await;
    let Event::TrackError { track, payload, .. } = event else {
        unreachable!();
    };
    assert_eq!(track, Some(Track::new("a")));
    assert_eq!(
        payload.exception.and_then(|exception| exception.message).as_deref(),
        Some("boom")
    );

    // Stopping needs a session, which this backend never announced.
    let event = wait_for(&mut events, |event| matches!(event, Event::NodeError { .. })).await;
    let Event::NodeError { error, .. } = event else {
        unreachable!();
    };
    assert_eq!(error.kind, ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn websocket_closed_event_is_passed_through() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();
    manager.create_player("1", node.identifier()).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    connection
        .send_json(json!({
            "op": "event",
            "type": "WebSocketClosedEvent",
            "guildId": "1",
            "code": 4006,
            "reason": "Your session is no longer valid.",
            "byRemote": true
        }))
        .await;

    let event = wait_for(&mut events, |event| matches!(event, Event::SocketClosed { .. })).await;
    let Event::SocketClosed { guild_id, payload } = event else {
        unreachable!();
    };
    assert_eq!(guild_id, "1");
    assert_eq!(payload["code"], 4006);
}

#[tokio::test]
async fn sends_json_objects_only() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;

    assert!(node.send(&json!({ "op": "ping" })).await.unwrap());
    let message = within(connection.socket.next()).await.unwrap().unwrap();
    assert_eq!(message, Message::text(r#"{"op":"ping"}"#));

    let err = node.send(&json!([1, 2, 3])).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn destroy_closes_and_cascades() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();
    manager.create_player("1", node.identifier()).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;

    node.destroy();

    // Without a session, players are destroyed over the socket before it closes.
    let message = within(connection.socket.next()).await.unwrap().unwrap();
    let Message::Text(text) = message else {
        panic!("expected destroy frame, got {message:?}");
    };
    let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame, json!({ "op": "destroy", "guildId": "1" }));

    let message = within(connection.socket.next()).await.unwrap().unwrap();
    let Message::Close(Some(frame)) = message else {
        panic!("expected close frame, got {message:?}");
    };
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), "destroy");

    let event = within(events.recv()).await.unwrap();
    assert!(matches!(event, Event::NodeDestroy { .. }), "{event:?}");
    assert!(manager.node(node.identifier()).is_none());
    assert!(manager.player("1").is_none());
    assert!(!node.connected());
    assert_eq!(node.reconnect_attempts(), INITIAL_RECONNECT_ATTEMPTS);

    time::sleep(Duration::from_millis(200)).await;
    assert!(connections.try_recv().is_err(), "destroyed node reconnected");
}

#[tokio::test]
async fn destroys_player_over_socket_without_session() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;

    node.destroy_player("1").await.unwrap();

    let message = within(connection.socket.next()).await.unwrap().unwrap();
    let Message::Text(text) = message else {
        panic!("expected destroy frame, got {message:?}");
    };
    let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame, json!({ "op": "destroy", "guildId": "1" }));
    assert_eq!(node.calls(), 0, "no REST request is made");
    assert!(node.connected());
}

#[tokio::test]
async fn remote_close_reconnects() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;
    connection
        .send_json(json!({ "op": "ready", "sessionId": "abc" }))
        .await;
    eventually(|| node.session_id().is_some()).await;

    connection
        .socket
        .close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();

    let event = wait_for(&mut events, |event| {
        matches!(event, Event::NodeDisconnect { .. })
    })
    .await;
    assert!(matches!(
        event,
        Event::NodeDisconnect { code: 4000, ref reason, .. } if reason == "maintenance"
    ));
    assert_eq!(node.session_id(), None, "session of the closed socket is kept");

    wait_for(&mut events, |event| matches!(event, Event::NodeReconnect { .. })).await;
    let _second = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;
    assert_eq!(node.reconnect_attempts(), 2);
}

#[tokio::test]
async fn remote_destroy_close_does_not_reconnect() {
    let (address, mut connections) = backend().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let node = manager.create_node(node_options(address)).unwrap();

    node.connect();
    let mut connection = within(connections.recv()).await.unwrap();
    wait_for(&mut events, is_connect).await;

    connection
        .socket
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "destroy".into(),
        }))
        .await
        .unwrap();
    wait_for(&mut events, |event| {
        matches!(event, Event::NodeDisconnect { .. })
    })
    .await;

    time::sleep(Duration::from_millis(200)).await;
    assert!(connections.try_recv().is_err());
    assert!(!node.connected());
}

#[tokio::test]
async fn gives_up_after_retry_amount() {
    let address = closed_port().await;
    let (manager, mut events) = NodeManager::new(manager_options()).unwrap();
    let mut options = node_options(address);
    options.retry_amount = 2;
    let node = manager.create_node(options).unwrap();

    node.connect();

    let mut seen = Vec::new();
    within(async {
        loop {
            let event = events.recv().await.unwrap();
            let destroyed = matches!(event, Event::NodeDestroy { .. });
            seen.push(event);
            if destroyed {
                break;
            }
        }
    })
    .await;

    let reconnects = seen
        .iter()
        .filter(|event| matches!(event, Event::NodeReconnect { .. }))
        .count();
    assert_eq!(reconnects, 1);

    let fatal: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            Event::NodeError { error, .. } if error.to_string().contains("after 2 attempts") => {
                Some(error)
            }
            _ => None,
        })
        .collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].kind, ErrorKind::Unavailable);

    assert!(manager.node(node.identifier()).is_none());
    assert_eq!(node.reconnect_attempts(), INITIAL_RECONNECT_ATTEMPTS);

    time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err(), "node kept retrying");
}
