//! Real client against the in-process relay server over loopback.

use std::time::Duration;

use bms_realtime_client::{
    branch_room, event_types, ClientConfig, ConnectionState, Namespace, RealtimeClient,
    RealtimeError, RealtimeEvent, ReconnectConfig,
};
use bms_realtime_server::{serve, AppState, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

const TOKEN: &str = "terminal-1";

async fn spawn_relay() -> (Url, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(ServerConfig::default().with_tokens([TOKEN]));
    tokio::spawn(serve(listener, state.clone()));
    (Url::parse(&format!("http://{}", addr)).unwrap(), state)
}

fn client_for(base: &Url, namespace: Namespace, token: &str) -> RealtimeClient {
    let config = ClientConfig::new(base.clone(), namespace)
        .with_token(token)
        .with_connect_timeout(Duration::from_secs(5))
        .with_reconnect(ReconnectConfig {
            max_attempts: 2,
            initial_delay_ms: 20,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
        });
    RealtimeClient::new(config)
}

#[tokio::test]
async fn joined_room_receives_published_events() {
    let (base, state) = spawn_relay().await;
    let client = client_for(&base, Namespace::Pos, TOKEN);

    let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeEvent>();
    let _sub = client.on(event_types::STOCK_ADJUSTED, move |event| {
        let _ = tx.send(event.clone());
    });

    client.connect().await.unwrap();
    assert!(client.is_connected());

    let room = branch_room("42");
    client.join_room(room.clone()).unwrap();
    // Frames are handled in order, so the reply proves the join landed.
    assert_eq!(client.current_rooms().await, vec![room.clone()]);

    let delivered = state
        .hub
        .publish(
            Namespace::Pos,
            &room,
            RealtimeEvent::new(event_types::STOCK_ADJUSTED, "42")
                .with_field("sku", serde_json::json!("ABC-1")),
        )
        .await;
    assert_eq!(delivered, 1);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.branch_id, "42");
    assert_eq!(event.data["sku"], "ABC-1");

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.dispose().await;
}

#[tokio::test]
async fn leaving_a_room_stops_delivery() {
    let (base, state) = spawn_relay().await;
    let client = client_for(&base, Namespace::Main, TOKEN);

    let (tx, mut rx) = mpsc::unbounded_channel::<RealtimeEvent>();
    let _sub = client.on(event_types::INVENTORY_UPDATED, move |event| {
        let _ = tx.send(event.clone());
    });
    client.connect().await.unwrap();

    client.join_room("branch:1").unwrap();
    client.join_room("branch:2").unwrap();
    client.leave_room("branch:1").unwrap();
    assert_eq!(client.current_rooms().await, vec!["branch:2".to_string()]);
    assert_eq!(client.desired_rooms().await.unwrap(), vec!["branch:2".to_string()]);
    // The left room had no other subscribers, so the relay forgot it.
    assert_eq!(state.hub.room_count().await, 1);

    for branch in ["1", "2"] {
        state
            .hub
            .publish(
                Namespace::Main,
                &format!("branch:{}", branch),
                RealtimeEvent::new(event_types::INVENTORY_UPDATED, branch),
            )
            .await;
    }

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.branch_id, "2");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    client.dispose().await;
}

#[tokio::test]
async fn rejected_token_ends_in_error_state() {
    let (base, _state) = spawn_relay().await;
    let client = client_for(&base, Namespace::Admin, "not-a-valid-token");

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RealtimeError::Transport(_)), "got {:?}", err);
    assert!(matches!(client.state(), ConnectionState::Error { .. }));

    client.dispose().await;
}

#[tokio::test]
async fn ping_gets_a_pong_without_dropping_the_session() {
    let (base, _state) = spawn_relay().await;
    let client = client_for(&base, Namespace::Pos, TOKEN);
    client.connect().await.unwrap();

    client.ping().unwrap();
    client.join_room("branch:9").unwrap();
    assert_eq!(client.current_rooms().await, vec!["branch:9".to_string()]);
    assert!(client.is_connected());

    client.dispose().await;
}
