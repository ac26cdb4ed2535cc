mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use communication_service::events::DomainEvent;
use communication_service::hub::connection::serve_connection;
use communication_service::models::PresenceStatus;

use common::{test_env, TestEnv};

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

fn spawn_server(
    env: &TestEnv,
    user: Uuid,
    server_io: tokio::io::DuplexStream,
) -> tokio::task::JoinHandle<()> {
    let hub = env.hub.clone();
    let presence = env.presence.clone();
    tokio::spawn(async move {
        let ws = tokio_tungstenite::accept_async(server_io).await.unwrap();
        serve_connection(ws, user, hub, presence).await.unwrap();
    })
}

#[tokio::test]
async fn connection_lifecycle_flips_presence_and_delivers_events() {
    let env = test_env();
    let user = Uuid::new_v4();
    let observer = Uuid::new_v4();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = spawn_server(&env, user, server_io);
    let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
        .await
        .unwrap();

    // Connecting registers with the hub and marks the user online.
    wait_until(|| async { env.hub.is_connected(user).await.unwrap() }).await;
    wait_until(|| async {
        env.presence
            .get_presence(user, observer)
            .await
            .unwrap()
            .is_online
    })
    .await;

    let event = DomainEvent::PresenceChanged {
        user_id: observer,
        status: PresenceStatus::Online,
        activity: None,
    };
    env.hub.send_event_to_user(user, &event).await.unwrap();

    let frame = client.next().await.unwrap().unwrap();
    match frame {
        WsMessage::Text(payload) => {
            assert!(payload.contains("user.presence_changed"));
            assert!(payload.contains(&observer.to_string()));
        }
        other => panic!("expected text frame, got {other:?}"),
    }

    // Closing the socket unregisters and flips presence offline.
    client.send(WsMessage::Close(None)).await.unwrap();
    server.await.unwrap();

    assert!(!env.hub.is_connected(user).await.unwrap());
    let after = env.presence.get_presence(user, observer).await.unwrap();
    assert_eq!(after.status, PresenceStatus::Offline);
}

#[tokio::test]
async fn close_is_handled_while_a_write_is_blocked() {
    let env = test_env();
    let user = Uuid::new_v4();
    let observer = Uuid::new_v4();

    // Tiny transport buffer: the write pump stalls as soon as the client
    // stops reading.
    let (client_io, server_io) = tokio::io::duplex(256);
    let server = spawn_server(&env, user, server_io);
    let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
        .await
        .unwrap();
    wait_until(|| async { env.hub.is_connected(user).await.unwrap() }).await;

    // Fill the transport without draining it client-side. Stays well under
    // the queue capacity, so the hub never evicts the connection.
    let event = DomainEvent::PresenceChanged {
        user_id: observer,
        status: PresenceStatus::Online,
        activity: None,
    };
    for _ in 0..64 {
        env.hub.send_event_to_user(user, &event).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The read pump must still process the close while the write is stuck.
    client.send(WsMessage::Close(None)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("connection did not shut down while a write was pending")
        .unwrap();
    assert!(!env.hub.is_connected(user).await.unwrap());
}

#[tokio::test]
async fn hub_side_unregister_closes_the_socket() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = spawn_server(&env, user, server_io);
    let (mut client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
        .await
        .unwrap();

    wait_until(|| async { env.hub.is_connected(user).await.unwrap() }).await;

    // Dropping the queue sender ends the write pump, which closes the socket.
    env.hub.disconnect(user).await.unwrap();

    loop {
        match client.next().await {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    server.await.unwrap();
    assert!(!env.hub.is_connected(user).await.unwrap());
}

#[tokio::test]
async fn replaced_connection_gets_closed() {
    let env = test_env();
    let user = Uuid::new_v4();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let first_server = spawn_server(&env, user, server_io);
    let (mut first_client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io)
        .await
        .unwrap();
    wait_until(|| async { env.hub.is_connected(user).await.unwrap() }).await;

    // Same user connects again; the first connection is replaced and closed.
    let (client_io2, server_io2) = tokio::io::duplex(64 * 1024);
    let _second_server = spawn_server(&env, user, server_io2);
    let (_second_client, _) = tokio_tungstenite::client_async("ws://localhost/ws", client_io2)
        .await
        .unwrap();

    loop {
        match first_client.next().await {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    first_server.await.unwrap();
    assert!(env.hub.is_connected(user).await.unwrap());
}
