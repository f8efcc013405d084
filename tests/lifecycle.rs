mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rtmp_bridge::server::ClientEvent;
use rtmp_bridge::{
    ApplicationEvent, BridgeConfig, ClientConnection, ClientConnectionEvent, ConnectionState,
    Error, ErrorCode, ValidationError,
};

use common::{publishing_server, recv, wait_for, PORT};

fn count_stopped(connection: &ClientConnection) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    connection.events().on(move |event| {
        if matches!(event, ClientConnectionEvent::Stopped) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    count
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    let stopped = count_stopped(&connection);
    connection.connect("127.0.0.1", PORT, "live");
    let outgoing = connection.publish("src").await.expect("publish");

    connection.stop();
    connection.stop();
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert_eq!(connection.state(), ConnectionState::Stopped);
    assert!(outgoing.is_stopped());
    assert!(connection.streams().is_empty());

    // The server notices the client going away.
    assert!(wait_for(|| harness.app.clients().is_empty()).await);
}

#[tokio::test]
async fn test_client_stop_on_server_side() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    let mut events = connection.events().subscribe();
    connection.connect("127.0.0.1", PORT, "live");
    assert_eq!(recv(&mut events).await, Some(ClientConnectionEvent::Connected));

    let client = harness.app.clients().pop().expect("client");
    assert_eq!(client.app_name(), "live");
    assert_eq!(client.peer_addr().ip().to_string(), "127.0.0.1");
    let mut client_events = client.events().subscribe();

    client.stop();
    assert!(matches!(
        recv(&mut client_events).await,
        Some(ClientEvent::Stopped)
    ));
    assert!(harness.app.client(client.id()).is_none());
    assert_eq!(
        recv(&mut events).await,
        Some(ClientConnectionEvent::Disconnected(ErrorCode::PeerClosed))
    );
    assert_eq!(recv(&mut events).await, Some(ClientConnectionEvent::Stopped));
}

#[tokio::test]
async fn test_server_stop_disconnects_everyone() {
    let harness = publishing_server();
    let mut app_events = harness.app.events().subscribe();

    let connection = ClientConnection::new(&harness.engine);
    let mut events = connection.events().subscribe();
    connection.connect("127.0.0.1", PORT, "live");
    let _outgoing = connection.publish("src").await.expect("publish");
    let incoming = harness.wait_bridge("src").await;
    let stream = incoming.stream().expect("stream");

    harness.server.stop();
    harness.server.stop();
    assert!(harness.server.is_stopped());
    assert!(harness.app.is_stopped());
    assert!(harness.server.application("live").is_none());
    assert!(stream.is_stopped());
    assert!(incoming.stream().is_none());

    let mut saw_stopped = false;
    while let Some(event) = recv(&mut app_events).await {
        saw_stopped |= matches!(event, ApplicationEvent::Stopped);
    }
    assert!(saw_stopped);

    assert_eq!(recv(&mut events).await, Some(ClientConnectionEvent::Connected));
    assert_eq!(
        recv(&mut events).await,
        Some(ClientConnectionEvent::Disconnected(ErrorCode::PeerClosed))
    );
    assert_eq!(recv(&mut events).await, Some(ClientConnectionEvent::Stopped));

    // The port is free again.
    let again = rtmp_bridge::Server::new(&harness.engine);
    assert!(again.start(PORT).is_ok());
}

#[tokio::test]
async fn test_application_stop_unregisters() {
    let harness = publishing_server();
    assert_eq!(harness.server.application_names(), vec!["live".to_string()]);

    harness.app.stop();
    assert!(harness.server.application("live").is_none());

    let connection = ClientConnection::new(&harness.engine);
    let mut events = connection.events().subscribe();
    connection.connect("127.0.0.1", PORT, "live");
    assert_eq!(
        recv(&mut events).await,
        Some(ClientConnectionEvent::Disconnected(
            ErrorCode::ConnectCommandFailed
        ))
    );
}

#[tokio::test]
async fn test_bridge_config_bounds() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    connection.connect("127.0.0.1", PORT, "live");
    let _outgoing = connection.publish("src").await.expect("publish");
    let stream = harness.wait_bridge("src").await.stream().expect("stream");

    let err = stream
        .create_incoming_stream_bridge(BridgeConfig::default().max_late_offset(-1))
        .err()
        .expect("validation error");
    assert!(matches!(
        err,
        Error::Validation(ValidationError::Negative {
            name: "maxLateOffset"
        })
    ));

    let err = stream
        .create_incoming_stream_bridge(BridgeConfig::default().max_buffering_time(1001))
        .err()
        .expect("validation error");
    assert!(matches!(
        err,
        Error::Validation(ValidationError::TooHigh {
            name: "maxBufferingTime",
            max: 1000
        })
    ));

    let bridge = stream
        .create_incoming_stream_bridge(BridgeConfig::new(0, 1000))
        .expect("bounds are inclusive");
    assert_eq!(bridge.config().max_buffering_time, 1000);
}
