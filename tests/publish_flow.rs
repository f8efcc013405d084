mod common;

use std::sync::Arc;

use rtmp_bridge::bridge::OutgoingStreamEvent;
use rtmp_bridge::{ClientConnection, ConnectionState, ErrorCode, IncomingStreamBridge, MediaKind};

use common::{audio, publishing_server, recv, video, wait_for, PORT};

fn frames(bridge: &IncomingStreamBridge, kind: MediaKind) -> u64 {
    let tracks = match kind {
        MediaKind::Audio => bridge.audio_tracks(),
        MediaKind::Video => bridge.video_tracks(),
    };
    tracks
        .first()
        .and_then(|t| t.default_encoding())
        .map(|e| e.source.update().num_frames)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_publish_gets_status_and_media() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    assert_eq!(
        connection.connect("127.0.0.1", PORT, "live"),
        ErrorCode::NoError
    );
    assert_eq!(connection.state(), ConnectionState::Connecting);

    let outgoing = connection.publish("src").await.expect("publish");
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(outgoing.stream_id() >= 1);
    let mut events = outgoing.events().subscribe();

    match recv(&mut events).await {
        Some(OutgoingStreamEvent::Command { name, params }) => {
            assert_eq!(name, "onStatus");
            assert_eq!(params[1].get_string("code"), Some("NetStream.Publish.Start"));
            assert_eq!(params[1].get_string("level"), Some("status"));
        }
        other => panic!("expected onStatus, got {other:?}"),
    }

    let incoming = harness.wait_bridge("src").await;
    let sink = outgoing.frame_listener();
    sink.on_media_frame(&video(0, true));
    sink.on_media_frame(&video(33, false));
    sink.on_media_frame(&audio(10));

    assert!(wait_for(|| frames(&incoming, MediaKind::Video) >= 2).await);
    assert!(wait_for(|| frames(&incoming, MediaKind::Audio) >= 1).await);

    assert!(connection.stats().out_bytes > 0);
    let clients = harness.app.clients();
    assert_eq!(clients.len(), 1);
    assert!(clients[0].stats().in_bytes > 0);
}

#[tokio::test]
async fn test_restream_between_applications() {
    let harness = publishing_server();

    let publisher = ClientConnection::new(&harness.engine);
    publisher.connect("127.0.0.1", PORT, "live");
    let src_out = publisher.publish("src").await.expect("publish src");
    let src_in = harness.wait_bridge("src").await;

    let relay = ClientConnection::new(&harness.engine);
    relay.connect("localhost", PORT, "live");
    let dst_out = relay.publish("dst").await.expect("publish dst");
    let dst_in = harness.wait_bridge("dst").await;

    dst_out.attach_to(&src_in).expect("attach");
    assert!(src_in.video_tracks()[0].is_attached());
    assert_eq!(src_in.audio_tracks()[0].attach_count(), 1);
    assert!(dst_out
        .video_tracks()
        .iter()
        .all(|track| track.is_attached()));

    let sink = src_out.frame_listener();
    for i in 0..5 {
        sink.on_media_frame(&video(i * 33, i == 0));
        sink.on_media_frame(&audio(i * 23));
    }

    assert!(wait_for(|| frames(&dst_in, MediaKind::Video) >= 5).await);
    assert!(wait_for(|| frames(&dst_in, MediaKind::Audio) >= 5).await);

    // Muting the source keeps counting but stops forwarding.
    let delivered = frames(&dst_in, MediaKind::Audio);
    src_in.audio_tracks()[0].mute(true);
    sink.on_media_frame(&audio(500));
    assert!(wait_for(|| frames(&src_in, MediaKind::Audio) >= 6).await);
    assert_eq!(frames(&dst_in, MediaKind::Audio), delivered);
}

#[tokio::test]
async fn test_incoming_stop_detaches_outgoing() {
    let harness = publishing_server();

    let publisher = ClientConnection::new(&harness.engine);
    publisher.connect("127.0.0.1", PORT, "live");
    let _src_out = publisher.publish("src").await.expect("publish src");
    let src_in = harness.wait_bridge("src").await;

    let relay = ClientConnection::new(&harness.engine);
    relay.connect("127.0.0.1", PORT, "live");
    let dst_out = relay.publish("dst").await.expect("publish dst");
    dst_out.attach_to(&src_in).expect("attach");

    let video_track = dst_out.video_tracks()[0].clone();
    assert!(video_track
        .attached_track()
        .is_some_and(|t| Arc::ptr_eq(&t, &src_in.video_tracks()[0])));

    src_in.stop();
    assert!(src_in.is_stopped());
    assert!(!video_track.is_attached());
    assert!(!dst_out.is_stopped());
    assert!(dst_out.attach_to(&src_in).is_ok());
    assert!(!video_track.is_attached());
}

#[tokio::test]
async fn test_outgoing_stop_deletes_remote_stream() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    connection.connect("127.0.0.1", PORT, "live");
    let outgoing = connection.publish("src").await.expect("publish");
    let incoming = harness.wait_bridge("src").await;
    let stream = incoming.stream().expect("attached stream");

    outgoing.stop();
    assert!(connection.stream(outgoing.stream_id()).is_none());
    assert!(wait_for(|| stream.is_stopped()).await);
    assert!(incoming.stream().is_none());
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_publish_then_immediate_stop_still_reaches_server() {
    let harness = publishing_server();

    let connection = ClientConnection::new(&harness.engine);
    connection.connect("127.0.0.1", PORT, "live");
    let outgoing = connection.publish("src").await.expect("publish");
    outgoing.stop();

    let incoming = harness.wait_bridge("src").await;
    assert!(wait_for(|| incoming.stream().is_none()).await);
    assert!(harness.app.clients()[0].streams().is_empty());
}
