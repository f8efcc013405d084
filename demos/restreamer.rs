//! Restreamer example
//!
//! Run with: cargo run --example restreamer [SECONDS]
//!
//! Accepts publishers on application `live` and republishes every stream to
//! application `relay` through a client connection, once the relay answers
//! with `NetStream.Publish.Start`. Everything runs on the in-process engine: a
//! synthetic publisher feeds `live/camera` with fake frames and the relay side
//! prints what it receives.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use rtmp_bridge::bridge::{IncomingStreamEvent, OutgoingStreamEvent};
use rtmp_bridge::protocol::net_stream;
use rtmp_bridge::server::ClientEvent;
use rtmp_bridge::session::{Command, Stream};
use rtmp_bridge::{
    Application, ApplicationEvent, BridgeConfig, ClientConnection, IncomingStreamBridge,
    LocalEngine, MediaFrame, Server, ServerConfig, StreamEvent,
};

const LIVE: &str = "live";
const RELAY: &str = "relay";

/// Accept every client; call `on_publish` for each publish command
fn accept_publishers<F>(app: &Arc<Application>, on_publish: F)
where
    F: Fn(Arc<Stream>, Command) + Send + Sync + Clone + 'static,
{
    app.events().on(move |event| {
        let ApplicationEvent::Connect(client) = event else {
            return;
        };
        if let Err(e) = client.accept() {
            eprintln!("accept failed: {}", e);
            return;
        }

        let on_publish = on_publish.clone();
        client.events().on(move |event| {
            let ClientEvent::Stream(stream) = event else {
                return;
            };
            let on_publish = on_publish.clone();
            let weak = Arc::downgrade(stream);
            stream.events().on(move |event| match event {
                StreamEvent::Command(command) if command.name == "publish" => {
                    if let Some(stream) = weak.upgrade() {
                        on_publish(stream, command.clone());
                    }
                }
                _ => {}
            });
        });
    });
}

/// Create the incoming bridge and confirm the publish
fn start_publish(stream: &Arc<Stream>, command: &Command) -> Option<Arc<IncomingStreamBridge>> {
    let bridge = match stream.create_incoming_stream_bridge(BridgeConfig::default()) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("cannot bridge stream {}: {}", stream.id(), e);
            return None;
        }
    };
    stream
        .send_status(command.transaction_id, net_stream::publish::START, None)
        .ok()?;
    Some(bridge)
}

/// Republish `incoming` as `name` on the relay application
async fn relay(
    engine: LocalEngine,
    port: u16,
    name: String,
    incoming: Arc<IncomingStreamBridge>,
) -> rtmp_bridge::Result<()> {
    let connection = ClientConnection::new(&engine);
    connection.connect("127.0.0.1", port, RELAY);
    let outgoing = connection.publish(&name).await?;

    let target = Arc::downgrade(&incoming);
    let bridge = Arc::downgrade(&outgoing);
    outgoing.events().on(move |event| {
        let OutgoingStreamEvent::Command { name, params } = event else {
            return;
        };
        let code = params.get(1).and_then(|p| p.get_string("code"));
        if name != "onStatus" || code != Some(net_stream::publish::START.code) {
            return;
        }
        if let (Some(bridge), Some(target)) = (bridge.upgrade(), target.upgrade()) {
            match bridge.attach_to(&target) {
                Ok(()) => println!("[relay] forwarding to {}/{}", RELAY, bridge.stream_id()),
                Err(e) => eprintln!("[relay] attach failed: {}", e),
            }
        }
    });

    // Stop relaying when the source goes away.
    let stop_with = Arc::downgrade(&connection);
    incoming.events().on(move |event| {
        if matches!(event, IncomingStreamEvent::Stopped) {
            if let Some(connection) = stop_with.upgrade() {
                connection.stop();
            }
        }
    });

    // Keep the connection alive as long as it runs.
    let mut events = connection.events().subscribe();
    while events.recv().await.is_some() {}
    println!("[relay] {} finished", name);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_bridge=debug".parse()?)
                .add_directive("restreamer=debug".parse()?),
        )
        .init();

    let engine = LocalEngine::new();
    let config = ServerConfig::default();
    let server = Server::new(&engine);
    let live = Application::new();
    let relayed = Application::new();

    let relay_engine = engine.clone();
    let port = config.port;
    accept_publishers(&live, move |stream, command| {
        let Some(name) = command.stream_name().map(str::to_string) else {
            return;
        };
        let Some(bridge) = start_publish(&stream, &command) else {
            return;
        };
        println!("[live] {} is publishing on stream {}", name, stream.id());

        let engine = relay_engine.clone();
        tokio::spawn(async move {
            if let Err(e) = relay(engine, port, name, bridge).await {
                eprintln!("[relay] {}", e);
            }
        });
    });

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = received.clone();
    accept_publishers(&relayed, move |stream, command| {
        if let Some(bridge) = start_publish(&stream, &command) {
            println!(
                "[relay] received {} on stream {}",
                command.stream_name().unwrap_or("?"),
                stream.id()
            );
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(bridge);
        }
    });

    server.add_application(LIVE, &live);
    server.add_application(RELAY, &relayed);
    server.start_with(&config)?;
    println!("Listening on local port {}", config.port);

    // Synthetic camera: 30 fps video with a keyframe every second, 50 fps audio
    let camera = ClientConnection::new(&engine);
    camera.connect("127.0.0.1", config.port, LIVE);
    let outgoing = camera.publish("camera").await?;
    let frames = outgoing.frame_listener();

    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let started = tokio::time::Instant::now();
    let mut tick: u32 = 0;
    while started.elapsed() < Duration::from_secs(seconds) {
        ticker.tick().await;
        let timestamp = tick * 20;
        frames.on_media_frame(&MediaFrame::audio(timestamp, Bytes::from(vec![0xaf; 24])));
        if tick % 3 == 0 {
            let keyframe = tick % 150 == 0;
            let size = if keyframe { 12_000 } else { 1_500 };
            let data = Bytes::from(vec![0x17; size]);
            frames.on_media_frame(&MediaFrame::video(timestamp, data, keyframe));
        }

        if tick % 50 == 49 {
            let bridges = received.lock().unwrap_or_else(|e| e.into_inner()).clone();
            for bridge in bridges {
                for (track, stats) in bridge.stats_async().await {
                    for encoding in stats.values() {
                        println!(
                            "[relay] {} bitrate={}bps frames={}",
                            track, encoding.bitrate, encoding.media.num_frames
                        );
                    }
                }
            }
        }
        tick += 1;
    }

    camera.stop();
    server.stop();
    println!("Done");
    Ok(())
}
