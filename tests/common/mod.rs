//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use rtmp_bridge::protocol::net_stream;
use rtmp_bridge::server::ClientEvent;
use rtmp_bridge::{
    Application, ApplicationEvent, BridgeConfig, IncomingStreamBridge, LocalEngine, MediaFrame,
    Server, StreamEvent,
};

pub const PORT: u16 = 1935;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Incoming bridges created for `publish` commands, by stream name
pub type Published = Arc<Mutex<HashMap<String, Arc<IncomingStreamBridge>>>>;

pub struct Harness {
    pub engine: LocalEngine,
    pub server: Arc<Server>,
    pub app: Arc<Application>,
    pub published: Published,
}

impl Harness {
    pub fn bridge(&self, name: &str) -> Option<Arc<IncomingStreamBridge>> {
        self.published.lock().unwrap().get(name).cloned()
    }

    pub async fn wait_bridge(&self, name: &str) -> Arc<IncomingStreamBridge> {
        assert!(
            wait_for(|| self.bridge(name).is_some()).await,
            "{name} was never published"
        );
        self.bridge(name).unwrap()
    }
}

/// Server with an application `live` that accepts everyone and answers
/// `publish` with an incoming bridge and `NetStream.Publish.Start`
pub fn publishing_server() -> Harness {
    init_tracing();

    let engine = LocalEngine::new();
    let server = Server::new(&engine);
    let app = Application::new();
    let published: Published = Arc::default();

    let sink = published.clone();
    app.events().on(move |event| {
        let ApplicationEvent::Connect(client) = event else {
            return;
        };
        client.accept().expect("accept");

        let sink = sink.clone();
        client.events().on(move |event| {
            let ClientEvent::Stream(stream) = event else {
                return;
            };
            let sink = sink.clone();
            let weak = Arc::downgrade(stream);
            stream.events().on(move |event| {
                let StreamEvent::Command(command) = event else {
                    return;
                };
                if command.name != "publish" {
                    return;
                }
                let Some(stream) = weak.upgrade() else {
                    return;
                };
                let name = command.stream_name().unwrap_or_default().to_string();
                let bridge = stream
                    .create_incoming_stream_bridge(BridgeConfig::default())
                    .expect("incoming bridge");
                stream
                    .send_status(command.transaction_id, net_stream::publish::START, None)
                    .expect("status");
                sink.lock().unwrap().insert(name, bridge);
            });
        });
    });

    server.add_application("live", &app);
    server.start(PORT).expect("start");

    Harness {
        engine,
        server,
        app,
        published,
    }
}

/// Poll `check` until it holds, for up to two seconds
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub async fn recv<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> Option<E> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

pub fn video(timestamp: u32, keyframe: bool) -> MediaFrame {
    MediaFrame::video(timestamp, Bytes::from(vec![0x17; 256]), keyframe)
}

pub fn audio(timestamp: u32) -> MediaFrame {
    MediaFrame::audio(timestamp, Bytes::from(vec![0xaf; 32]))
}
