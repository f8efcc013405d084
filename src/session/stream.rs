//! Net-stream inside an accepted connection
//!
//! A [`Stream`] surfaces the peer's commands (`publish`, `play`, ...), sends
//! status replies and spawns incoming bridges for the media it carries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::amf::AmfValue;
use crate::bridge::{BridgeConfig, IncomingStreamBridge};
use crate::engine::{NetStreamHandle, NetStreamListener};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::protocol::Status;

/// A command received on a stream
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    /// Command object, usually null
    pub params: AmfValue,
    pub transaction_id: f64,
    /// Remaining arguments, e.g. `[stream_name, "live"]` for `publish`
    pub extra: Vec<AmfValue>,
}

impl Command {
    /// First extra argument as a string, the stream name for publish/play
    pub fn stream_name(&self) -> Option<&str> {
        self.extra.first().and_then(AmfValue::as_str)
    }
}

/// Events raised by a [`Stream`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Command(Command),
    Stopped,
}

/// Work queued for the dispatcher, in the order the engine raised it
enum Dispatch {
    Command(Command),
    /// The peer deleted the stream
    Deleted,
}

pub struct Stream {
    id: u32,
    net_stream: Mutex<Option<Arc<dyn NetStreamHandle>>>,
    stopped: AtomicBool,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    events: Emitter<StreamEvent>,
}

impl Stream {
    /// Wrap an engine net-stream and start listening to it
    ///
    /// Commands are emitted from a task on `runtime`, never from inside the
    /// engine callback, so listeners registered right after the stream shows
    /// up still see its first command.
    pub fn new(net_stream: Arc<dyn NetStreamHandle>, runtime: &Handle) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Arc::new(Self {
            id: net_stream.id(),
            net_stream: Mutex::new(Some(net_stream.clone())),
            stopped: AtomicBool::new(false),
            dispatch: tx,
            events: Emitter::new(),
        });

        runtime.spawn(dispatch_commands(Arc::downgrade(&stream), rx));

        let listener = Arc::downgrade(&stream);
        let listener: Weak<dyn NetStreamListener> = listener;
        net_stream.set_listener(listener);
        stream
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn NetStreamHandle>>> {
        self.net_stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn events(&self) -> &Emitter<StreamEvent> {
        &self.events
    }

    pub(crate) fn net_stream(&self) -> Option<Arc<dyn NetStreamHandle>> {
        self.lock().clone()
    }

    /// Send an `onStatus` reply; the description defaults to the status code
    pub fn send_status(
        &self,
        transaction_id: f64,
        status: Status,
        description: Option<&str>,
    ) -> Result<()> {
        let net_stream = self.net_stream().ok_or(Error::Stopped("stream"))?;
        let description = description.unwrap_or(status.code);

        tracing::debug!(stream_id = self.id, code = status.code, "Sending status");
        net_stream.send_status(
            transaction_id,
            status.code,
            status.level.as_str(),
            description,
        );
        Ok(())
    }

    /// Create an incoming bridge for this stream's media and attach it
    pub fn create_incoming_stream_bridge(
        self: &Arc<Self>,
        config: BridgeConfig,
    ) -> Result<Arc<IncomingStreamBridge>> {
        config.validate()?;

        let net_stream = self.net_stream().ok_or(Error::Stopped("stream"))?;
        let handle = net_stream.create_incoming_bridge(
            config.max_late_offset as u32,
            config.max_buffering_time as u32,
        );
        let bridge = IncomingStreamBridge::new(handle, config);
        bridge.attach_to(self)?;
        Ok(bridge)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(net_stream) = self.lock().take() {
            net_stream.reset_listener();
        }

        tracing::debug!(stream_id = self.id, "Stream stopped");
        self.events.emit(StreamEvent::Stopped);
        self.events.close();
    }
}

impl NetStreamListener for Stream {
    fn on_command(&self, name: &str, params: AmfValue, transaction_id: f64, extra: Vec<AmfValue>) {
        if self.is_stopped() {
            return;
        }

        tracing::trace!(stream_id = self.id, command = name, "Command received");
        let command = Command {
            name: name.to_string(),
            params,
            transaction_id,
            extra,
        };
        // Only fails once the dispatcher is gone, i.e. the stream is dropping.
        let _ = self.dispatch.send(Dispatch::Command(command));
    }

    fn on_stopped(&self) {
        tracing::debug!(stream_id = self.id, "Stream deleted by peer");
        // Commands raised before the delete are still delivered first.
        if self.dispatch.send(Dispatch::Deleted).is_err() {
            self.stop();
        }
    }
}

async fn dispatch_commands(stream: Weak<Stream>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(work) = rx.recv().await {
        let Some(stream) = stream.upgrade() else {
            break;
        };
        if stream.is_stopped() {
            break;
        }
        match work {
            Dispatch::Command(command) => stream.events.emit(StreamEvent::Command(command)),
            Dispatch::Deleted => {
                stream.stop();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        EncodingCounters, EncodingSource, IncomingBridgeHandle, MediaFrame, MediaFrameListener,
        MediaKind, MediaSource,
    };
    use crate::error::ValidationError;
    use crate::protocol::net_stream;

    struct Null;

    impl MediaFrameListener for Null {
        fn on_media_frame(&self, _frame: &MediaFrame) {}
    }

    impl EncodingSource for Null {
        fn update(&self) -> EncodingCounters {
            EncodingCounters::default()
        }
    }

    impl MediaSource for Null {
        fn add_media_listener(&self, _listener: Arc<dyn MediaFrameListener>) {}
        fn remove_media_listener(&self, _listener: &Arc<dyn MediaFrameListener>) {}
    }

    struct FakeBridge {
        listener: Arc<dyn MediaFrameListener>,
    }

    impl IncomingBridgeHandle for FakeBridge {
        fn frame_listener(&self) -> Arc<dyn MediaFrameListener> {
            self.listener.clone()
        }

        fn source(&self, _kind: MediaKind) -> Arc<dyn MediaSource> {
            Arc::new(Null)
        }

        fn stop(&self) {}
    }

    #[derive(Default)]
    struct FakeNetStream {
        listener: Mutex<Option<Weak<dyn NetStreamListener>>>,
        statuses: Mutex<Vec<(f64, String, String, String)>>,
        media_listeners: Mutex<usize>,
    }

    impl FakeNetStream {
        fn command(&self, name: &str) {
            let listener = self.listener.lock().unwrap().clone();
            if let Some(listener) = listener.and_then(|l| l.upgrade()) {
                listener.on_command(name, AmfValue::Null, 0.0, vec![AmfValue::from("key")]);
            }
        }
    }

    impl NetStreamHandle for FakeNetStream {
        fn id(&self) -> u32 {
            1
        }

        fn set_listener(&self, listener: Weak<dyn NetStreamListener>) {
            *self.listener.lock().unwrap() = Some(listener);
        }

        fn reset_listener(&self) {
            *self.listener.lock().unwrap() = None;
        }

        fn send_status(&self, transaction_id: f64, code: &str, level: &str, description: &str) {
            self.statuses.lock().unwrap().push((
                transaction_id,
                code.to_string(),
                level.to_string(),
                description.to_string(),
            ));
        }

        fn create_incoming_bridge(&self, _late: u32, _buffering: u32) -> Arc<dyn IncomingBridgeHandle> {
            Arc::new(FakeBridge {
                listener: Arc::new(Null),
            })
        }

        fn add_media_listener(&self, _listener: Arc<dyn MediaFrameListener>) {
            *self.media_listeners.lock().unwrap() += 1;
        }

        fn remove_media_listener(&self, _listener: &Arc<dyn MediaFrameListener>) {
            *self.media_listeners.lock().unwrap() -= 1;
        }
    }

    fn stream() -> (Arc<Stream>, Arc<FakeNetStream>) {
        let net_stream = Arc::new(FakeNetStream::default());
        let stream = Stream::new(net_stream.clone(), &Handle::current());
        (stream, net_stream)
    }

    #[tokio::test]
    async fn test_commands_are_deferred() {
        let (stream, net_stream) = stream();

        net_stream.command("publish");
        let mut events = stream.events().subscribe();

        match events.recv().await {
            Some(StreamEvent::Command(cmd)) => {
                assert_eq!(cmd.name, "publish");
                assert_eq!(cmd.stream_name(), Some("key"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_status_defaults_description() {
        let (stream, net_stream) = stream();

        stream.send_status(0.0, net_stream::publish::START, None).unwrap();
        stream
            .send_status(1.0, net_stream::publish::BAD_NAME, Some("taken"))
            .unwrap();

        let statuses = net_stream.statuses.lock().unwrap();
        assert_eq!(
            statuses[0],
            (
                0.0,
                "NetStream.Publish.Start".to_string(),
                "status".to_string(),
                "NetStream.Publish.Start".to_string()
            )
        );
        assert_eq!(statuses[1].3, "taken");
    }

    #[tokio::test]
    async fn test_bridge_parameter_validation() {
        let (stream, net_stream) = stream();

        for (late, buffering) in [(-1, 600), (1001, 600), (200, -1), (200, 1001)] {
            let result = stream.create_incoming_stream_bridge(BridgeConfig::new(late, buffering));
            assert!(matches!(result, Err(Error::Validation(_))));
        }
        assert_eq!(*net_stream.media_listeners.lock().unwrap(), 0);

        for (late, buffering) in [(0, 0), (1000, 1000)] {
            let bridge = stream
                .create_incoming_stream_bridge(BridgeConfig::new(late, buffering))
                .unwrap();
            assert!(Arc::ptr_eq(&bridge.stream().unwrap(), &stream));
            bridge.stop();
        }
        assert_eq!(*net_stream.media_listeners.lock().unwrap(), 0);

        let err = stream
            .create_incoming_stream_bridge(BridgeConfig::new(-1, 0))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Negative {
                name: "maxLateOffset"
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_detaches_bridge_and_is_idempotent() {
        let (stream, net_stream) = stream();
        let bridge = stream
            .create_incoming_stream_bridge(BridgeConfig::default())
            .unwrap();
        let mut events = stream.events().subscribe();

        stream.stop();
        stream.stop();

        assert_eq!(events.recv().await, Some(StreamEvent::Stopped));
        assert_eq!(events.recv().await, None);
        assert!(bridge.stream().is_none());
        assert!(!bridge.is_stopped());
        assert!(net_stream.listener.lock().unwrap().is_none());
        assert!(stream.send_status(0.0, net_stream::publish::START, None).is_err());
    }

    #[tokio::test]
    async fn test_commands_after_stop_are_dropped() {
        let (stream, net_stream) = stream();
        let listener = net_stream.listener.lock().unwrap().clone().unwrap();
        let mut events = stream.events().subscribe();

        stream.stop();
        if let Some(listener) = listener.upgrade() {
            listener.on_command("publish", AmfValue::Null, 0.0, vec![]);
        }

        assert_eq!(events.recv().await, Some(StreamEvent::Stopped));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_peer_delete_after_command_keeps_order() {
        let (stream, net_stream) = stream();
        let listener = net_stream.listener.lock().unwrap().clone().unwrap();
        let mut events = stream.events().subscribe();

        net_stream.command("publish");
        if let Some(listener) = listener.upgrade() {
            listener.on_stopped();
        }
        assert!(!stream.is_stopped());

        match events.recv().await {
            Some(StreamEvent::Command(cmd)) => assert_eq!(cmd.name, "publish"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(events.recv().await, Some(StreamEvent::Stopped));
        assert_eq!(events.recv().await, None);
        assert!(stream.is_stopped());
        assert!(net_stream.listener.lock().unwrap().is_none());
    }
}
