//! Incoming stream bridge
//!
//! Turns the media of an RTMP net-stream into an audio and a video
//! [`IncomingStreamTrackBridge`] that outgoing bridges can attach to.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use uuid::Uuid;

use crate::engine::{IncomingBridgeHandle, MediaKind, NetStreamHandle};
use crate::error::{Error, Result};
use crate::event::{Emitter, ListenerId};
use crate::session::{Stream, StreamEvent};
use crate::stats::{RttProbe, StreamStats};

use super::config::BridgeConfig;
use super::incoming_track::IncomingStreamTrackBridge;

/// Events raised by an [`IncomingStreamBridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingStreamEvent {
    Stopped,
}

struct StreamAttachment {
    stream: Weak<Stream>,
    listener: ListenerId,
    net_stream: Arc<dyn NetStreamHandle>,
}

struct BridgeState {
    tracks: Vec<Arc<IncomingStreamTrackBridge>>,
    stream: Option<StreamAttachment>,
    stopped: bool,
}

pub struct IncomingStreamBridge {
    id: Uuid,
    config: BridgeConfig,
    handle: Arc<dyn IncomingBridgeHandle>,
    state: Mutex<BridgeState>,
    events: Emitter<IncomingStreamEvent>,
}

impl IncomingStreamBridge {
    /// Wrap an engine bridge, creating its audio and video tracks
    pub fn new(handle: Arc<dyn IncomingBridgeHandle>, config: BridgeConfig) -> Arc<Self> {
        let weak = Arc::downgrade(&handle);
        let rtt: RttProbe = Arc::new(move || weak.upgrade().and_then(|h| h.rtt()));

        let tracks = [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .map(|kind| {
                IncomingStreamTrackBridge::new(kind.as_str(), kind, handle.source(kind), rtt.clone())
            })
            .collect();

        let bridge = Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            handle,
            state: Mutex::new(BridgeState {
                tracks,
                stream: None,
                stopped: false,
            }),
            events: Emitter::new(),
        });

        tracing::debug!(bridge_id = %bridge.id, "Incoming stream bridge created");
        bridge
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    pub fn events(&self) -> &Emitter<IncomingStreamEvent> {
        &self.events
    }

    pub fn track(&self, id: &str) -> Option<Arc<IncomingStreamTrackBridge>> {
        self.lock().tracks.iter().find(|t| t.id() == id).cloned()
    }

    pub fn tracks(&self) -> Vec<Arc<IncomingStreamTrackBridge>> {
        self.lock().tracks.clone()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<IncomingStreamTrackBridge>> {
        self.tracks_of(MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<IncomingStreamTrackBridge>> {
        self.tracks_of(MediaKind::Video)
    }

    fn tracks_of(&self, kind: MediaKind) -> Vec<Arc<IncomingStreamTrackBridge>> {
        self.lock()
            .tracks
            .iter()
            .filter(|t| t.media() == kind)
            .cloned()
            .collect()
    }

    /// Stats of every track, keyed by track id
    pub fn stats(&self) -> StreamStats {
        self.tracks()
            .into_iter()
            .map(|t| (t.id().to_string(), t.stats()))
            .collect()
    }

    pub async fn stats_async(&self) -> StreamStats {
        let mut stats = StreamStats::new();
        for track in self.tracks() {
            stats.insert(track.id().to_string(), track.stats_async().await);
        }
        stats
    }

    /// Consume media from `stream`, replacing any previous stream
    ///
    /// The bridge detaches by itself when the stream stops.
    pub fn attach_to(self: &Arc<Self>, stream: &Arc<Stream>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped("incoming stream bridge"));
        }
        self.detach();

        let net_stream = stream.net_stream().ok_or(Error::Stopped("stream"))?;
        net_stream.add_media_listener(self.handle.frame_listener());

        let me = Arc::downgrade(self);
        let attached = Arc::downgrade(stream);
        let listener = stream.events().on(move |event| {
            if matches!(event, StreamEvent::Stopped) {
                if let Some(me) = me.upgrade() {
                    me.on_stream_stopped(&attached);
                }
            }
        });

        tracing::debug!(bridge_id = %self.id, stream_id = stream.id(), "Incoming bridge attached");

        self.lock().stream = Some(StreamAttachment {
            stream: Arc::downgrade(stream),
            listener,
            net_stream,
        });
        Ok(())
    }

    fn on_stream_stopped(&self, stream: &Weak<Stream>) {
        let attachment = {
            let mut state = self.lock();
            match &state.stream {
                Some(a) if Weak::ptr_eq(&a.stream, stream) => state.stream.take(),
                _ => None,
            }
        };
        if let Some(attachment) = attachment {
            attachment
                .net_stream
                .remove_media_listener(&self.handle.frame_listener());
        }
    }

    /// Stop consuming the stream's media
    pub fn detach(&self) {
        let Some(attachment) = self.lock().stream.take() else {
            return;
        };

        attachment
            .net_stream
            .remove_media_listener(&self.handle.frame_listener());
        if let Some(stream) = attachment.stream.upgrade() {
            stream.events().off(attachment.listener);
        }
        tracing::debug!(bridge_id = %self.id, "Incoming bridge detached");
    }

    /// The stream media is consumed from, if any
    pub fn stream(&self) -> Option<Arc<Stream>> {
        self.lock().stream.as_ref().and_then(|a| a.stream.upgrade())
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Detach, stop both tracks and release the engine bridge
    pub fn stop(&self) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        self.detach();
        let tracks = std::mem::take(&mut self.lock().tracks);
        for track in tracks {
            track.stop();
        }
        self.handle.stop();

        tracing::debug!(bridge_id = %self.id, "Incoming stream bridge stopped");
        self.events.emit(IncomingStreamEvent::Stopped);
        self.events.close();
    }
}
