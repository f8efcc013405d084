//! Outgoing stream bridge
//!
//! The media sent to a remote peer on one stream of a client connection.
//! Created by [`ClientConnection::publish`](crate::client::ClientConnection::publish).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::amf::AmfValue;
use crate::engine::{MediaFrameListener, MediaKind, OutgoingBridgeHandle};
use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::stats::{RttProbe, StreamStats};

use super::incoming::IncomingStreamBridge;
use super::outgoing_track::OutgoingStreamTrackBridge;

/// Events raised by an [`OutgoingStreamBridge`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingStreamEvent {
    /// Command sent by the peer on this stream, usually `onStatus`
    Command { name: String, params: Vec<AmfValue> },
    Stopped,
}

pub struct OutgoingStreamBridge {
    id: Uuid,
    stream_id: u32,
    handle: Arc<dyn OutgoingBridgeHandle>,
    tracks: Mutex<Vec<Arc<OutgoingStreamTrackBridge>>>,
    stopped: AtomicBool,
    events: Emitter<OutgoingStreamEvent>,
}

impl OutgoingStreamBridge {
    pub fn new(stream_id: u32, handle: Arc<dyn OutgoingBridgeHandle>) -> Arc<Self> {
        let weak = Arc::downgrade(&handle);
        let rtt: RttProbe = Arc::new(move || weak.upgrade().and_then(|h| h.rtt()));

        let tracks = [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .map(|kind| {
                OutgoingStreamTrackBridge::new(
                    kind.as_str(),
                    kind,
                    handle.frame_listener(),
                    handle.counters(kind),
                    rtt.clone(),
                )
            })
            .collect();

        Arc::new(Self {
            id: Uuid::new_v4(),
            stream_id,
            handle,
            tracks: Mutex::new(tracks),
            stopped: AtomicBool::new(false),
            events: Emitter::new(),
        })
    }

    fn tracks_lock(&self) -> MutexGuard<'_, Vec<Arc<OutgoingStreamTrackBridge>>> {
        self.tracks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// RTMP stream id on the client connection
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn events(&self) -> &Emitter<OutgoingStreamEvent> {
        &self.events
    }

    /// Entry point for frames sent on this stream
    pub fn frame_listener(&self) -> Arc<dyn MediaFrameListener> {
        self.handle.frame_listener()
    }

    pub fn track(&self, id: &str) -> Option<Arc<OutgoingStreamTrackBridge>> {
        self.tracks_lock().iter().find(|t| t.id() == id).cloned()
    }

    pub fn tracks(&self) -> Vec<Arc<OutgoingStreamTrackBridge>> {
        self.tracks_lock().clone()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<OutgoingStreamTrackBridge>> {
        self.tracks_of(MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<OutgoingStreamTrackBridge>> {
        self.tracks_of(MediaKind::Video)
    }

    fn tracks_of(&self, kind: MediaKind) -> Vec<Arc<OutgoingStreamTrackBridge>> {
        self.tracks_lock()
            .iter()
            .filter(|t| t.media() == kind)
            .cloned()
            .collect()
    }

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

    /// Forward the media of `incoming`, pairing tracks of the same kind in order
    pub fn attach_to(&self, incoming: &IncomingStreamBridge) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped("outgoing stream bridge"));
        }
        self.detach();

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let sources = match kind {
                MediaKind::Audio => incoming.audio_tracks(),
                MediaKind::Video => incoming.video_tracks(),
            };
            for (track, source) in self.tracks_of(kind).iter().zip(sources.iter()) {
                track.attach_to(source)?;
            }
        }

        tracing::debug!(
            bridge_id = %self.id,
            stream_id = self.stream_id,
            incoming = %incoming.id(),
            "Outgoing bridge attached"
        );
        Ok(())
    }

    /// Detach every track without stopping them
    pub fn detach(&self) {
        for track in self.tracks() {
            track.detach();
        }
    }

    pub(crate) fn on_command(&self, name: &str, params: Vec<AmfValue>) {
        if self.is_stopped() {
            return;
        }
        self.events.emit(OutgoingStreamEvent::Command {
            name: name.to_string(),
            params,
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop every track, detaching them, and release the engine bridge
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let tracks = std::mem::take(&mut *self.tracks_lock());
        for track in tracks {
            track.stop();
        }
        self.handle.stop();

        tracing::debug!(bridge_id = %self.id, stream_id = self.stream_id, "Outgoing stream bridge stopped");
        self.events.emit(OutgoingStreamEvent::Stopped);
        self.events.close();
    }
}
