//! Outgoing track bridge
//!
//! Pulls frames from at most one incoming track and pushes them into the
//! engine's outgoing bridge. The attachment is a weak back-reference: the
//! outgoing side never keeps the source alive and never stops it.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::engine::{EncodingSource, MediaFrameListener, MediaKind, MediaSource};
use crate::error::{Error, Result};
use crate::event::{Emitter, ListenerId};
use crate::stats::{CachedEncoding, RttProbe, StatsCache, TrackStats};

use super::incoming_track::{IncomingStreamTrackBridge, IncomingTrackEvent};

/// Events raised by an [`OutgoingStreamTrackBridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingTrackEvent {
    Stopped,
}

struct Attachment {
    track: Weak<IncomingStreamTrackBridge>,
    listener: ListenerId,
    source: Arc<dyn MediaSource>,
}

#[derive(Default)]
struct TrackState {
    attachment: Option<Attachment>,
    stopped: bool,
}

pub struct OutgoingStreamTrackBridge {
    id: String,
    media: MediaKind,
    frame_listener: Arc<dyn MediaFrameListener>,
    counters: Arc<dyn EncodingSource>,
    state: Mutex<TrackState>,
    stats: StatsCache,
    events: Emitter<OutgoingTrackEvent>,
}

impl OutgoingStreamTrackBridge {
    pub fn new(
        id: impl Into<String>,
        media: MediaKind,
        frame_listener: Arc<dyn MediaFrameListener>,
        counters: Arc<dyn EncodingSource>,
        rtt: RttProbe,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            media,
            frame_listener,
            counters,
            state: Mutex::new(TrackState::default()),
            stats: StatsCache::new(rtt),
            events: Emitter::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn events(&self) -> &Emitter<OutgoingTrackEvent> {
        &self.events
    }

    fn cached_encodings(&self) -> Vec<CachedEncoding> {
        vec![CachedEncoding {
            id: String::new(),
            source: self.counters.clone(),
        }]
    }

    /// Stats of the media sent to the peer
    pub fn stats(&self) -> TrackStats {
        if self.is_stopped() {
            return TrackStats::new();
        }
        self.stats.get(&self.cached_encodings())
    }

    pub async fn stats_async(&self) -> TrackStats {
        if self.is_stopped() {
            return TrackStats::new();
        }
        self.stats.get_async(&self.cached_encodings()).await
    }

    /// Start forwarding media from `track`, replacing any previous attachment
    pub fn attach_to(self: &Arc<Self>, track: &Arc<IncomingStreamTrackBridge>) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped("outgoing track"));
        }
        self.detach();

        let source = track
            .media_source()
            .ok_or(Error::Stopped("incoming track"))?;
        source.add_media_listener(self.frame_listener.clone());

        let me = Arc::downgrade(self);
        let attached = Arc::downgrade(track);
        let listener = track.events().on(move |event| {
            if *event == IncomingTrackEvent::Stopped {
                if let Some(me) = me.upgrade() {
                    me.on_attached_track_stopped(&attached);
                }
            }
        });
        track.attached();

        tracing::debug!(track = %self.id, source = %track.id(), "Outgoing track attached");

        self.lock().attachment = Some(Attachment {
            track: Arc::downgrade(track),
            listener,
            source,
        });
        Ok(())
    }

    fn on_attached_track_stopped(&self, track: &Weak<IncomingStreamTrackBridge>) {
        let attachment = {
            let mut state = self.lock();
            match &state.attachment {
                Some(a) if Weak::ptr_eq(&a.track, track) => state.attachment.take(),
                _ => None,
            }
        };
        if let Some(attachment) = attachment {
            tracing::debug!(track = %self.id, "Attached track stopped, detaching");
            attachment.source.remove_media_listener(&self.frame_listener);
        }
    }

    /// Stop forwarding media; the source track keeps running
    pub fn detach(&self) {
        let Some(attachment) = self.lock().attachment.take() else {
            return;
        };

        attachment.source.remove_media_listener(&self.frame_listener);
        if let Some(track) = attachment.track.upgrade() {
            track.events().off(attachment.listener);
            track.detached();
        }
        tracing::debug!(track = %self.id, "Outgoing track detached");
    }

    /// The incoming track media is pulled from, if any
    pub fn attached_track(&self) -> Option<Arc<IncomingStreamTrackBridge>> {
        self.lock()
            .attachment
            .as_ref()
            .and_then(|a| a.track.upgrade())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attachment.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn stop(&self) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        self.detach();
        self.events.emit(OutgoingTrackEvent::Stopped);
        self.events.close();
        self.stats.clear();
    }
}
